mod common;

use common::{Harness, charge_refunded, checkout_command, session_completed};
use marketpay::application::webhook::WebhookOutcome;
use marketpay::domain::gateway::SettlementRouting;
use marketpay::domain::integration::IntegrationEventType;
use marketpay::domain::money::{Amount, Money};
use marketpay::domain::payment::PaymentStatus;
use marketpay::error::PaymentError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_marketplace_payment_lifecycle() {
    let harness = Harness::new();

    // Shop onboards and the gateway reports it as able to take charges.
    let (shop_id, account_id) = harness.onboarded_shop().await;
    assert!(harness.accounts.can_receive_payments(shop_id).await.unwrap());

    // Buyer checks out 100.00 EUR; the platform keeps 5%.
    let outcome = harness
        .checkout
        .create_checkout(checkout_command(shop_id, 10_000))
        .await
        .unwrap();
    assert_eq!(
        outcome.routing,
        SettlementRouting::Destination {
            account_id: account_id.clone(),
            application_fee: Money::from_minor(500),
        }
    );
    let payment = harness.payments.get(outcome.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    // The gateway reports the completed session.
    let processed = harness
        .deliver(&session_completed("evt_checkout", &outcome.session_id))
        .await
        .unwrap();
    assert_eq!(
        processed,
        WebhookOutcome::Processed("checkout.session.completed".to_string())
    );
    let payment = harness.payments.get(outcome.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let published = harness.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "payment.completed");
    assert_eq!(published[0].1.event_type, IntegrationEventType::PaymentCompleted);
    assert_eq!(published[0].1.payment_id, payment.id);

    // Full refund through the platform.
    let refunded = harness
        .payments
        .refund(payment.id, Amount::new(dec!(10000)).unwrap())
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refunded_amount, Money::from_minor(10_000));
    let request = &harness.gateway.refund_requests().await[0];
    assert_eq!(request.connected_account_id, Some(account_id));

    // The gateway's notification of that refund changes nothing.
    let intent = refunded.payment_intent_id.clone().unwrap();
    harness
        .deliver(&charge_refunded("evt_refund", &intent, 10_000))
        .await
        .unwrap();
    assert_eq!(harness.payments.get(payment.id).await.unwrap(), refunded);

    // Nothing is left to refund.
    let err = harness
        .payments
        .refund(payment.id, Amount::new(dec!(1)).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState(_)));
    assert_eq!(harness.gateway.refund_requests().await.len(), 1);
}

#[tokio::test]
async fn test_unonboarded_shop_is_paid_through_platform() {
    let harness = Harness::new();
    let shop_id = uuid::Uuid::new_v4();
    let account = harness.accounts.create_account(shop_id).await.unwrap();
    let link = harness
        .accounts
        .create_onboarding_link_for_shop(
            shop_id,
            "https://shop.example/stripe/return",
            "https://shop.example/stripe/reauth",
        )
        .await
        .unwrap();
    assert!(link.contains(&account.account_id));

    let outcome = harness
        .checkout
        .create_checkout(checkout_command(shop_id, 2_000))
        .await
        .unwrap();
    assert_eq!(outcome.routing, SettlementRouting::Platform);

    harness
        .deliver(&session_completed("evt_1", &outcome.session_id))
        .await
        .unwrap();
    let payment = harness.payments.get(outcome.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.commission_amount, Money::from_minor(100));
    assert_eq!(payment.application_fee, Money::ZERO);
}
