use crate::domain::money::Money;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use uuid::Uuid;

/// One reconciliation row per payment.
#[derive(Serialize)]
struct PaymentRow<'a> {
    payment_id: Uuid,
    buyer_id: Uuid,
    shop_id: Uuid,
    appointment_id: Option<Uuid>,
    status: PaymentStatus,
    amount: Money,
    currency: &'a str,
    commission_amount: Money,
    application_fee: Money,
    refunded_amount: Money,
    destination_account_id: Option<&'a str>,
    checkout_session_id: Option<&'a str>,
    payment_intent_id: Option<&'a str>,
    refund_eligible_until: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(p: &'a Payment) -> Self {
        Self {
            payment_id: p.id,
            buyer_id: p.buyer_id,
            shop_id: p.shop_id,
            appointment_id: p.appointment_id,
            status: p.status,
            amount: p.amount,
            currency: p.currency.as_str(),
            commission_amount: p.commission_amount,
            application_fee: p.application_fee,
            refunded_amount: p.refunded_amount,
            destination_account_id: p.destination_account_id.as_deref(),
            checkout_session_id: p.checkout_session_id.as_deref(),
            payment_intent_id: p.payment_intent_id.as_deref(),
            refund_eligible_until: p.refund_eligible_until,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Writes payments as CSV for operator reconciliation.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header and one row per payment, then flushes.
    pub fn write_payments(&mut self, payments: &[Payment]) -> Result<()> {
        if payments.is_empty() {
            self.writer.write_record(HEADER)?;
        }
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Written explicitly when there are no rows, since `serialize` derives it from the first row.
const HEADER: [&str; 16] = [
    "payment_id",
    "buyer_id",
    "shop_id",
    "appointment_id",
    "status",
    "amount",
    "currency",
    "commission_amount",
    "application_fee",
    "refunded_amount",
    "destination_account_id",
    "checkout_session_id",
    "payment_intent_id",
    "refund_eligible_until",
    "created_at",
    "updated_at",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::NewPayment;
    use rust_decimal_macros::dec;

    #[test]
    fn test_write_payments() {
        let payment = Payment::create(
            NewPayment {
                buyer_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                appointment_id: None,
                service_id: None,
                amount: Amount::new(dec!(10000)).unwrap(),
                currency: Currency::new("eur").unwrap(),
                commission_rate: dec!(5),
            },
            Utc::now(),
            chrono::Duration::hours(48),
        )
        .unwrap();

        let mut buffer = Vec::new();
        PaymentWriter::new(&mut buffer)
            .write_payments(std::slice::from_ref(&payment))
            .unwrap();
        let output = String::from_utf8(buffer).unwrap();

        let mut lines = output.lines();
        assert!(lines.next().unwrap().starts_with("payment_id,buyer_id,shop_id"));
        let row = lines.next().unwrap();
        assert!(row.starts_with(&payment.id.to_string()));
        assert!(row.contains(",PENDING,10000,eur,500,0,0,"));
    }

    #[test]
    fn test_write_empty_export_has_header() {
        let mut buffer = Vec::new();
        PaymentWriter::new(&mut buffer).write_payments(&[]).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.starts_with("payment_id,"));
    }
}
