use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

const SECRET: &str = "whsec_cli_secret";

fn marketpay() -> Command {
    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.env("MARKETPAY__WEBHOOK__SECRET", SECRET);
    cmd
}

fn payload_file(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn test_fee_rounds_half_up() -> Result<(), Box<dyn std::error::Error>> {
    marketpay()
        .args(["fee", "999"])
        .assert()
        .success()
        .stdout(predicate::str::diff("50\n"));

    marketpay()
        .args(["fee", "10000", "--rate", "7.5"])
        .assert()
        .success()
        .stdout(predicate::str::diff("750\n"));

    Ok(())
}

#[test]
fn test_fee_rejects_negative_amount() {
    marketpay()
        .args(["fee", "--", "-5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be negative"));
}

#[test]
fn test_webhook_with_bad_signature_is_refused() {
    let payload = payload_file(r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#);

    marketpay()
        .args(["--sandbox", "webhook"])
        .arg(payload.path())
        .args(["--signature", "t=1,v1=00"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("400 "))
        .stdout(predicate::str::contains("webhook processing failed"));
}

#[test]
fn test_signed_unhandled_webhook_is_acknowledged() -> Result<(), Box<dyn std::error::Error>> {
    let payload = payload_file(r#"{"id":"evt_2","type":"invoice.finalized","data":{"object":{"id":"in_1"}}}"#);

    let output = marketpay().arg("sign-webhook").arg(payload.path()).output()?;
    assert!(output.status.success());
    let signature = String::from_utf8(output.stdout)?.trim().to_string();
    assert!(signature.starts_with("t="));
    assert!(signature.contains(",v1="));

    marketpay()
        .args(["--sandbox", "webhook"])
        .arg(payload.path())
        .args(["--signature", &signature])
        .assert()
        .success()
        .stdout(predicate::str::diff("200 {\"received\":true}\n"));

    Ok(())
}

#[test]
fn test_signed_webhook_for_unknown_session_asks_for_redelivery() -> Result<(), Box<dyn std::error::Error>> {
    let payload = payload_file(r#"{"id":"evt_3","type":"checkout.session.completed","data":{"object":{"id":"cs_missing"}}}"#);
    let output = marketpay().arg("sign-webhook").arg(payload.path()).output()?;
    let signature = String::from_utf8(output.stdout)?.trim().to_string();

    marketpay()
        .args(["--sandbox", "webhook"])
        .arg(payload.path())
        .args(["--signature", &signature])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("500 "));

    Ok(())
}

#[test]
fn test_sandbox_checkout_for_unknown_shop_settles_on_platform() {
    marketpay()
        .args([
            "--sandbox",
            "checkout",
            "--buyer",
            "0b7e2a4c-1d3f-4e5a-9b8c-7d6e5f4a3b2c",
            "--shop",
            "3f2a9c1e-5b6d-4e7f-8a9b-0c1d2e3f4a5b",
            "--amount",
            "10000",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"routing\":\"Platform\""))
        .stdout(predicate::str::contains("https://checkout.sandbox.local/c/pay/cs_sandbox_"));
}

#[test]
fn test_checkout_rejects_unsupported_currency() {
    marketpay()
        .args([
            "--sandbox",
            "checkout",
            "--buyer",
            "0b7e2a4c-1d3f-4e5a-9b8c-7d6e5f4a3b2c",
            "--shop",
            "3f2a9c1e-5b6d-4e7f-8a9b-0c1d2e3f4a5b",
            "--amount",
            "10000",
            "--currency",
            "xyz",
        ])
        .assert()
        .failure();
}

#[test]
fn test_export_without_payments_prints_header() {
    marketpay()
        .args(["--sandbox", "export"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("payment_id,buyer_id,shop_id,"));
}

#[test]
fn test_onboarding_redirects() {
    marketpay()
        .args(["--sandbox", "account", "return", "--account", "acct_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"success\""));

    marketpay()
        .args(["--sandbox", "account", "reauth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Please restart onboarding"));
}

#[test]
fn test_cleanup_on_empty_store() {
    marketpay()
        .args(["--sandbox", "cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 pending payment(s) expired"));
}

#[test]
fn test_resume_refund_of_unknown_payment_fails() {
    marketpay()
        .args([
            "--sandbox",
            "resume-refund",
            "0b7e2a4c-1d3f-4e5a-9b8c-7d6e5f4a3b2c",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}
