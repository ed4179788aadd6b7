use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variables override file values: `MARKETPAY__PLATFORM__FEE_PERCENT=7.5`.
pub const ENV_PREFIX: &str = "MARKETPAY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout_ms: u64,
    /// Country new connected accounts are provisioned in.
    pub account_country: String,
    pub account_default_currency: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub fee_percent: Decimal,
    pub refund_window_hours: i64,
    /// PENDING payments older than this are swept to FAILED by the cleanup job.
    pub pending_timeout_minutes: i64,
    /// Public base URL of the front end hosting the success and cancel pages.
    pub public_base_url: String,
    pub supported_currencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Base URL of the shop service. Empty disables metadata lookups.
    pub base_url: String,
    /// Service token sent as a bearer credential.
    pub api_token: SecretString,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub payment_exchange: String,
    pub appointment_exchange: String,
    pub payment_completed_key: String,
    pub payment_refunded_key: String,
    pub appointment_confirmed_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub secret: SecretString,
    pub tolerance_secs: i64,
    pub ledger_lease_secs: i64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            api_key: SecretString::from(String::new()),
            timeout_ms: 10_000,
            account_country: "FR".to_string(),
            account_default_currency: "eur".to_string(),
        }
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            fee_percent: dec!(5.0),
            refund_window_hours: 48,
            pending_timeout_minutes: 60,
            public_base_url: "http://localhost:3000".to_string(),
            supported_currencies: ["eur", "usd", "gbp", "chf"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: SecretString::from(String::new()),
            timeout_ms: 3_000,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            payment_exchange: "payment.exchange".to_string(),
            appointment_exchange: "appointment.exchange".to_string(),
            payment_completed_key: "payment.completed".to_string(),
            payment_refunded_key: "payment.refunded".to_string(),
            appointment_confirmed_key: "appointment.confirmed".to_string(),
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: SecretString::from(String::new()),
            tolerance_secs: 300,
            ledger_lease_secs: 300,
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CatalogSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PlatformSettings {
    pub fn refund_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.refund_window_hours)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_timeout_minutes)
    }
}

impl WebhookSettings {
    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tolerance_secs)
    }

    pub fn ledger_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_lease_secs)
    }
}

/// Loads settings from an optional YAML file overlaid with `MARKETPAY__*` variables.
pub fn get_configuration(file: Option<&Path>) -> Result<Settings> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    } else {
        let default_path = std::env::current_dir()?.join("configuration").join("base.yaml");
        builder = builder.add_source(config::File::from(default_path).required(false));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("platform.supported_currencies")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.platform.fee_percent, dec!(5.0));
        assert_eq!(settings.platform.refund_window(), chrono::Duration::hours(48));
        assert_eq!(settings.bus.payment_completed_key, "payment.completed");
        assert_eq!(settings.gateway.account_country, "FR");
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "platform:\n  fee_percent: 7.5\n  public_base_url: https://shop.example\nwebhook:\n  secret: whsec_file"
        )
        .unwrap();

        let settings = get_configuration(Some(file.path())).unwrap();
        assert_eq!(settings.platform.fee_percent, dec!(7.5));
        assert_eq!(settings.platform.public_base_url, "https://shop.example");
        assert_eq!(settings.platform.refund_window_hours, 48);
        assert_eq!(settings.webhook.secret.expose_secret(), "whsec_file");
    }
}
