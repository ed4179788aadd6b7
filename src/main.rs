use clap::{Parser, Subcommand, ValueEnum};
use marketpay::application::accounts::ConnectedAccountManager;
use marketpay::application::checkout::{CheckoutCommand, CheckoutOrchestrator};
use marketpay::application::payments::PaymentStateMachine;
use marketpay::application::publisher::IntegrationEventPublisher;
use marketpay::application::webhook::WebhookEventProcessor;
use marketpay::config::{Settings, get_configuration};
use marketpay::domain::commission;
use marketpay::domain::money::Amount;
use marketpay::domain::ports::{
    CatalogClientRef, ClockRef, ConnectedAccountStoreRef, PaymentGatewayRef, PaymentStoreRef,
    ProcessedEventStoreRef,
};
use marketpay::domain::signature::SignatureVerifier;
use marketpay::infrastructure::catalog_http::HttpCatalogClient;
use marketpay::infrastructure::clock::SystemClock;
use marketpay::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryConnectedAccountStore, InMemoryPaymentStore,
    InMemoryProcessedEventStore,
};
#[cfg(feature = "storage-rocksdb")]
use marketpay::infrastructure::rocksdb::RocksDBStore;
use marketpay::infrastructure::sandbox::SandboxGateway;
use marketpay::infrastructure::stripe::StripeGateway;
use marketpay::interfaces::bus::json_lines::JsonLinesEventBus;
use marketpay::interfaces::csv::payment_writer::PaymentWriter;
use marketpay::telemetry::{get_json_subscriber, get_subscriber, init_subscriber};
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML settings file. Defaults to configuration/base.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Use the in-process sandbox gateway instead of the provider's API.
    #[arg(long, global = true)]
    sandbox: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Platform commission for an amount in minor units
    Fee {
        amount: Decimal,
        /// Rate in percent; defaults to the configured platform fee
        #[arg(long)]
        rate: Option<Decimal>,
    },
    /// Create a payment and its hosted checkout session
    Checkout {
        #[arg(long)]
        buyer: Uuid,
        #[arg(long)]
        shop: Uuid,
        #[arg(long)]
        appointment: Option<Uuid>,
        #[arg(long)]
        service: Option<Uuid>,
        /// Amount in minor units (cents)
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "eur")]
        currency: String,
    },
    /// Refund part or all of a completed payment
    Refund {
        payment_id: Uuid,
        #[arg(long)]
        amount: Decimal,
    },
    /// Retry the in-flight refund of a payment under its original idempotency key
    ResumeRefund { payment_id: Uuid },
    /// Show a payment by id or by appointment
    Show {
        #[arg(required_unless_present = "appointment")]
        payment_id: Option<Uuid>,
        #[arg(long, conflicts_with = "payment_id")]
        appointment: Option<Uuid>,
    },
    /// Process a webhook delivery read from a file
    Webhook {
        payload: PathBuf,
        /// Value of the signature header
        #[arg(long)]
        signature: String,
    },
    /// Compute the signature header for a payload
    SignWebhook {
        payload: PathBuf,
        /// Unix timestamp to sign at; defaults to now
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Connected account onboarding
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
    /// Write every payment as CSV
    Export,
    /// Fail PENDING payments older than the pending timeout
    Cleanup {
        /// Overrides the configured pending timeout
        #[arg(long)]
        older_than_minutes: Option<i64>,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    Create {
        shop_id: Uuid,
    },
    Link {
        shop_id: Uuid,
        #[arg(long)]
        return_url: Option<String>,
        #[arg(long)]
        refresh_url: Option<String>,
    },
    Sync {
        account_id: String,
    },
    Status {
        shop_id: Uuid,
    },
    /// Answer the provider's post-onboarding redirect
    Return {
        #[arg(long)]
        account: Option<String>,
    },
    /// Answer the provider's expired-link redirect
    Reauth {
        #[arg(long)]
        account: Option<String>,
    },
}

struct Stores {
    payments: PaymentStoreRef,
    accounts: ConnectedAccountStoreRef,
    ledger: ProcessedEventStoreRef,
}

impl Stores {
    fn in_memory() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentStore::new()),
            accounts: Arc::new(InMemoryConnectedAccountStore::new()),
            ledger: Arc::new(InMemoryProcessedEventStore::new()),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    let Some(db_path) = db_path else {
        return Ok(Stores::in_memory());
    };
    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    Ok(Stores {
        payments: Arc::new(store.clone()),
        accounts: Arc::new(store.clone()),
        ledger: Arc::new(store),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        tracing::warn!("built without the storage-rocksdb feature, --db-path ignored, using in-memory storage");
    }
    Ok(Stores::in_memory())
}

struct Services {
    payments: Arc<PaymentStateMachine>,
    accounts: Arc<ConnectedAccountManager>,
    checkout: CheckoutOrchestrator,
    webhooks: WebhookEventProcessor,
}

fn build_services(settings: &Settings, stores: Stores, sandbox: bool) -> Result<Services> {
    let clock: ClockRef = Arc::new(SystemClock);
    let gateway: PaymentGatewayRef = if sandbox {
        Arc::new(SandboxGateway::new())
    } else {
        Arc::new(StripeGateway::new(&settings.gateway).into_diagnostic()?)
    };
    let catalog: CatalogClientRef = if settings.catalog.base_url.is_empty() {
        Arc::new(InMemoryCatalog::new())
    } else {
        Arc::new(HttpCatalogClient::new(&settings.catalog).into_diagnostic()?)
    };

    let payments = Arc::new(PaymentStateMachine::new(
        stores.payments,
        gateway.clone(),
        clock.clone(),
        settings.platform.refund_window(),
        settings.gateway.timeout(),
    ));
    let accounts = Arc::new(
        ConnectedAccountManager::new(stores.accounts, gateway.clone(), clock.clone(), &settings.gateway)
            .into_diagnostic()?,
    );
    let publisher = Arc::new(IntegrationEventPublisher::new(
        Arc::new(JsonLinesEventBus::new(io::stdout())),
        clock.clone(),
        settings.bus.clone(),
    ));
    let checkout = CheckoutOrchestrator::new(
        payments.clone(),
        accounts.clone(),
        gateway,
        catalog.clone(),
        &settings.platform,
        &settings.gateway,
        &settings.catalog,
    );
    let webhooks = WebhookEventProcessor::new(
        payments.clone(),
        accounts.clone(),
        publisher,
        stores.ledger,
        catalog,
        clock,
        settings,
    );

    Ok(Services {
        payments,
        accounts,
        checkout,
        webhooks,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = "info".to_string();
    match cli.log_format {
        LogFormat::Text => init_subscriber(get_subscriber(filter, io::stderr)),
        LogFormat::Json => init_subscriber(get_json_subscriber(
            env!("CARGO_PKG_NAME").to_string(),
            filter,
            io::stderr,
        )),
    }
    .map_err(|e| miette!(e))?;

    let settings = get_configuration(cli.config.as_deref()).into_diagnostic()?;

    // Commands that need no stores or gateway.
    match &cli.command {
        Command::Fee { amount, rate } => {
            let fee = commission::fee(*amount, rate.unwrap_or(settings.platform.fee_percent))
                .into_diagnostic()?;
            println!("{fee}");
            return Ok(());
        }
        Command::SignWebhook { payload, timestamp } => {
            let body = std::fs::read(payload).into_diagnostic()?;
            let at = match timestamp {
                Some(ts) => chrono::DateTime::from_timestamp(*ts, 0)
                    .ok_or_else(|| miette!("timestamp {ts} out of range"))?,
                None => chrono::Utc::now(),
            };
            let verifier =
                SignatureVerifier::new(settings.webhook.secret.clone(), settings.webhook.tolerance());
            println!("{}", verifier.sign(&body, at).into_diagnostic()?);
            return Ok(());
        }
        _ => {}
    }

    let stores = open_stores(cli.db_path)?;
    let services = build_services(&settings, stores, cli.sandbox)?;

    match cli.command {
        Command::Fee { .. } | Command::SignWebhook { .. } => {}
        Command::Checkout {
            buyer,
            shop,
            appointment,
            service,
            amount,
            currency,
        } => {
            let outcome = services
                .checkout
                .create_checkout(CheckoutCommand {
                    buyer_id: buyer,
                    shop_id: shop,
                    appointment_id: appointment,
                    service_id: service,
                    amount,
                    currency,
                })
                .await
                .into_diagnostic()?;
            print_json(&outcome)?;
        }
        Command::Refund { payment_id, amount } => {
            let amount = Amount::new(amount).into_diagnostic()?;
            let payment = services
                .payments
                .refund(payment_id, amount)
                .await
                .into_diagnostic()?;
            print_json(&payment)?;
        }
        Command::ResumeRefund { payment_id } => {
            let payment = services
                .payments
                .resume_refund(payment_id)
                .await
                .into_diagnostic()?;
            print_json(&payment)?;
        }
        Command::Show {
            payment_id,
            appointment,
        } => {
            let payment = match (payment_id, appointment) {
                (Some(id), _) => Some(services.payments.get(id).await.into_diagnostic()?),
                (None, Some(appointment_id)) => services
                    .payments
                    .find_by_appointment(appointment_id)
                    .await
                    .into_diagnostic()?,
                (None, None) => None,
            };
            print_json(&payment)?;
        }
        Command::Webhook { payload, signature } => {
            let body = std::fs::read(payload).into_diagnostic()?;
            let response = services.webhooks.respond(&body, &signature).await;
            println!("{} {}", response.status, response.body);
        }
        Command::Account { action } => run_account(&services, &settings, action).await?,
        Command::Export => {
            let payments = services.payments.all().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = PaymentWriter::new(stdout.lock());
            writer.write_payments(&payments).into_diagnostic()?;
        }
        Command::Cleanup { older_than_minutes } => {
            let older_than = older_than_minutes
                .map(chrono::Duration::minutes)
                .unwrap_or_else(|| settings.platform.pending_timeout());
            let expired = services
                .payments
                .expire_stale(older_than)
                .await
                .into_diagnostic()?;
            println!("{} pending payment(s) expired", expired.len());
        }
    }

    Ok(())
}

async fn run_account(services: &Services, settings: &Settings, action: AccountCommand) -> Result<()> {
    let accounts = &services.accounts;
    match action {
        AccountCommand::Create { shop_id } => {
            let account = accounts.create_account(shop_id).await.into_diagnostic()?;
            print_json(&account)?;
        }
        AccountCommand::Link {
            shop_id,
            return_url,
            refresh_url,
        } => {
            let base = settings.platform.public_base_url.trim_end_matches('/');
            let return_url = return_url.unwrap_or_else(|| format!("{base}/stripe/return"));
            let refresh_url = refresh_url.unwrap_or_else(|| format!("{base}/stripe/reauth"));
            let url = accounts
                .create_onboarding_link_for_shop(shop_id, &return_url, &refresh_url)
                .await
                .into_diagnostic()?;
            println!("{url}");
        }
        AccountCommand::Sync { account_id } => {
            let account = accounts
                .sync_account_status(&account_id)
                .await
                .into_diagnostic()?;
            print_json(&account)?;
        }
        AccountCommand::Status { shop_id } => {
            let status = accounts.account_status(shop_id).await.into_diagnostic()?;
            print_json(&status)?;
        }
        AccountCommand::Return { account } => {
            print_json(&accounts.handle_return(account.as_deref()))?;
        }
        AccountCommand::Reauth { account } => {
            print_json(&accounts.handle_reauth(account.as_deref()))?;
        }
    }
    Ok(())
}
