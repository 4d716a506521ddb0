use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use storepay::application::gateway::PaymentGateway;
use storepay::application::verifier::{
    CARD_SIGNATURE_HEADER, GATEWAY_SIGNATURE_HEADER, GATEWAY_TIMESTAMP_HEADER, WebhookVerifier,
    integrity_signature,
};
use storepay::config::PaymentConfig;
use storepay::domain::amount::{MinorUnitPolicy, normalize_currency};
use storepay::domain::operation::{Metadata, ORDER_ID_KEY, Provider};
use storepay::error::PaymentError;
use storepay::infrastructure::in_memory::InMemoryOrderService;
use storepay::interfaces::csv::operation_writer::OperationWriter;
use storepay::interfaces::csv::scenario_reader::{ScenarioAction, ScenarioReader, ScenarioStep};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario CSV against simulated providers
    Replay {
        /// Scenario CSV file (action,label,provider,amount,currency,order)
        input: PathBuf,
    },
    /// Verify and decode a webhook body with secrets from the environment
    VerifyWebhook {
        #[arg(long)]
        provider: Provider,
        /// File holding the raw request body
        #[arg(long)]
        body: PathBuf,
        /// Signature header value
        #[arg(long)]
        signature: Option<String>,
        /// Event timestamp header value (transaction gateway)
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Print the transaction gateway integrity signature for a checkout
    IntegritySignature {
        #[arg(long)]
        reference: String,
        /// Amount in cents
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        currency: String,
    },
}

/// An operation created by a scenario, addressed by its label.
struct Labelled {
    label: String,
    provider: Provider,
    id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay { input } => replay(input).await,
        Command::VerifyWebhook {
            provider,
            body,
            signature,
            timestamp,
        } => verify_webhook(provider, body, signature, timestamp),
        Command::IntegritySignature {
            reference,
            amount,
            currency,
        } => print_integrity_signature(&reference, amount, &currency),
    }
}

async fn replay(input: PathBuf) -> Result<()> {
    let gateway = PaymentGateway::simulated(Box::new(InMemoryOrderService::new())).into_diagnostic()?;

    let file = File::open(input).into_diagnostic()?;
    let reader = ScenarioReader::new(file);
    let mut labels = Vec::new();
    for (row, step_result) in reader.steps().enumerate() {
        let result = match step_result {
            Ok(step) => run_step(&gateway, &mut labels, step).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            eprintln!("Error on row {}: {}", row + 1, e);
        }
    }

    // Collect final state
    let mut operations = Vec::with_capacity(labels.len());
    for entry in &labels {
        let operation = gateway
            .get_operation(entry.provider, &entry.id)
            .await
            .into_diagnostic()?;
        operations.push((entry.label.as_str(), operation));
    }

    let stdout = io::stdout();
    let mut writer = OperationWriter::new(stdout.lock());
    writer
        .write_operations(operations.iter().map(|(label, op)| (*label, op)))
        .into_diagnostic()?;

    Ok(())
}

async fn run_step(
    gateway: &PaymentGateway,
    labels: &mut Vec<Labelled>,
    step: ScenarioStep,
) -> storepay::error::Result<()> {
    if step.action == ScenarioAction::Create {
        if labels.iter().any(|l| l.label == step.label) {
            return Err(PaymentError::InvalidPayload(format!(
                "label '{}' is already in use",
                step.label
            )));
        }
        let (Some(amount), Some(currency)) = (step.amount, step.currency.as_deref()) else {
            return Err(PaymentError::InvalidPayload(
                "create requires an amount and a currency".to_string(),
            ));
        };
        let amount_minor = MinorUnitPolicy::for_provider(step.provider).to_minor(amount, currency)?;
        let mut metadata = Metadata::new();
        if let Some(order) = step.order {
            metadata.insert(ORDER_ID_KEY.to_string(), order);
        }
        let operation = gateway
            .create_operation(step.provider, amount_minor, currency, metadata)
            .await?;
        labels.push(Labelled {
            label: step.label,
            provider: step.provider,
            id: operation.id,
        });
        return Ok(());
    }

    let target = labels
        .iter()
        .find(|l| l.label == step.label)
        .ok_or_else(|| PaymentError::NotFound(format!("label '{}'", step.label)))?;
    if target.provider != step.provider {
        return Err(PaymentError::InvalidPayload(format!(
            "label '{}' belongs to {}",
            step.label, target.provider
        )));
    }

    match step.action {
        ScenarioAction::Confirm => {
            gateway.confirm_operation(target.provider, &target.id).await?;
        }
        ScenarioAction::Refund => {
            let amount_minor = match step.amount {
                Some(amount) => {
                    let operation = gateway.get_operation(target.provider, &target.id).await?;
                    Some(
                        MinorUnitPolicy::for_provider(target.provider)
                            .to_minor(amount, &operation.currency)?,
                    )
                }
                None => None,
            };
            gateway
                .refund_operation(target.provider, &target.id, amount_minor)
                .await?;
        }
        ScenarioAction::Decline => {
            gateway.simulate_decline(target.provider, &target.id).await?;
        }
        ScenarioAction::Fail => {
            gateway.simulate_failure(target.provider, &target.id).await?;
        }
        ScenarioAction::Get | ScenarioAction::Create => {
            gateway.get_operation(target.provider, &target.id).await?;
        }
    }
    Ok(())
}

fn verify_webhook(
    provider: Provider,
    body: PathBuf,
    signature: Option<String>,
    timestamp: Option<String>,
) -> Result<()> {
    let config = PaymentConfig::from_env().into_diagnostic()?;
    let verifier = WebhookVerifier::from_config(&config).into_diagnostic()?;
    let raw_body = std::fs::read(body).into_diagnostic()?;

    let signature_header = match provider {
        Provider::CardProcessor => CARD_SIGNATURE_HEADER,
        _ => GATEWAY_SIGNATURE_HEADER,
    };
    let mut headers = HeaderMap::new();
    if let Some(value) = signature {
        headers.insert(
            HeaderName::from_static(signature_header),
            HeaderValue::from_str(&value).into_diagnostic()?,
        );
    }
    if let Some(value) = timestamp {
        headers.insert(
            HeaderName::from_static(GATEWAY_TIMESTAMP_HEADER),
            HeaderValue::from_str(&value).into_diagnostic()?,
        );
    }

    let event = verifier
        .verify_and_decode(provider, &raw_body, &headers)
        .into_diagnostic()?;
    println!(
        "{},{},{}",
        event.operation_id,
        event.canonical_status,
        event.trust.as_str()
    );
    Ok(())
}

fn print_integrity_signature(reference: &str, amount: i64, currency: &str) -> Result<()> {
    let config = PaymentConfig::from_env().into_diagnostic()?;
    let secret = config
        .transaction_gateway
        .integrity_secret
        .as_ref()
        .ok_or_else(|| {
            PaymentError::Configuration(
                "TRANSACTION_GATEWAY_INTEGRITY_SECRET is not set".to_string(),
            )
        })
        .into_diagnostic()?;
    let currency = normalize_currency(currency).into_diagnostic()?;
    println!(
        "{}",
        integrity_signature(reference, amount, &currency, secret.expose_secret())
    );
    Ok(())
}
