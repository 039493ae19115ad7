use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use appsaga::clients::{LoggingEmailSender, SimulatedDocumentService, SimulatedGateway};
use appsaga::saga::{Activities, JsonProgressStore, RunRegistry};
use appsaga::{
    ApplicationRecord, ApplicationStatus, ApplicationStore, MemoryApplicationStore, Profile,
    RequestDetails, RequestType, SagaConfig,
};

/// Process business applications through the durable saga pipeline
#[derive(Parser)]
#[command(name = "appsaga")]
#[command(about = "Durable multi-step saga executor for business applications", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one application end to end against simulated collaborators
    Run {
        /// Application identifier
        #[arg(long, default_value = "app-001")]
        application_id: String,

        /// Applicant first name
        #[arg(long, default_value = "Ada")]
        first_name: String,

        /// Applicant last name
        #[arg(long, default_value = "Lovelace")]
        last_name: String,

        /// Applicant email address
        #[arg(long, default_value = "ada@example.com")]
        email: String,

        /// Application kind, doubles as the document template type
        #[arg(long, value_enum, default_value_t = RequestType::Loan)]
        kind: RequestType,

        /// Amount to charge, in minor units
        #[arg(long, default_value = "50000")]
        amount: u64,

        /// Simulated payment gateway success rate (0.0 to 1.0)
        #[arg(long, default_value = "0.95")]
        payment_success_rate: f64,

        /// Simulated document generator success rate (0.0 to 1.0)
        #[arg(long, default_value = "0.95")]
        document_success_rate: f64,

        /// Simulated collaborator processing delay in milliseconds
        #[arg(long, default_value = "500")]
        service_delay_ms: u64,

        /// Directory for run progress checkpoints
        #[arg(long, default_value = ".appsaga/progress")]
        progress_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            application_id,
            first_name,
            last_name,
            email,
            kind,
            amount,
            payment_success_rate,
            document_success_rate,
            service_delay_ms,
            progress_dir,
        } => {
            anyhow::ensure!(amount > 0, "amount must be positive");
            let delay = Duration::from_millis(service_delay_ms);
            let config = SagaConfig::default();

            let store = Arc::new(MemoryApplicationStore::new());
            let activities = Arc::new(Activities::new(
                store.clone(),
                Arc::new(SimulatedGateway::new(payment_success_rate, delay)),
                Arc::new(SimulatedDocumentService::new(document_success_rate, delay)),
                Arc::new(LoggingEmailSender::new(delay / 4)),
                config.activity_timeout,
            ));
            let progress = Arc::new(JsonProgressStore::new(progress_dir));
            let registry = RunRegistry::new(store.clone(), activities, progress, config.clone());

            let record = ApplicationRecord::new(
                application_id.clone(),
                Profile {
                    first_name,
                    last_name,
                    email,
                },
                RequestDetails {
                    kind,
                    amount,
                    required_documents: vec!["identity".into(), "proof-of-income".into()],
                },
            );
            store.create(record).await?;

            let submission = registry.submit_for_processing(&application_id).await?;
            info!(application_id = %application_id, run_id = %submission.run_id, "submitted");

            let status = loop {
                let status = registry.get_run_status(&application_id).await?;
                if status.status.is_terminal() {
                    break status;
                }
                tokio::time::sleep(config.poll_interval).await;
            };

            println!(
                "application {application_id}: {} (updated {})",
                status.status, status.updated_at
            );
            if status.status == ApplicationStatus::Failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "appsaga=info",
        1 => "appsaga=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
