use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use requisition_approval::config::{StoreBackend, WorkflowConfig};
use requisition_approval::{
    Amount, ApprovalStatus, Command, CommandGateway, RequisitionDraft, RequisitionId, telemetry,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "reqflow")]
#[command(about = "Create, review and approve purchase requisitions")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./reqflow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the sled database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Use a throwaway in-memory store
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a requisition
    Create {
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        currency: String,
        #[arg(long)]
        vendor: String,
    },
    /// Edit a non-terminal requisition's details
    Update {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        amount: Option<Amount>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Approve a requisition
    Approve { id: String },
    /// Flag every pending requisition at or above a threshold for review
    BulkReview {
        #[arg(long)]
        threshold: Amount,
    },
    /// Look up a vendor's risk, rejecting its requisitions when it is high
    Risk {
        vendor: String,
        /// Only consider this requisition
        #[arg(long)]
        requisition: Option<String>,
        /// Fail instead of degrading when the scorer does not answer
        #[arg(long)]
        require_fresh: bool,
    },
    /// Reject a requisition on risk grounds
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Show one requisition
    Show { id: String },
    /// List requisitions, optionally by status
    List {
        #[arg(long)]
        status: Option<ApprovalStatus>,
    },
    /// Show the audit trail of a requisition
    History { id: String },
    /// Report store and configuration state
    Diagnostics,
    /// Read JSON commands from stdin, one per line, and answer each on stdout
    Exec,
}

impl Commands {
    fn into_command(self) -> Option<Command> {
        let command = match self {
            Commands::Create {
                description,
                amount,
                currency,
                vendor,
            } => Command::CreateRequisition(
                RequisitionDraft::new()
                    .set_description(description)
                    .set_amount(amount)
                    .set_currency(currency)
                    .set_vendor(vendor),
            ),
            Commands::Update {
                id,
                description,
                amount,
                currency,
                vendor,
            } => Command::UpdateRequisition {
                id: RequisitionId::from(id),
                changes: RequisitionDraft {
                    description,
                    amount,
                    currency,
                    vendor_id: vendor,
                },
            },
            Commands::Approve { id } => Command::Approve { id: id.into() },
            Commands::BulkReview { threshold } => Command::BulkReview {
                threshold_amount: threshold,
            },
            Commands::Risk {
                vendor,
                requisition,
                require_fresh,
            } => Command::FetchVendorRisk {
                vendor_id: vendor,
                requisition_id: requisition.map(RequisitionId::from),
                require_fresh,
            },
            Commands::Reject { id, reason } => Command::RiskReject {
                id: id.into(),
                reason,
            },
            Commands::Show { id } => Command::GetRequisition { id: id.into() },
            Commands::List { status } => Command::ListRequisitions { status },
            Commands::History { id } => Command::History { id: id.into() },
            Commands::Diagnostics => Command::Diagnostics,
            Commands::Exec => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("reqflow: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loaded_env = WorkflowConfig::load_env_file()?;
    let mut config = WorkflowConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    if cli.memory {
        config.store.backend = StoreBackend::Memory;
    }

    telemetry::init(&config.logging)?;
    if loaded_env {
        debug!("loaded environment from .env");
    }
    info!(backend = ?config.store.backend, "starting reqflow");

    let store = config.open_store()?;
    let gateway = config.gateway(store.clone());

    let code = match cli.command.into_command() {
        Some(command) => run_one(&gateway, command).await?,
        None => run_lines(&gateway).await?,
    };

    store.flush().context("failed to flush store")?;
    Ok(code)
}

async fn run_one(gateway: &CommandGateway, command: Command) -> Result<ExitCode> {
    let outcome = gateway.dispatch(command).await;
    let mut stdout = std::io::stdout().lock();
    let code = match outcome {
        Ok(response) => {
            serde_json::to_writer_pretty(&mut stdout, &response)?;
            ExitCode::SUCCESS
        }
        Err(e) => {
            serde_json::to_writer_pretty(&mut stdout, &e.to_envelope())?;
            ExitCode::FAILURE
        }
    };
    writeln!(stdout)?;
    Ok(code)
}

async fn run_lines(gateway: &CommandGateway) -> Result<ExitCode> {
    for line in std::io::stdin().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = gateway.dispatch_json(&line).await;
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, &response)?;
        writeln!(stdout)?;
    }
    Ok(ExitCode::SUCCESS)
}
