use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{LedgerError, LedgerService};
use crate::domain::{Currency, RecordKind, TransactionRecord, TransferRequest, format_amount, parse_amount};
use crate::io::Exporter;

/// Unita - community currency ledger
#[derive(Parser)]
#[command(name = "unita")]
#[command(about = "A wallet-to-wallet value ledger for community currencies")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "unita.db")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Owner management commands
    #[command(subcommand)]
    Owner(OwnerCommands),

    /// Transfer value between two owners
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Authenticated caller identity (normally supplied by the
        /// boundary layer, never by the request body)
        #[arg(long)]
        sender: String,

        /// Recipient owner id
        #[arg(long)]
        to: String,

        /// Currency code: UNITS or MERITOS
        #[arg(short, long, default_value = "UNITS")]
        currency: String,

        /// Description stored on the transaction record
        #[arg(short = 'm', long)]
        description: Option<String>,

        /// Opaque JSON metadata stored verbatim
        #[arg(long)]
        metadata: Option<String>,

        /// Idempotency key; retrying with the same key applies at most once
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Issue value into an owner's account (system grants, top-ups)
    Issue {
        /// Amount to issue (e.g., "50.00" or "50")
        amount: String,

        /// Recipient owner id
        #[arg(long)]
        to: String,

        /// Currency code: UNITS or MERITOS
        #[arg(short, long, default_value = "UNITS")]
        currency: String,

        /// Description stored on the transaction record
        #[arg(short = 'm', long)]
        description: Option<String>,
    },

    /// Show balances for an owner
    Balance {
        /// Owner id
        owner: String,

        /// Currency code (omit for all currencies)
        #[arg(short, long)]
        currency: Option<String>,
    },

    /// Show the transaction history an owner participated in
    History {
        /// Owner id
        owner: String,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify ledger integrity
    Check,

    /// Export the transaction log to CSV or JSON
    Export {
        /// Restrict to records involving this owner
        #[arg(long)]
        owner: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum OwnerCommands {
    /// Register a new owner
    Create {
        /// Owner id (must be unique)
        id: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List registered owners
    List,
}

/// Install the tracing subscriber. Filter via RUST_LOG; warnings and
/// errors by default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Map a ledger outcome to the process exit code the boundary contract
/// expects: 0 success, 2 caller error (4xx), 3 retryable (5xx).
fn exit_with(err: LedgerError) -> ! {
    let status = err.status_code();
    eprintln!("error ({}): {}", status, err);
    if err.is_retryable() {
        eprintln!("the request may be retried with the same idempotency key");
        std::process::exit(3);
    }
    std::process::exit(2);
}

fn parse_cli_amount(input: &str) -> i64 {
    match parse_amount(input) {
        Ok(amount) => amount,
        Err(err) => {
            eprintln!("error (400): invalid amount '{}': {}", input, err);
            std::process::exit(2);
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Owner(owner_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_owner_command(&service, owner_cmd).await?;
            }

            Commands::Transfer {
                amount,
                sender,
                to,
                currency,
                description,
                metadata,
                idempotency_key,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let amount = parse_cli_amount(&amount);

                let metadata = match metadata {
                    Some(raw) => match serde_json::from_str(&raw) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            eprintln!("error (400): invalid metadata JSON: {}", err);
                            std::process::exit(2);
                        }
                    },
                    None => None,
                };

                let mut request = TransferRequest::new(sender, to, amount, currency);
                if let Some(description) = description {
                    request = request.with_description(description);
                }
                if let Some(metadata) = metadata {
                    request = request.with_metadata(metadata);
                }
                if let Some(key) = idempotency_key {
                    request = request.with_idempotency_key(key);
                }

                match service.transfer(request).await {
                    Ok(record) => {
                        println!(
                            "Transferred {} {} from {} to {} ({})",
                            format_amount(record.amount),
                            record.currency,
                            record.from_owner,
                            record.to_owner,
                            record.id
                        );
                    }
                    Err(err) => exit_with(err),
                }
            }

            Commands::Issue {
                amount,
                to,
                currency,
                description,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let amount = parse_cli_amount(&amount);

                match service.issue(&to, amount, &currency, description, None).await {
                    Ok(record) => {
                        println!(
                            "Issued {} {} to {} ({})",
                            format_amount(record.amount),
                            record.currency,
                            record.to_owner,
                            record.id
                        );
                    }
                    Err(err) => exit_with(err),
                }
            }

            Commands::Balance { owner, currency } => {
                let service = LedgerService::connect(&self.database).await?;
                match currency {
                    Some(code) => {
                        let Some(currency) = Currency::parse(&code) else {
                            exit_with(LedgerError::InvalidCurrency(code));
                        };
                        match service.balance(&owner, currency).await {
                            Ok(balance) => {
                                println!("{}  {} {}", owner, format_amount(balance), currency);
                            }
                            Err(err) => exit_with(err),
                        }
                    }
                    None => match service.balances(&owner).await {
                        Ok(balances) => {
                            for (currency, balance) in balances {
                                println!("{}  {} {}", owner, format_amount(balance), currency);
                            }
                        }
                        Err(err) => exit_with(err),
                    },
                }
            }

            Commands::History { owner, limit } => {
                let service = LedgerService::connect(&self.database).await?;
                match service.history(&owner, limit).await {
                    Ok(records) => print_history(&owner, &records),
                    Err(err) => exit_with(err),
                }
            }

            Commands::Check => {
                let service = LedgerService::connect(&self.database).await?;
                let report = service.check_integrity().await?;

                println!(
                    "{} owners, {} accounts, {} records",
                    report.owner_count, report.account_count, report.record_count
                );
                if report.is_clean() {
                    println!("Ledger integrity: OK");
                } else {
                    println!("Ledger integrity: FAILED");
                    for (owner, currency, balance) in &report.negative_balances {
                        println!(
                            "  negative balance: {} {} {}",
                            owner,
                            format_amount(*balance),
                            currency
                        );
                    }
                    for mismatch in &report.balance_mismatches {
                        println!(
                            "  balance mismatch: {} {} stored {} vs log {}",
                            mismatch.owner_id,
                            mismatch.currency,
                            format_amount(mismatch.stored),
                            format_amount(mismatch.replayed)
                        );
                    }
                    if report.invalid_amounts > 0 {
                        println!("  records with invalid amounts: {}", report.invalid_amounts);
                    }
                    if report.unknown_owner_refs > 0 {
                        println!("  records with unknown owners: {}", report.unknown_owner_refs);
                    }
                    if report.has_sequence_gaps {
                        println!("  sequence gaps detected");
                    }
                    std::process::exit(1);
                }
            }

            Commands::Export {
                owner,
                output,
                format,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let exporter = Exporter::new(&service);

                let mut sink: Box<dyn std::io::Write> = match &output {
                    Some(path) => Box::new(
                        std::fs::File::create(path)
                            .with_context(|| format!("Failed to create {}", path))?,
                    ),
                    None => Box::new(std::io::stdout()),
                };

                match format.as_str() {
                    "csv" => {
                        let count = exporter
                            .export_records_csv(&mut sink, owner.as_deref())
                            .await?;
                        eprintln!("Exported {} records", count);
                    }
                    "json" => {
                        let snapshot = exporter
                            .export_records_json(&mut sink, owner.as_deref())
                            .await?;
                        eprintln!("Exported {} records", snapshot.records.len());
                    }
                    other => {
                        eprintln!("error (400): unknown export format '{}'", other);
                        std::process::exit(2);
                    }
                }
            }
        }

        Ok(())
    }
}

async fn run_owner_command(service: &LedgerService, command: OwnerCommands) -> Result<()> {
    match command {
        OwnerCommands::Create { id, name } => {
            match service.register_owner(&id, name).await {
                Ok(owner) => println!("Registered owner: {}", owner.id),
                Err(err) => exit_with(err),
            }
        }
        OwnerCommands::List => {
            let owners = service.list_owners().await?;
            for owner in owners {
                match owner.display_name {
                    Some(name) => println!("{}  ({})", owner.id, name),
                    None => println!("{}", owner.id),
                }
            }
        }
    }
    Ok(())
}

fn print_history(owner: &str, records: &[TransactionRecord]) {
    for record in records {
        let line = match record.kind {
            RecordKind::Issue => format!(
                "+{} {} issued",
                format_amount(record.amount),
                record.currency
            ),
            RecordKind::Transfer if record.from_owner == owner => format!(
                "-{} {} to {}",
                format_amount(record.amount),
                record.currency,
                record.to_owner
            ),
            RecordKind::Transfer => format!(
                "+{} {} from {}",
                format_amount(record.amount),
                record.currency,
                record.from_owner
            ),
        };

        println!(
            "{}  {}  {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            line,
            record.description.as_deref().unwrap_or(""),
            record.id
        );
    }
}
