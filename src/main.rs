use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use credit_platform::tokenize::DEFAULT_EXPIRY_LIMIT;
use credit_platform::{
    dashboard, expire_loans, import_csv, open_database, tokenize_batch, Config, ExpiryPolicy,
    LoanFilter, LoanStatus, LoanStore, ProfileStore, SqliteLoanStore, SqliteProfileStore,
    TokenizeOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "credit-platform", version, about = "Loan records: import, tokenize, report")]
struct Cli {
    /// SQLite database (defaults to CREDIT_DB_PATH or credit_platform.db)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import loans from a CSV file
    Import { csv: PathBuf },
    /// List loans, newest first
    Loans {
        /// ACTIVE or EXPIRED
        #[arg(long)]
        status: Option<LoanStatus>,
        /// Only tokenized loans
        #[arg(long)]
        tokenized: bool,
    },
    /// List credit institution profiles
    Profiles,
    /// Tokenize one or more loans
    Tokenize {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print dashboard statistics
    Stats,
    /// Move ACTIVE loans to EXPIRED
    Expire {
        /// Exactly these loans
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["every_nth", "rate"])]
        ids: Vec<String>,
        /// Every n-th active loan
        #[arg(long, conflicts_with = "rate")]
        every_nth: Option<usize>,
        /// Random share of active loans (0.0 - 1.0)
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Active loans considered per run
        #[arg(long, default_value_t = DEFAULT_EXPIRY_LIMIT)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let conn = open_database(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path))?;
    let conn = Arc::new(Mutex::new(conn));
    let loans = SqliteLoanStore::new(Arc::clone(&conn)).with_chunk_size(config.import_chunk_size);

    match cli.command {
        Command::Import { csv } => run_import(&loans, &csv),
        Command::Loans { status, tokenized } => run_list(&loans, status, tokenized),
        Command::Profiles => run_profiles(&SqliteProfileStore::new(conn)),
        Command::Tokenize { ids } => run_tokenize(&loans, &ids),
        Command::Stats => run_stats(&loans),
        Command::Expire {
            ids,
            every_nth,
            rate,
            seed,
            limit,
        } => {
            let policy = match (every_nth, rate) {
                (Some(n), _) => ExpiryPolicy::EveryNth(n),
                (None, Some(rate)) => {
                    if !(0.0..=1.0).contains(&rate) {
                        bail!("--rate must be between 0 and 1");
                    }
                    ExpiryPolicy::Sampled { rate, seed }
                }
                (None, None) if !ids.is_empty() => ExpiryPolicy::Explicit(ids.into_iter().collect()),
                (None, None) => ExpiryPolicy::demo(seed),
            };
            run_expire(&loans, &policy, limit)
        }
    }
}

fn run_import(store: &dyn LoanStore, csv_path: &Path) -> Result<()> {
    println!("📂 Loading CSV {:?}...", csv_path);
    let data = std::fs::read(csv_path).with_context(|| format!("failed to read {:?}", csv_path))?;

    let summary = import_csv(store, &data)?;
    println!("✓ Imported {} loans", summary.count);
    println!("  sha256 {}", summary.digest);

    let total = store.count_where(LoanFilter::All)?;
    println!("✓ Database contains {} loans", total);
    Ok(())
}

fn run_list(store: &dyn LoanStore, status: Option<LoanStatus>, tokenized: bool) -> Result<()> {
    let loans = store.find_all()?;
    let shown: Vec<_> = loans
        .iter()
        .filter(|l| status.map_or(true, |s| l.status == s))
        .filter(|l| !tokenized || l.tokenized)
        .collect();

    for loan in &shown {
        println!(
            "{:<12} {:<8} {:>14.2} {:>6.2}% {:<10} {}",
            loan.id,
            loan.status.as_str(),
            loan.amount,
            loan.interest_rate,
            loan.payment_schedule,
            if loan.tokenized { "🔗 tokenized" } else { "" }
        );
    }
    println!("{} of {} loans", shown.len(), loans.len());
    Ok(())
}

fn run_profiles(store: &dyn ProfileStore) -> Result<()> {
    let profiles = store.find_all()?;
    for p in &profiles {
        println!(
            "{}  {} ({}, {}) {} score {:.1}",
            p.id, p.name, p.country, p.founding_year, p.product_type, p.credit_risk_score
        );
    }
    println!("{} profiles", profiles.len());
    Ok(())
}

fn run_tokenize(store: &dyn LoanStore, ids: &[String]) -> Result<()> {
    let report = tokenize_batch(store, ids)?;

    for outcome in &report.outcomes {
        match outcome {
            TokenizeOutcome::Tokenized { loan } => println!("✓ {} tokenized", loan.id),
            TokenizeOutcome::Rejected { message, .. } => println!("✗ {}", message),
        }
    }

    if !report.all_succeeded() {
        bail!(
            "{} of {} loans could not be tokenized",
            report.outcomes.len() - report.tokenized().len(),
            report.outcomes.len()
        );
    }
    Ok(())
}

fn run_stats(store: &dyn LoanStore) -> Result<()> {
    let stats = dashboard(store)?;
    println!("📊 {}", stats.summary());
    Ok(())
}

fn run_expire(store: &dyn LoanStore, policy: &ExpiryPolicy, limit: usize) -> Result<()> {
    let expired = expire_loans(store, policy, limit)?;
    for loan in &expired {
        println!("⏳ {} expired", loan.id);
    }
    println!("{} loans expired", expired.len());
    Ok(())
}
