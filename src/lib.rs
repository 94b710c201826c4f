// Credit Platform - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod dashboard;
pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod loan;
pub mod parser;
pub mod store;
pub mod tokenize;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use dashboard::{dashboard, DashboardStats};
pub use db::{get_events_for_entity, insert_event, open_database, setup_database, Event};
pub use entities::{NewProfile, ProductType, Profile, ProfileRegistry, ProfileStore, SqliteProfileStore};
pub use error::{ErrorKind, PlatformError, Result};
pub use import::{import_csv, ImportSummary};
pub use loan::{Loan, LoanStatus, NewLoan, TokenState};
pub use parser::{load_csv, normalize_csv, normalize_row, parse_rows, CsvRow, PARSER_VERSION};
pub use store::{LoanFilter, LoanStore, MemoryLoanStore, SqliteLoanStore};
pub use tokenize::{
    expire_loans, plan_expiry, tokenize, tokenize_batch, ExpiryPolicy, TokenizeOutcome,
    TokenizeReport, TokenizeRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
