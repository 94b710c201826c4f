// 📥 CSV import pipeline
//
// upload bytes -> normalizer -> store.insert_many (one transaction)

use crate::error::Result;
use crate::parser::{normalize_csv, PARSER_VERSION};
use crate::store::LoanStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Loans stored
    pub count: usize,
    /// SHA-256 of the uploaded payload, hex
    #[serde(skip)]
    pub digest: String,
}

pub fn payload_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Normalize an uploaded CSV and store every row, or nothing
pub fn import_csv(store: &dyn LoanStore, data: &[u8]) -> Result<ImportSummary> {
    let digest = payload_digest(data);
    let loans = normalize_csv(data)?;
    let count = store.insert_many(&loans)?;

    info!(
        count,
        digest = %digest,
        parser = PARSER_VERSION,
        "CSV import complete"
    );

    Ok(ImportSummary { count, digest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_database;
    use crate::error::ErrorKind;
    use crate::loan::LoanStatus;
    use crate::store::{LoanFilter, MemoryLoanStore, SqliteLoanStore};
    use std::sync::{Arc, Mutex};

    const SHEET: &str = "\
loan_id,status,amount,payment_schedule,interest_rate,ltv,risk_group,agreement_url
LOAN001,ACTIVE,25000,monthly,4.5,72.5,A,https://example.com/agreements/loan1
LOAN002,expired,,quarterly,3.2,,B,https://example.com/agreements/loan2

LOAN003,ACTIVE,12000.75,annually,5.1,,C,https://example.com/agreements/loan3
";

    #[test]
    fn test_import_into_sqlite() {
        let conn = open_database(":memory:").unwrap();
        let store = SqliteLoanStore::new(Arc::new(Mutex::new(conn)));

        let summary = import_csv(&store, SHEET.as_bytes()).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.digest.len(), 64);

        let loan2 = store.find_by_id("LOAN002").unwrap();
        assert_eq!(loan2.status, LoanStatus::Expired);
        assert_eq!(loan2.amount, 0.0);
        assert_eq!(loan2.ltv, None);
        assert!(!loan2.tokenized);

        assert_eq!(
            store.sum_amount_where(LoanFilter::All).unwrap(),
            25000.0 + 12000.75
        );
    }

    #[test]
    fn test_reimport_is_rejected_whole() {
        let store = MemoryLoanStore::new();
        import_csv(&store, SHEET.as_bytes()).unwrap();

        let err = import_csv(&store, SHEET.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.count_where(LoanFilter::All).unwrap(), 3);
    }

    #[test]
    fn test_unreadable_payload() {
        let store = MemoryLoanStore::new();
        let err = import_csv(&store, b"loan_id\n\xff\xfe\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(store.count_where(LoanFilter::All).unwrap(), 0);
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(payload_digest(b"abc"), payload_digest(b"abc"));
        assert_ne!(payload_digest(b"abc"), payload_digest(b"abd"));
    }
}
