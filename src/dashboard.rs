// 📊 Aggregation Engine
//
// Totals for the dashboard, computed over the full loan set. Sums are 0 (never
// absent) when nothing matches.

use crate::error::Result;
use crate::loan::{Loan, LoanStatus};
use crate::store::LoanStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_loans: u64,
    pub total_loan_amount: f64,
    pub total_tokenized: u64,
    pub total_tokenized_amount: f64,
    pub active_loans: u64,
    pub expired_loans: u64,
}

impl DashboardStats {
    /// Single pass over an in-memory loan set
    pub fn from_loans<'a, I>(loans: I) -> Self
    where
        I: IntoIterator<Item = &'a Loan>,
    {
        loans.into_iter().fold(Self::default(), |mut stats, loan| {
            stats.total_loans += 1;
            stats.total_loan_amount += loan.amount;
            if loan.tokenized {
                stats.total_tokenized += 1;
                stats.total_tokenized_amount += loan.amount;
            }
            match loan.status {
                LoanStatus::Active => stats.active_loans += 1,
                LoanStatus::Expired => stats.expired_loans += 1,
            }
            stats
        })
    }

    /// Fraction of loans tokenized, 0.0 for an empty store
    pub fn tokenized_share(&self) -> f64 {
        if self.total_loans == 0 {
            0.0
        } else {
            self.total_tokenized as f64 / self.total_loans as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Loans: {} ({} active, {} expired), Amount: {:.2}, Tokenized: {} ({:.1}%), Tokenized amount: {:.2}",
            self.total_loans,
            self.active_loans,
            self.expired_loans,
            self.total_loan_amount,
            self.total_tokenized,
            self.tokenized_share() * 100.0,
            self.total_tokenized_amount,
        )
    }
}

/// Dashboard numbers from the store's current snapshot
pub fn dashboard(store: &dyn LoanStore) -> Result<DashboardStats> {
    store.statistics()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLoanStore;
    use chrono::Utc;

    fn loan(id: &str, amount: f64, tokenized: bool, status: LoanStatus) -> Loan {
        let now = Utc::now();
        Loan {
            id: id.to_string(),
            status,
            amount,
            payment_schedule: "monthly".to_string(),
            interest_rate: 5.0,
            ltv: None,
            risk_group: "A".to_string(),
            agreement_url: String::new(),
            tokenized,
            created_at: now,
            updated_at: now,
        }
    }

    fn fixture() -> Vec<Loan> {
        vec![
            loan("L1", 100.0, false, LoanStatus::Active),
            loan("L2", 200.0, true, LoanStatus::Active),
            loan("L3", 50.0, false, LoanStatus::Expired),
        ]
    }

    #[test]
    fn test_empty_store_is_all_zero() {
        let store = MemoryLoanStore::new();
        let stats = dashboard(&store).unwrap();

        assert_eq!(stats, DashboardStats::default());
        assert_eq!(stats.tokenized_share(), 0.0);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["totalLoanAmount"], 0.0);
        assert_eq!(json["totalTokenizedAmount"], 0.0);
    }

    #[test]
    fn test_mixed_loans() {
        let store = MemoryLoanStore::with_loans(fixture());
        let stats = dashboard(&store).unwrap();

        assert_eq!(stats.total_loans, 3);
        assert_eq!(stats.total_loan_amount, 350.0);
        assert_eq!(stats.total_tokenized, 1);
        assert_eq!(stats.total_tokenized_amount, 200.0);
        assert_eq!(stats.active_loans, 2);
        assert_eq!(stats.expired_loans, 1);
    }

    #[test]
    fn test_from_loans_matches_store() {
        let loans = fixture();
        let store = MemoryLoanStore::with_loans(loans.clone());
        assert_eq!(DashboardStats::from_loans(&loans), dashboard(&store).unwrap());
    }

    #[test]
    fn test_json_field_names() {
        let stats = DashboardStats::from_loans(&fixture());
        let json = serde_json::to_value(stats).unwrap();

        for key in [
            "totalLoans",
            "totalLoanAmount",
            "totalTokenized",
            "totalTokenizedAmount",
            "activeLoans",
            "expiredLoans",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["totalLoans"], 3);
    }

    #[test]
    fn test_tokenized_share() {
        let stats = DashboardStats::from_loans(&fixture());
        assert!((stats.tokenized_share() - 1.0 / 3.0).abs() < 1e-9);
        assert!(stats.summary().contains("33.3%"));
    }
}
