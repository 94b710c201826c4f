// 🪙 Tokenization State Machine
//
// UntokenizedActive --tokenize--> Tokenized       (the only request-driven move)
// UntokenizedActive --expire----> UntokenizedExpired
//
// Tokenized is terminal. Preconditions are checked in order: exists, not yet
// tokenized, ACTIVE. The store's compare-and-set makes the final check and the
// write a single step, so two racing requests cannot both succeed.

use crate::error::{ErrorKind, PlatformError, Result};
use crate::loan::{Loan, TokenState};
use crate::store::LoanStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Bounded sample size for one expiry run
pub const DEFAULT_EXPIRY_LIMIT: usize = 10;

// ============================================================================
// TRANSITION RULES
// ============================================================================

/// Why `loan` may not be tokenized right now, if anything
pub fn check_transition(loan: &Loan) -> Result<()> {
    match loan.token_state() {
        TokenState::UntokenizedActive => Ok(()),
        TokenState::Tokenized => Err(PlatformError::AlreadyTokenized {
            id: loan.id.clone(),
        }),
        TokenState::UntokenizedExpired => Err(PlatformError::NotActive {
            id: loan.id.clone(),
            status: loan.status,
        }),
    }
}

/// Tokenize one loan
pub fn tokenize(store: &dyn LoanStore, id: &str) -> Result<Loan> {
    let loan = store.find_by_id(id)?;
    check_transition(&loan)?;

    match store.mark_tokenized(id)? {
        Some(tokenized) => {
            info!(loan_id = id, amount = tokenized.amount, "loan tokenized");
            Ok(tokenized)
        }
        None => {
            // Lost a race between the read and the compare-and-set: report
            // whatever state the winner left behind
            let current = store.find_by_id(id)?;
            check_transition(&current)?;
            Err(PlatformError::InvalidTransition {
                id: id.to_string(),
                reason: "loan changed during tokenization",
            })
        }
    }
}

// ============================================================================
// BATCH REQUESTS
// ============================================================================

/// Body of a tokenize request: one identifier or several
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizeRequest {
    pub loan_id: Option<String>,
    pub loan_ids: Option<Vec<String>>,
}

impl TokenizeRequest {
    /// `loanIds` wins over `loanId`; blank identifiers are dropped
    pub fn identifiers(&self) -> Vec<String> {
        let raw: Vec<&String> = match (&self.loan_ids, &self.loan_id) {
            (Some(ids), _) => ids.iter().collect(),
            (None, Some(id)) => vec![id],
            (None, None) => vec![],
        };

        raw.into_iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Result for one identifier in a batch
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TokenizeOutcome {
    Tokenized {
        loan: Loan,
    },
    Rejected {
        #[serde(rename = "loanId")]
        loan_id: String,
        error: ErrorKind,
        message: String,
    },
}

impl TokenizeOutcome {
    pub fn loan_id(&self) -> &str {
        match self {
            TokenizeOutcome::Tokenized { loan } => &loan.id,
            TokenizeOutcome::Rejected { loan_id, .. } => loan_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TokenizeOutcome::Tokenized { .. })
    }
}

/// Per-identifier outcomes, in request order
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenizeReport {
    pub outcomes: Vec<TokenizeOutcome>,
}

impl TokenizeReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TokenizeOutcome::is_success)
    }

    pub fn tokenized(&self) -> Vec<&Loan> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TokenizeOutcome::Tokenized { loan } => Some(loan),
                TokenizeOutcome::Rejected { .. } => None,
            })
            .collect()
    }

    /// First rejected identifier and its reason
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.outcomes.iter().find_map(|o| match o {
            TokenizeOutcome::Rejected {
                loan_id, message, ..
            } => Some((loan_id.as_str(), message.as_str())),
            TokenizeOutcome::Tokenized { .. } => None,
        })
    }
}

/// Tokenize each identifier independently.
///
/// A rejected identifier never stops its siblings. Only storage failures abort
/// the batch (loans already flipped stay flipped).
pub fn tokenize_batch(store: &dyn LoanStore, ids: &[String]) -> Result<TokenizeReport> {
    let mut report = TokenizeReport::default();

    for id in ids {
        let outcome = match tokenize(store, id) {
            Ok(loan) => TokenizeOutcome::Tokenized { loan },
            Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
            Err(e) => {
                warn!(loan_id = %id, error = %e, "tokenize rejected");
                TokenizeOutcome::Rejected {
                    loan_id: id.clone(),
                    error: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        report.outcomes.push(outcome);
    }

    Ok(report)
}

// ============================================================================
// EXPIRY (simulation hook)
// ============================================================================

/// Which ACTIVE loans an expiry run moves to EXPIRED
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryPolicy {
    /// Exactly these identifiers (those still ACTIVE)
    Explicit(BTreeSet<String>),
    /// Every n-th loan of the sample; 0 selects nothing
    EveryNth(usize),
    /// Each sampled loan independently with probability `rate`, reproducible per seed
    Sampled { rate: f64, seed: u64 },
}

impl ExpiryPolicy {
    /// The demo behaviour: roughly one loan in ten
    pub fn demo(seed: u64) -> Self {
        ExpiryPolicy::Sampled { rate: 0.1, seed }
    }
}

/// Pick identifiers to expire. Pure: same input, same plan.
///
/// Only ACTIVE loans are eligible, and at most `limit` of them are considered,
/// in the order given.
pub fn plan_expiry(candidates: &[Loan], policy: &ExpiryPolicy, limit: usize) -> Vec<String> {
    let sample = candidates.iter().filter(|l| l.is_active());

    match policy {
        ExpiryPolicy::Explicit(ids) => sample
            .filter(|l| ids.contains(&l.id))
            .take(limit)
            .map(|l| l.id.clone())
            .collect(),
        ExpiryPolicy::EveryNth(0) => Vec::new(),
        ExpiryPolicy::EveryNth(n) => sample
            .take(limit)
            .enumerate()
            .filter(|(i, _)| (i + 1) % n == 0)
            .map(|(_, l)| l.id.clone())
            .collect(),
        ExpiryPolicy::Sampled { rate, seed } => {
            let mut rng = StdRng::seed_from_u64(*seed);
            sample
                .take(limit)
                .filter(|_| rng.gen::<f64>() < *rate)
                .map(|l| l.id.clone())
                .collect()
        }
    }
}

/// Apply an expiry plan. Returns the loans that actually moved.
pub fn expire_loans(
    store: &dyn LoanStore,
    policy: &ExpiryPolicy,
    limit: usize,
) -> Result<Vec<Loan>> {
    let candidates = store.find_all()?;
    let plan = plan_expiry(&candidates, policy, limit);

    let mut expired = Vec::with_capacity(plan.len());
    for id in &plan {
        if let Some(loan) = store.mark_expired(id)? {
            info!(loan_id = %id, "loan expired");
            expired.push(loan);
        }
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_database;
    use crate::loan::{LoanStatus, NewLoan};
    use crate::store::{MemoryLoanStore, SqliteLoanStore};
    use std::sync::{Arc, Barrier, Mutex};

    fn new_loan(id: &str, status: LoanStatus) -> NewLoan {
        NewLoan {
            id: id.to_string(),
            status,
            amount: 1000.0,
            payment_schedule: "monthly".to_string(),
            interest_rate: 4.0,
            ltv: Some(80.0),
            risk_group: "A".to_string(),
            agreement_url: String::new(),
        }
    }

    fn seeded() -> MemoryLoanStore {
        let store = MemoryLoanStore::new();
        store
            .insert_many(&[
                new_loan("ACT1", LoanStatus::Active),
                new_loan("ACT2", LoanStatus::Active),
                new_loan("EXP1", LoanStatus::Expired),
            ])
            .unwrap();
        store
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_active_loan() {
        let store = seeded();
        let loan = tokenize(&store, "ACT1").unwrap();

        assert!(loan.tokenized);
        assert_eq!(loan.status, LoanStatus::Active);
        assert!(store.find_by_id("ACT1").unwrap().tokenized);
    }

    #[test]
    fn test_tokenize_expired_is_conflict() {
        let store = seeded();
        let before = store.find_by_id("EXP1").unwrap();

        let err = tokenize(&store, "EXP1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("only ACTIVE loans can be tokenized"));
        assert_eq!(store.find_by_id("EXP1").unwrap(), before);
    }

    #[test]
    fn test_tokenize_twice_is_conflict() {
        let store = seeded();
        tokenize(&store, "ACT1").unwrap();
        let before = store.find_by_id("ACT1").unwrap();

        let err = tokenize(&store, "ACT1").unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyTokenized { .. }));
        assert_eq!(store.find_by_id("ACT1").unwrap(), before);
    }

    #[test]
    fn test_tokenize_missing_is_not_found() {
        let store = seeded();
        let err = tokenize(&store, "NOPE").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.subject(), Some("NOPE"));
    }

    #[test]
    fn test_already_tokenized_checked_before_status() {
        // Tokenized and later expired: report "already tokenized"
        let store = seeded();
        tokenize(&store, "ACT1").unwrap();
        store.mark_expired("ACT1").unwrap();

        let err = tokenize(&store, "ACT1").unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyTokenized { .. }));
    }

    #[test]
    fn test_batch_two_valid_ids() {
        let store = seeded();
        let report = tokenize_batch(&store, &ids(&["ACT1", "ACT2"])).unwrap();

        assert!(report.all_succeeded());
        assert_eq!(report.tokenized().len(), 2);
        assert!(store.find_by_id("ACT2").unwrap().tokenized);
    }

    #[test]
    fn test_batch_partial_success() {
        let store = seeded();
        let report = tokenize_batch(&store, &ids(&["ACT1", "EXP1", "GHOST", "ACT2"])).unwrap();

        assert!(!report.all_succeeded());
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.tokenized().len(), 2);
        assert_eq!(report.first_failure().map(|(id, _)| id), Some("EXP1"));

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.loan_id()).collect();
        assert_eq!(order, vec!["ACT1", "EXP1", "GHOST", "ACT2"]);

        match &report.outcomes[2] {
            TokenizeOutcome::Rejected { error, .. } => assert_eq!(*error, ErrorKind::NotFound),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(store.find_by_id("ACT2").unwrap().tokenized);
    }

    #[test]
    fn test_batch_same_id_twice() {
        let store = seeded();
        let report = tokenize_batch(&store, &ids(&["ACT1", "ACT1"])).unwrap();
        assert!(report.outcomes[0].is_success());
        assert!(!report.outcomes[1].is_success());
    }

    #[test]
    fn test_outcome_json() {
        let store = seeded();
        let report = tokenize_batch(&store, &ids(&["ACT1", "EXP1"])).unwrap();
        let json = serde_json::to_value(&report.outcomes).unwrap();

        assert_eq!(json[0]["outcome"], "tokenized");
        assert_eq!(json[0]["loan"]["tokenized"], true);
        assert_eq!(json[1]["outcome"], "rejected");
        assert_eq!(json[1]["loanId"], "EXP1");
        assert_eq!(json[1]["error"], "Conflict");
    }

    #[test]
    fn test_request_identifiers() {
        let single: TokenizeRequest = serde_json::from_str(r#"{"loanId": "L1"}"#).unwrap();
        assert_eq!(single.identifiers(), ids(&["L1"]));

        let many: TokenizeRequest =
            serde_json::from_str(r#"{"loanIds": ["L1", " ", "L2"], "loanId": "L9"}"#).unwrap();
        assert_eq!(many.identifiers(), ids(&["L1", "L2"]));

        let empty: TokenizeRequest = serde_json::from_str(r#"{"loanIds": []}"#).unwrap();
        assert!(empty.identifiers().is_empty());

        let none: TokenizeRequest = serde_json::from_str("{}").unwrap();
        assert!(none.identifiers().is_empty());
    }

    #[test]
    fn test_concurrent_tokenize_exactly_one_wins() {
        let conn = open_database(":memory:").unwrap();
        let store = Arc::new(SqliteLoanStore::new(Arc::new(Mutex::new(conn))));
        store
            .insert_many(&[new_loan("RACE", LoanStatus::Active)])
            .unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    tokenize(&*store, "RACE")
                })
            })
            .collect();

        let results: Vec<Result<Loan>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, PlatformError::AlreadyTokenized { .. }));
        }

        assert!(store.find_by_id("RACE").unwrap().tokenized);
        assert_eq!(store.events_for_loan("RACE").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_tokenize_memory_store() {
        let store = Arc::new(MemoryLoanStore::new());
        store
            .insert_many(&[new_loan("RACE", LoanStatus::Active)])
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    tokenize(&*store, "RACE").is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    // ------------------------------------------------------------------------
    // expiry
    // ------------------------------------------------------------------------

    fn active_batch(n: usize) -> MemoryLoanStore {
        let store = MemoryLoanStore::new();
        let batch: Vec<NewLoan> = (0..n)
            .map(|i| new_loan(&format!("L{:02}", i), LoanStatus::Active))
            .collect();
        store.insert_many(&batch).unwrap();
        store
    }

    #[test]
    fn test_plan_explicit_skips_non_active() {
        let store = seeded();
        let loans = store.find_all().unwrap();
        let policy = ExpiryPolicy::Explicit(ids(&["ACT2", "EXP1", "GHOST"]).into_iter().collect());

        assert_eq!(plan_expiry(&loans, &policy, DEFAULT_EXPIRY_LIMIT), ids(&["ACT2"]));
    }

    #[test]
    fn test_plan_every_nth_respects_limit() {
        let loans = active_batch(20).find_all().unwrap();

        let plan = plan_expiry(&loans, &ExpiryPolicy::EveryNth(3), 10);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], loans[2].id);

        assert!(plan_expiry(&loans, &ExpiryPolicy::EveryNth(0), 10).is_empty());
        assert_eq!(plan_expiry(&loans, &ExpiryPolicy::EveryNth(1), 10).len(), 10);
    }

    #[test]
    fn test_plan_sampled_is_reproducible() {
        let loans = active_batch(50).find_all().unwrap();
        let policy = ExpiryPolicy::Sampled { rate: 0.5, seed: 42 };

        let first = plan_expiry(&loans, &policy, 50);
        let second = plan_expiry(&loans, &policy, 50);
        assert_eq!(first, second);

        assert!(plan_expiry(&loans, &ExpiryPolicy::Sampled { rate: 0.0, seed: 1 }, 50).is_empty());
        assert_eq!(
            plan_expiry(&loans, &ExpiryPolicy::Sampled { rate: 1.0, seed: 1 }, 50).len(),
            50
        );
    }

    #[test]
    fn test_expire_loans_applies_plan() {
        let store = seeded();
        let policy = ExpiryPolicy::Explicit(ids(&["ACT1"]).into_iter().collect());

        let expired = expire_loans(&store, &policy, DEFAULT_EXPIRY_LIMIT).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, LoanStatus::Expired);

        // An expired loan can no longer be tokenized
        let err = tokenize(&store, "ACT1").unwrap_err();
        assert!(matches!(err, PlatformError::NotActive { .. }));
    }

    #[test]
    fn test_expire_keeps_tokenized_flag() {
        let store = seeded();
        tokenize(&store, "ACT1").unwrap();

        let policy = ExpiryPolicy::Explicit(ids(&["ACT1"]).into_iter().collect());
        let expired = expire_loans(&store, &policy, DEFAULT_EXPIRY_LIMIT).unwrap();

        assert_eq!(expired.len(), 1);
        assert!(expired[0].tokenized);
    }
}
