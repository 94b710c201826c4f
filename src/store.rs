// 📦 Loan Record Store
//
// The store exclusively owns loans. Readers get value copies; the only ways to
// change a loan are `update` and the two compare-and-set transitions
// (`mark_tokenized`, `mark_expired`), which check their precondition and write
// in one step so concurrent callers cannot both win.

use crate::dashboard::DashboardStats;
use crate::db::{decode_time, encode_time, insert_event, Event};
use crate::error::{PlatformError, Result};
use crate::loan::{Loan, LoanStatus, NewLoan};
use chrono::Utc;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Rows per multi-row INSERT statement
pub const DEFAULT_CHUNK_SIZE: usize = 100;

// Keeps one statement under SQLite's bound-parameter limit
const MAX_CHUNK_SIZE: usize = 2_000;

// ============================================================================
// FILTER
// ============================================================================

/// Predicate for counting and summing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanFilter {
    All,
    Status(LoanStatus),
    Tokenized(bool),
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        match self {
            LoanFilter::All => true,
            LoanFilter::Status(status) => loan.status == *status,
            LoanFilter::Tokenized(tokenized) => loan.tokenized == *tokenized,
        }
    }

    fn where_clause(&self) -> (&'static str, Vec<Value>) {
        match self {
            LoanFilter::All => ("1 = 1", vec![]),
            LoanFilter::Status(status) => {
                ("status = ?1", vec![Value::Text(status.as_str().to_string())])
            }
            LoanFilter::Tokenized(tokenized) => {
                ("tokenized = ?1", vec![Value::Integer(*tokenized as i64)])
            }
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait LoanStore: Send + Sync {
    /// Persist a batch. Either every loan is stored or none is.
    fn insert_many(&self, loans: &[NewLoan]) -> Result<usize>;

    /// All loans, newest first
    fn find_all(&self) -> Result<Vec<Loan>>;

    fn find_by_id(&self, id: &str) -> Result<Loan>;

    /// Persist changes to an existing loan. Refreshes `updated_at`.
    fn update(&self, loan: &Loan) -> Result<Loan>;

    fn count_where(&self, filter: LoanFilter) -> Result<u64>;

    /// Sum of `amount`, 0 when nothing matches
    fn sum_amount_where(&self, filter: LoanFilter) -> Result<f64>;

    /// Flip `tokenized` to true only if the loan is still ACTIVE and untokenized.
    /// `None` when the loan is missing or the precondition no longer holds.
    fn mark_tokenized(&self, id: &str) -> Result<Option<Loan>>;

    /// Move an ACTIVE loan to EXPIRED. `None` when missing or not ACTIVE.
    fn mark_expired(&self, id: &str) -> Result<Option<Loan>>;

    /// Dashboard numbers. Backends override this to read one consistent snapshot.
    fn statistics(&self) -> Result<DashboardStats> {
        Ok(DashboardStats {
            total_loans: self.count_where(LoanFilter::All)?,
            total_loan_amount: self.sum_amount_where(LoanFilter::All)?,
            total_tokenized: self.count_where(LoanFilter::Tokenized(true))?,
            total_tokenized_amount: self.sum_amount_where(LoanFilter::Tokenized(true))?,
            active_loans: self.count_where(LoanFilter::Status(LoanStatus::Active))?,
            expired_loans: self.count_where(LoanFilter::Status(LoanStatus::Expired))?,
        })
    }
}

/// Rules shared by every backend's `update`
pub fn check_update(current: &Loan, next: &Loan) -> Result<()> {
    if current.tokenized && !next.tokenized {
        return Err(PlatformError::InvalidTransition {
            id: current.id.clone(),
            reason: "tokenization cannot be reverted",
        });
    }
    if !current.tokenized && next.tokenized && current.status != LoanStatus::Active {
        return Err(PlatformError::NotActive {
            id: current.id.clone(),
            status: current.status,
        });
    }
    Ok(())
}

/// First identifier that appears twice in the batch
fn first_duplicate(loans: &[NewLoan]) -> Option<&str> {
    let mut seen = HashSet::new();
    loans
        .iter()
        .map(|l| l.id.as_str())
        .find(|id| !seen.insert(*id))
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

const LOAN_COLUMNS: &str = "id, status, amount, payment_schedule, interest_rate, ltv, \
                            risk_group, agreement_url, tokenized, created_at, updated_at";

pub struct SqliteLoanStore {
    conn: Arc<Mutex<Connection>>,
    chunk_size: usize,
}

impl SqliteLoanStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Audit trail for one loan, newest first
    pub fn events_for_loan(&self, id: &str) -> Result<Vec<Event>> {
        let conn = self.conn.lock()?;
        crate::db::get_events_for_entity(&conn, "loan", id)
    }

    fn insert_chunk(
        tx: &rusqlite::Transaction<'_>,
        chunk: &[NewLoan],
        now: &str,
    ) -> Result<usize> {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO loans ({}) VALUES {}",
            LOAN_COLUMNS, placeholders
        );

        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 10);
        for loan in chunk {
            values.extend([
                Value::Text(loan.id.clone()),
                Value::Text(loan.status.as_str().to_string()),
                Value::Real(loan.amount),
                Value::Text(loan.payment_schedule.clone()),
                Value::Real(loan.interest_rate),
                loan.ltv.map(Value::Real).unwrap_or(Value::Null),
                Value::Text(loan.risk_group.clone()),
                Value::Text(loan.agreement_url.clone()),
                Value::Text(now.to_string()),
                Value::Text(now.to_string()),
            ]);
        }

        match tx.execute(&sql, params_from_iter(values)) {
            Ok(n) => Ok(n),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // In-batch duplicates are rejected earlier, so the clash is with a stored row
                let id = chunk
                    .iter()
                    .find(|l| Self::exists(tx, &l.id).unwrap_or(false))
                    .map(|l| l.id.clone())
                    .unwrap_or_default();
                Err(PlatformError::DuplicateLoan { id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
        conn.query_row("SELECT 1 FROM loans WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Loan>> {
        let sql = format!("SELECT {} FROM loans WHERE id = ?1", LOAN_COLUMNS);
        Ok(conn.query_row(&sql, [id], loan_from_row).optional()?)
    }
}

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    let status: String = row.get(1)?;
    let tokenized: i64 = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Loan {
        id: row.get(0)?,
        status: status.parse::<LoanStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
        })?,
        amount: row.get(2)?,
        payment_schedule: row.get(3)?,
        interest_rate: row.get(4)?,
        ltv: row.get(5)?,
        risk_group: row.get(6)?,
        agreement_url: row.get(7)?,
        tokenized: tokenized != 0,
        created_at: decode_time(&created_at, 9)?,
        updated_at: decode_time(&updated_at, 10)?,
    })
}

impl LoanStore for SqliteLoanStore {
    fn insert_many(&self, loans: &[NewLoan]) -> Result<usize> {
        if let Some(id) = first_duplicate(loans) {
            return Err(PlatformError::DuplicateLoan { id: id.to_string() });
        }
        if loans.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        let now = encode_time(&Utc::now());

        let mut inserted = 0;
        for (n, chunk) in loans.chunks(self.chunk_size).enumerate() {
            inserted += Self::insert_chunk(&tx, chunk, &now)?;
            debug!(chunk = n, rows = chunk.len(), "inserted loan chunk");
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let event = Event::new(
            "loans_imported",
            "import",
            &batch_id,
            serde_json::json!({
                "count": inserted,
                "first_id": loans.first().map(|l| l.id.as_str()),
                "last_id": loans.last().map(|l| l.id.as_str()),
            }),
            "csv_importer",
        );
        insert_event(&tx, &event)?;

        // Dropping `tx` on any earlier `?` rolls the whole batch back
        tx.commit()?;

        info!(inserted, batch_id = %batch_id, "loan batch committed");
        Ok(inserted)
    }

    fn find_all(&self) -> Result<Vec<Loan>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM loans ORDER BY created_at DESC, rowid DESC",
            LOAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let loans = stmt
            .query_map([], loan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(loans)
    }

    fn find_by_id(&self, id: &str) -> Result<Loan> {
        let conn = self.conn.lock()?;
        Self::fetch(&conn, id)?.ok_or_else(|| PlatformError::LoanNotFound { id: id.to_string() })
    }

    fn update(&self, loan: &Loan) -> Result<Loan> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let current = Self::fetch(&tx, &loan.id)?.ok_or_else(|| PlatformError::LoanNotFound {
            id: loan.id.clone(),
        })?;
        check_update(&current, loan)?;

        tx.execute(
            "UPDATE loans SET status = ?2, amount = ?3, payment_schedule = ?4,
                interest_rate = ?5, ltv = ?6, risk_group = ?7, agreement_url = ?8,
                tokenized = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                loan.id,
                loan.status.as_str(),
                loan.amount,
                loan.payment_schedule,
                loan.interest_rate,
                loan.ltv,
                loan.risk_group,
                loan.agreement_url,
                loan.tokenized,
                encode_time(&Utc::now()),
            ],
        )?;

        let saved = Self::fetch(&tx, &loan.id)?.ok_or_else(|| PlatformError::LoanNotFound {
            id: loan.id.clone(),
        })?;
        tx.commit()?;
        Ok(saved)
    }

    fn count_where(&self, filter: LoanFilter) -> Result<u64> {
        let conn = self.conn.lock()?;
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM loans WHERE {}", clause);
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn sum_amount_where(&self, filter: LoanFilter) -> Result<f64> {
        let conn = self.conn.lock()?;
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT COALESCE(SUM(amount), 0.0) FROM loans WHERE {}",
            clause
        );
        let sum: f64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(sum)
    }

    fn mark_tokenized(&self, id: &str) -> Result<Option<Loan>> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE loans SET tokenized = 1, updated_at = ?2
             WHERE id = ?1 AND tokenized = 0 AND status = 'ACTIVE'",
            params![id, encode_time(&Utc::now())],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let loan = Self::fetch(&tx, id)?;
        if let Some(loan) = &loan {
            let event = Event::new(
                "loan_tokenized",
                "loan",
                id,
                serde_json::json!({ "amount": loan.amount }),
                "tokenizer",
            );
            insert_event(&tx, &event)?;
        }
        tx.commit()?;
        Ok(loan)
    }

    fn mark_expired(&self, id: &str) -> Result<Option<Loan>> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE loans SET status = 'EXPIRED', updated_at = ?2
             WHERE id = ?1 AND status = 'ACTIVE'",
            params![id, encode_time(&Utc::now())],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let loan = Self::fetch(&tx, id)?;
        let event = Event::new("loan_expired", "loan", id, serde_json::json!({}), "expiry");
        insert_event(&tx, &event)?;
        tx.commit()?;
        Ok(loan)
    }

    fn statistics(&self) -> Result<DashboardStats> {
        let conn = self.conn.lock()?;

        // One SELECT reads one snapshot
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(amount), 0.0),
                COALESCE(SUM(CASE WHEN tokenized = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN tokenized = 1 THEN amount ELSE 0.0 END), 0.0),
                COALESCE(SUM(CASE WHEN status = 'ACTIVE' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'EXPIRED' THEN 1 ELSE 0 END), 0)
             FROM loans",
            [],
            |row| {
                Ok(DashboardStats {
                    total_loans: row.get::<_, i64>(0)? as u64,
                    total_loan_amount: row.get(1)?,
                    total_tokenized: row.get::<_, i64>(2)? as u64,
                    total_tokenized_amount: row.get(3)?,
                    active_loans: row.get::<_, i64>(4)? as u64,
                    expired_loans: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;

        Ok(stats)
    }
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// Vec-backed store for tests and throwaway runs.
/// One `RwLock` guards the whole set, so each call sees a consistent snapshot.
#[derive(Clone, Default)]
pub struct MemoryLoanStore {
    loans: Arc<RwLock<Vec<Loan>>>,
}

impl MemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with fully-formed loans (any state), bypassing import
    pub fn with_loans(loans: Vec<Loan>) -> Self {
        Self {
            loans: Arc::new(RwLock::new(loans)),
        }
    }

    fn transition<F>(&self, id: &str, apply: F) -> Result<Option<Loan>>
    where
        F: FnOnce(&mut Loan) -> bool,
    {
        let mut loans = self.loans.write()?;
        let Some(loan) = loans.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        if !apply(loan) {
            return Ok(None);
        }
        loan.updated_at = Utc::now();
        Ok(Some(loan.clone()))
    }
}

impl LoanStore for MemoryLoanStore {
    fn insert_many(&self, loans: &[NewLoan]) -> Result<usize> {
        if let Some(id) = first_duplicate(loans) {
            return Err(PlatformError::DuplicateLoan { id: id.to_string() });
        }

        let mut stored = self.loans.write()?;
        if let Some(existing) = loans.iter().find(|l| stored.iter().any(|s| s.id == l.id)) {
            return Err(PlatformError::DuplicateLoan {
                id: existing.id.clone(),
            });
        }

        let now = Utc::now();
        stored.extend(loans.iter().cloned().map(|l| Loan::from_new(l, now)));
        Ok(loans.len())
    }

    fn find_all(&self) -> Result<Vec<Loan>> {
        let loans = self.loans.read()?;
        let mut all: Vec<Loan> = loans.iter().rev().cloned().collect();
        // Stable: equal timestamps keep reverse insertion order
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    fn find_by_id(&self, id: &str) -> Result<Loan> {
        let loans = self.loans.read()?;
        loans
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::LoanNotFound { id: id.to_string() })
    }

    fn update(&self, loan: &Loan) -> Result<Loan> {
        let mut loans = self.loans.write()?;
        let current = loans
            .iter_mut()
            .find(|l| l.id == loan.id)
            .ok_or_else(|| PlatformError::LoanNotFound {
                id: loan.id.clone(),
            })?;
        check_update(current, loan)?;

        let created_at = current.created_at;
        *current = loan.clone();
        current.created_at = created_at;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    fn count_where(&self, filter: LoanFilter) -> Result<u64> {
        let loans = self.loans.read()?;
        Ok(loans.iter().filter(|l| filter.matches(l)).count() as u64)
    }

    fn sum_amount_where(&self, filter: LoanFilter) -> Result<f64> {
        let loans = self.loans.read()?;
        Ok(loans
            .iter()
            .filter(|l| filter.matches(l))
            .map(|l| l.amount)
            .sum())
    }

    fn mark_tokenized(&self, id: &str) -> Result<Option<Loan>> {
        self.transition(id, |loan| {
            if loan.tokenized || loan.status != LoanStatus::Active {
                return false;
            }
            loan.tokenized = true;
            true
        })
    }

    fn mark_expired(&self, id: &str) -> Result<Option<Loan>> {
        self.transition(id, |loan| {
            if loan.status != LoanStatus::Active {
                return false;
            }
            loan.status = LoanStatus::Expired;
            true
        })
    }

    fn statistics(&self) -> Result<DashboardStats> {
        let loans = self.loans.read()?;
        Ok(DashboardStats::from_loans(loans.iter()))
    }
}
