// 💳 Loan Entity
//
// Identity: `id` (externally supplied, unique, never changes)
// Values: status, amount, terms... (`status` and `tokenized` are the only mutable ones)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LOAN STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Active,
    Expired,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Expired => "EXPIRED",
        }
    }

    /// Lenient mapping used by imports: only "expired" (any case) is EXPIRED,
    /// everything else, including a missing value, is ACTIVE.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(value) if value.trim().eq_ignore_ascii_case("EXPIRED") => LoanStatus::Expired,
            _ => LoanStatus::Active,
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    /// Strict parse, for values read back from storage
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(LoanStatus::Active),
            "EXPIRED" => Ok(LoanStatus::Expired),
            other => Err(format!("unknown loan status: {}", other)),
        }
    }
}

// ============================================================================
// TOKEN STATE
// ============================================================================

/// Where a loan sits in the tokenization lifecycle.
///
/// The only legal move is `UntokenizedActive -> Tokenized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    UntokenizedActive,
    UntokenizedExpired,
    Tokenized,
}

// ============================================================================
// LOAN
// ============================================================================

/// A loan candidate produced by the CSV normalizer, before the store assigns
/// timestamps. New loans always start untokenized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    pub id: String,
    pub status: LoanStatus,
    pub amount: f64,
    pub payment_schedule: String,
    pub interest_rate: f64,
    pub ltv: Option<f64>,
    pub risk_group: String,
    pub agreement_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub status: LoanStatus,
    pub amount: f64,
    pub payment_schedule: String,
    pub interest_rate: f64,
    /// Loan-to-value percentage; `None` means not applicable (never zero-filled)
    pub ltv: Option<f64>,
    pub risk_group: String,
    pub agreement_url: String,
    pub tokenized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Materialize a candidate with store-assigned timestamps
    pub fn from_new(new: NewLoan, now: DateTime<Utc>) -> Self {
        Loan {
            id: new.id,
            status: new.status,
            amount: new.amount,
            payment_schedule: new.payment_schedule,
            interest_rate: new.interest_rate,
            ltv: new.ltv,
            risk_group: new.risk_group,
            agreement_url: new.agreement_url,
            tokenized: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn token_state(&self) -> TokenState {
        match (self.tokenized, self.status) {
            (true, _) => TokenState::Tokenized,
            (false, LoanStatus::Active) => TokenState::UntokenizedActive,
            (false, LoanStatus::Expired) => TokenState::UntokenizedExpired,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }
}
