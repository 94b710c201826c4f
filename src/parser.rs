// 🏗️ CSV Normalizer
//
// Turns an uploaded loan sheet into `NewLoan` candidates.
// Two header conventions are in the wild (snake_case and camelCase), so every
// field is read through an ordered list of synonyms: first non-empty value wins.
//
// Parsing is permissive: a bad number degrades to 0 (or to "absent" for ltv)
// instead of failing the batch. Only an unreadable document fails.

use crate::error::Result;
use crate::loan::{LoanStatus, NewLoan};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Reported with every import
pub const PARSER_VERSION: &str = "loan_csv_v1";

// ============================================================================
// COLUMN SYNONYMS (priority order)
// ============================================================================

pub const ID_COLUMNS: &[&str] = &["loan_id", "id"];
pub const STATUS_COLUMNS: &[&str] = &["status"];
pub const AMOUNT_COLUMNS: &[&str] = &["amount"];
pub const PAYMENT_SCHEDULE_COLUMNS: &[&str] = &["payment_schedule", "paymentSchedule"];
pub const INTEREST_RATE_COLUMNS: &[&str] = &["interest_rate", "interestRate"];
pub const LTV_COLUMNS: &[&str] = &["ltv"];
pub const RISK_GROUP_COLUMNS: &[&str] = &["risk_group", "riskGroup"];
pub const AGREEMENT_URL_COLUMNS: &[&str] = &["agreement_url", "agreementUrl"];

// ============================================================================
// CSV ROW
// ============================================================================

/// One data row keyed by header name
#[derive(Debug, Clone, Default)]
pub struct CsvRow {
    fields: HashMap<String, String>,
    /// 1-based line in the source document
    pub line: u64,
}

impl CsvRow {
    fn from_record(headers: &StringRecord, record: &StringRecord) -> Self {
        let mut fields = HashMap::new();
        for (name, value) in headers.iter().zip(record.iter()) {
            // Duplicate header: first column keeps the name
            fields
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }

        CsvRow {
            fields,
            line: record.position().map(|p| p.line()).unwrap_or(0),
        }
    }

    /// Raw value of a single column, empty cells treated as absent
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among `columns`, in order
    pub fn first_present(&self, columns: &[&str]) -> Option<&str> {
        columns.iter().find_map(|c| self.get(c))
    }

    fn text(&self, columns: &[&str]) -> String {
        self.first_present(columns).unwrap_or("").to_string()
    }

    fn number(&self, columns: &[&str]) -> f64 {
        match self.first_present(columns) {
            None => 0.0,
            Some(raw) => parse_number(raw).unwrap_or_else(|| {
                debug!(line = self.line, column = columns[0], raw, "unparsable number, using 0");
                0.0
            }),
        }
    }

    fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.is_empty())
    }
}

#[cfg(test)]
impl CsvRow {
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        CsvRow {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            line: 2,
        }
    }
}

/// Finite decimal or nothing
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// PARSING
// ============================================================================

/// Split a CSV document into header-keyed rows.
///
/// Blank lines and rows whose every cell is empty are skipped. Rows may be
/// shorter or longer than the header.
pub fn parse_rows<R: Read>(reader: R) -> Result<Vec<CsvRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row = CsvRow::from_record(&headers, &record);
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Resolve one row into a loan candidate
pub fn normalize_row(row: &CsvRow) -> NewLoan {
    let amount = row.number(AMOUNT_COLUMNS);

    NewLoan {
        id: row.text(ID_COLUMNS),
        status: LoanStatus::from_label(row.first_present(STATUS_COLUMNS)),
        amount: if amount < 0.0 { 0.0 } else { amount },
        payment_schedule: row.text(PAYMENT_SCHEDULE_COLUMNS),
        interest_rate: row.number(INTEREST_RATE_COLUMNS),
        ltv: row.first_present(LTV_COLUMNS).and_then(parse_number),
        risk_group: row.text(RISK_GROUP_COLUMNS),
        agreement_url: row.text(AGREEMENT_URL_COLUMNS),
    }
}

/// Parse and normalize a whole upload
pub fn normalize_csv(data: &[u8]) -> Result<Vec<NewLoan>> {
    let rows = parse_rows(data)?;
    let loans: Vec<NewLoan> = rows.iter().map(normalize_row).collect();
    debug!(rows = loans.len(), "normalized CSV payload");
    Ok(loans)
}

/// Parse and normalize a CSV file on disk
pub fn load_csv(csv_path: &Path) -> Result<Vec<NewLoan>> {
    let file = std::fs::File::open(csv_path).map_err(csv::Error::from)?;
    let rows = parse_rows(file)?;
    Ok(rows.iter().map(normalize_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_snake_case_row() {
        let csv = "loan_id,status,amount,payment_schedule,interest_rate,ltv,risk_group,agreement_url\n\
                   LOAN001,ACTIVE,25000,monthly,4.5,72.5,A,https://example.com/a/1\n";

        let loans = normalize_csv(csv.as_bytes()).unwrap();
        assert_eq!(loans.len(), 1);

        let loan = &loans[0];
        assert_eq!(loan.id, "LOAN001");
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.amount, 25000.0);
        assert_eq!(loan.payment_schedule, "monthly");
        assert_eq!(loan.interest_rate, 4.5);
        assert_eq!(loan.ltv, Some(72.5));
        assert_eq!(loan.risk_group, "A");
        assert_eq!(loan.agreement_url, "https://example.com/a/1");
    }

    #[test]
    fn test_camel_case_row() {
        let csv = "id,status,amount,paymentSchedule,interestRate,riskGroup,agreementUrl\n\
                   LOAN002,Active,1200.50,quarterly,3.1,B,https://example.com/a/2\n";

        let loan = &normalize_csv(csv.as_bytes()).unwrap()[0];
        assert_eq!(loan.id, "LOAN002");
        assert_eq!(loan.amount, 1200.5);
        assert_eq!(loan.payment_schedule, "quarterly");
        assert_eq!(loan.interest_rate, 3.1);
        assert_eq!(loan.risk_group, "B");
        assert_eq!(loan.agreement_url, "https://example.com/a/2");
    }

    #[test]
    fn test_expired_status_any_case() {
        let csv = "loan_id,status\nL1,expired\nL2,EXPIRED\nL3,Expired\nL4,closed\nL5,\n";
        let statuses: Vec<LoanStatus> = normalize_csv(csv.as_bytes())
            .unwrap()
            .into_iter()
            .map(|l| l.status)
            .collect();

        assert_eq!(
            statuses,
            vec![
                LoanStatus::Expired,
                LoanStatus::Expired,
                LoanStatus::Expired,
                LoanStatus::Active,
                LoanStatus::Active,
            ]
        );
    }

    #[test]
    fn test_missing_amount_is_zero() {
        let csv = "loan_id,status\nL1,ACTIVE\n";
        let loan = &normalize_csv(csv.as_bytes()).unwrap()[0];
        assert_eq!(loan.amount, 0.0);
        assert_eq!(loan.interest_rate, 0.0);
    }

    #[test]
    fn test_garbage_numbers_degrade_to_zero() {
        let csv = "loan_id,amount,interest_rate\nL1,lots,NaN\nL2,-50,inf\n";
        let loans = normalize_csv(csv.as_bytes()).unwrap();

        assert_eq!(loans.len(), 2);
        assert_eq!(loans[0].amount, 0.0);
        assert_eq!(loans[0].interest_rate, 0.0);
        assert_eq!(loans[1].amount, 0.0);
        assert_eq!(loans[1].interest_rate, 0.0);
    }

    #[test]
    fn test_ltv_absent_is_none_not_zero() {
        let csv = "loan_id,ltv\nL1,\nL2,0\nL3,n/a\nL4,65.25\n";
        let ltvs: Vec<Option<f64>> = normalize_csv(csv.as_bytes())
            .unwrap()
            .into_iter()
            .map(|l| l.ltv)
            .collect();

        assert_eq!(ltvs, vec![None, Some(0.0), None, Some(65.25)]);

        let csv = "loan_id,amount\nL1,10\n";
        assert_eq!(normalize_csv(csv.as_bytes()).unwrap()[0].ltv, None);
    }

    #[test]
    fn test_mixed_naming_across_rows() {
        // Both header conventions in one sheet, each row filling only one of them
        let csv = "loan_id,risk_group,riskGroup,payment_schedule,paymentSchedule\n\
                   L1,A,,monthly,\n\
                   L2,,C,,annually\n";

        let loans = normalize_csv(csv.as_bytes()).unwrap();
        assert_eq!(loans[0].risk_group, "A");
        assert_eq!(loans[0].payment_schedule, "monthly");
        assert_eq!(loans[1].risk_group, "C");
        assert_eq!(loans[1].payment_schedule, "annually");
    }

    #[test]
    fn test_snake_case_wins_over_camel_case() {
        let row = CsvRow::from_pairs(&[("risk_group", "A"), ("riskGroup", "B")]);
        assert_eq!(normalize_row(&row).risk_group, "A");

        let row = CsvRow::from_pairs(&[("loan_id", ""), ("id", "FALLBACK")]);
        assert_eq!(normalize_row(&row).id, "FALLBACK");

        let row = CsvRow::from_pairs(&[("amount", "5")]);
        assert_eq!(normalize_row(&row).id, "");
    }

    #[test]
    fn test_blank_lines_skipped() {
        let csv = "loan_id,amount\n\nL1,10\n\n,\nL2,20\n\n";
        let loans = normalize_csv(csv.as_bytes()).unwrap();
        assert_eq!(loans.len(), 2);
        assert_eq!(loans[1].id, "L2");
    }

    #[test]
    fn test_ragged_rows_tolerated() {
        let csv = "loan_id,amount,ltv\nL1,10\nL2,20,50,extra\n";
        let loans = normalize_csv(csv.as_bytes()).unwrap();
        assert_eq!(loans.len(), 2);
        assert_eq!(loans[0].ltv, None);
        assert_eq!(loans[1].ltv, Some(50.0));
    }

    #[test]
    fn test_whitespace_trimmed() {
        let csv = " loan_id , amount \n  L1 ,  99.5 \n";
        let loan = &normalize_csv(csv.as_bytes()).unwrap()[0];
        assert_eq!(loan.id, "L1");
        assert_eq!(loan.amount, 99.5);
    }

    #[test]
    fn test_tokenized_column_ignored() {
        // NewLoan has no tokenized field; the store always starts at false
        let csv = "loan_id,tokenized\nL1,true\n";
        let loans = normalize_csv(csv.as_bytes()).unwrap();
        assert_eq!(loans.len(), 1);
    }

    #[test]
    fn test_empty_document() {
        assert!(normalize_csv(b"").unwrap().is_empty());
        assert!(normalize_csv(b"loan_id,amount\n").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_utf8_fails_whole_import() {
        let mut data = b"loan_id,amount\nL1,10\n".to_vec();
        data.extend_from_slice(&[0xff, 0xfe, b',', b'1', b'\n']);

        let err = normalize_csv(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
