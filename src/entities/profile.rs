// 🏦 Credit Institution Profile
//
// Identity: store-generated UUID (never changes)
// Values: name, country, portfolio figures, product line, contacts
//
// Profiles are created once through the API. `update` and `delete` exist for
// collaborators (admin tooling, migrations) and are not exposed over HTTP.

use crate::db::{decode_time, encode_time, insert_event, Event};
use crate::error::{PlatformError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

// ============================================================================
// PRODUCT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Mortgage,
    Private,
    Business,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Mortgage => "Mortgage",
            ProductType::Private => "Private",
            ProductType::Business => "Business",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Mortgage" => Ok(ProductType::Mortgage),
            "Private" => Ok(ProductType::Private),
            "Business" => Ok(ProductType::Business),
            other => Err(format!("unknown product type: {}", other)),
        }
    }
}

// ============================================================================
// PROFILE ENTITY
// ============================================================================

/// Create-profile request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    pub country: String,
    pub founding_year: i32,
    pub total_portfolio: f64,
    /// Expected 0-100, not enforced
    pub credit_risk_score: f64,
    pub product_type: ProductType,
    pub website_url: String,
    pub contacts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub country: String,
    pub founding_year: i32,
    pub total_portfolio: f64,
    pub credit_risk_score: f64,
    pub product_type: ProductType,
    pub website_url: String,
    pub contacts: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// New profile with a fresh UUID
    pub fn new(new: NewProfile) -> Self {
        // Storage keeps microseconds
        let now = Utc::now().trunc_subsecs(6);

        Profile {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            country: new.country,
            founding_year: new.founding_year,
            total_portfolio: new.total_portfolio,
            credit_risk_score: new.credit_risk_score,
            product_type: new.product_type,
            website_url: new.website_url,
            contacts: new.contacts,
            created_at: now,
            updated_at: now,
        }
    }
}

fn warn_on_odd_score(profile: &Profile) {
    if !(0.0..=100.0).contains(&profile.credit_risk_score) {
        warn!(
            profile_id = %profile.id,
            score = profile.credit_risk_score,
            "credit risk score outside 0-100"
        );
    }
}

// ============================================================================
// PROFILE STORE
// ============================================================================

pub trait ProfileStore: Send + Sync {
    fn create(&self, new: NewProfile) -> Result<Profile>;

    /// All profiles, newest first
    fn find_all(&self) -> Result<Vec<Profile>>;

    fn find_by_id(&self, id: &str) -> Result<Profile>;

    fn update(&self, profile: &Profile) -> Result<Profile>;

    fn delete(&self, id: &str) -> Result<()>;
}

const PROFILE_COLUMNS: &str = "id, name, country, founding_year, total_portfolio, \
                               credit_risk_score, product_type, website_url, contacts, \
                               created_at, updated_at";

pub struct SqliteProfileStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProfileStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
        Ok(conn.query_row(&sql, [id], profile_from_row).optional()?)
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let product_type: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        founding_year: row.get(3)?,
        total_portfolio: row.get(4)?,
        credit_risk_score: row.get(5)?,
        product_type: product_type.parse::<ProductType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into())
        })?,
        website_url: row.get(7)?,
        contacts: row.get(8)?,
        created_at: decode_time(&created_at, 9)?,
        updated_at: decode_time(&updated_at, 10)?,
    })
}

impl ProfileStore for SqliteProfileStore {
    fn create(&self, new: NewProfile) -> Result<Profile> {
        let profile = Profile::new(new);
        warn_on_odd_score(&profile);

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO profiles ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                PROFILE_COLUMNS
            ),
            params![
                profile.id,
                profile.name,
                profile.country,
                profile.founding_year,
                profile.total_portfolio,
                profile.credit_risk_score,
                profile.product_type.as_str(),
                profile.website_url,
                profile.contacts,
                encode_time(&profile.created_at),
                encode_time(&profile.updated_at),
            ],
        )?;

        let event = Event::new(
            "profile_created",
            "profile",
            &profile.id,
            serde_json::json!({ "name": profile.name, "country": profile.country }),
            "api",
        );
        insert_event(&tx, &event)?;
        tx.commit()?;

        info!(profile_id = %profile.id, name = %profile.name, "profile created");
        Ok(profile)
    }

    fn find_all(&self) -> Result<Vec<Profile>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM profiles ORDER BY created_at DESC, rowid DESC",
            PROFILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }

    fn find_by_id(&self, id: &str) -> Result<Profile> {
        let conn = self.conn.lock()?;
        Self::fetch(&conn, id)?.ok_or_else(|| PlatformError::ProfileNotFound { id: id.to_string() })
    }

    fn update(&self, profile: &Profile) -> Result<Profile> {
        warn_on_odd_score(profile);

        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE profiles SET name = ?2, country = ?3, founding_year = ?4,
                total_portfolio = ?5, credit_risk_score = ?6, product_type = ?7,
                website_url = ?8, contacts = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                profile.id,
                profile.name,
                profile.country,
                profile.founding_year,
                profile.total_portfolio,
                profile.credit_risk_score,
                profile.product_type.as_str(),
                profile.website_url,
                profile.contacts,
                encode_time(&Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(PlatformError::ProfileNotFound {
                id: profile.id.clone(),
            });
        }

        Self::fetch(&conn, &profile.id)?.ok_or_else(|| PlatformError::ProfileNotFound {
            id: profile.id.clone(),
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        let changed = conn.execute("DELETE FROM profiles WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(PlatformError::ProfileNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

// ============================================================================
// PROFILE REGISTRY (in-memory)
// ============================================================================

/// In-memory profile store, kept in creation order
#[derive(Clone, Default)]
pub struct ProfileRegistry {
    profiles: Arc<RwLock<Vec<Profile>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.profiles.read()?.len())
    }
}

impl ProfileStore for ProfileRegistry {
    fn create(&self, new: NewProfile) -> Result<Profile> {
        let profile = Profile::new(new);
        warn_on_odd_score(&profile);
        self.profiles.write()?.push(profile.clone());
        Ok(profile)
    }

    fn find_all(&self) -> Result<Vec<Profile>> {
        Ok(self.profiles.read()?.iter().rev().cloned().collect())
    }

    fn find_by_id(&self, id: &str) -> Result<Profile> {
        self.profiles
            .read()?
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::ProfileNotFound { id: id.to_string() })
    }

    fn update(&self, profile: &Profile) -> Result<Profile> {
        warn_on_odd_score(profile);

        let mut profiles = self.profiles.write()?;
        let current = profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| PlatformError::ProfileNotFound {
                id: profile.id.clone(),
            })?;

        let created_at = current.created_at;
        *current = profile.clone();
        current.created_at = created_at;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut profiles = self.profiles.write()?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Err(PlatformError::ProfileNotFound { id: id.to_string() });
        }
        Ok(())
    }
}
