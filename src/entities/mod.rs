// Entity Models
//
// Loans live in `crate::loan` (owned by the loan store). This module holds the
// entities that sit beside them: credit-institution profiles.

pub mod profile;

pub use profile::{NewProfile, ProductType, Profile, ProfileRegistry, ProfileStore, SqliteProfileStore};
