//! Test harness for the term store: isolated Postgres databases and a
//! fixture wiring every Postgres adapter to the core writer and lookups.

pub mod db;
pub mod fixture;

pub use db::{drop_db, isolated_db, IsolatedDb};
pub use fixture::PgFixture;

/// Admin connection string for harness tests.
pub const ADMIN_URL_ENV: &str = "TERM_STORE_TEST_ADMIN_URL";
