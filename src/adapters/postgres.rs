//! PostgreSQL dialect
//!
//! Driver codes are SQLSTATE values. Logical dumps have no incremental form;
//! the checkpoint a full dump reports is the WAL position at dump start.

use super::{Dialect, ErrorClass};
use crate::models::DatabaseType;

pub struct Postgres;

impl Dialect for Postgres {
    const ENGINE: DatabaseType = DatabaseType::Postgres;

    fn classify(code: &str) -> ErrorClass {
        match code {
            // connection_exception class
            c if c.starts_with("08") => ErrorClass::Transient,
            // admin_shutdown, crash_shutdown, cannot_connect_now
            "57P01" | "57P02" | "57P03" => ErrorClass::Transient,
            // serialization_failure, deadlock_detected
            "40001" | "40P01" => ErrorClass::Transient,
            // invalid_password, invalid_authorization_specification
            "28P01" | "28000" => ErrorClass::Authentication,
            _ => ErrorClass::Permanent,
        }
    }
}
