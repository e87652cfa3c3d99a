//! MongoDB dialect
//!
//! Driver codes are server error codes.

use super::{Dialect, ErrorClass};
use crate::models::DatabaseType;

pub struct Mongodb;

impl Dialect for Mongodb {
    const ENGINE: DatabaseType = DatabaseType::Mongodb;

    fn classify(code: &str) -> ErrorClass {
        match code {
            // HostUnreachable, HostNotFound, NetworkTimeout, ShutdownInProgress,
            // PrimarySteppedDown, NotWritablePrimary
            "6" | "7" | "89" | "91" | "189" | "10107" => ErrorClass::Transient,
            // AuthenticationFailed, Unauthorized
            "18" | "13" => ErrorClass::Authentication,
            _ => ErrorClass::Permanent,
        }
    }
}
