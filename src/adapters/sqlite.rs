//! SQLite dialect
//!
//! Driver codes are primary result codes.

use super::{Dialect, ErrorClass};
use crate::models::DatabaseType;

pub struct Sqlite;

impl Dialect for Sqlite {
    const ENGINE: DatabaseType = DatabaseType::Sqlite;

    fn classify(code: &str) -> ErrorClass {
        match code {
            // SQLITE_BUSY, SQLITE_LOCKED
            "5" | "6" => ErrorClass::Transient,
            // SQLITE_AUTH
            "23" => ErrorClass::Authentication,
            // SQLITE_CANTOPEN, SQLITE_CORRUPT, SQLITE_NOTADB and the rest
            _ => ErrorClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Sqlite::classify("5"), ErrorClass::Transient);
        assert_eq!(Sqlite::classify("14"), ErrorClass::Permanent);
        assert_eq!(Sqlite::classify("26"), ErrorClass::Permanent);
    }
}
