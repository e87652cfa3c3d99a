//! Credential sources
//!
//! Each source either yields a value for a key or declines. A source never
//! judges the value: an empty environment variable is still a yield.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use super::{CredentialSource, Keystore, SecureString, SourceKind};

/// Secrets stored in the keystore file
pub struct KeystoreSource {
    keystore: Keystore,
}

impl KeystoreSource {
    pub fn new(keystore: Keystore) -> Self {
        Self { keystore }
    }
}

impl CredentialSource for KeystoreSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Keystore
    }

    fn lookup(&self, key: &str) -> Option<SecureString> {
        match self.keystore.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.keystore.path().display(), error = %e, "keystore unreadable");
                None
            }
        }
    }
}

/// Secrets in environment variables
///
/// The variable name is the key upper-cased with every non-alphanumeric
/// character replaced by `_`, after an optional prefix.
pub struct EnvironmentSource {
    prefix: String,
}

impl EnvironmentSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable consulted for a key
    pub fn variable_name(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, name)
    }
}

impl CredentialSource for EnvironmentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn lookup(&self, key: &str) -> Option<SecureString> {
        let name = self.variable_name(key);
        match std::env::var(&name) {
            Ok(value) => Some(SecureString::from(value)),
            Err(std::env::VarError::NotPresent) => None,
            Err(std::env::VarError::NotUnicode(_)) => {
                warn!(variable = %name, "credential variable is not valid UTF-8");
                None
            }
        }
    }
}

/// One secret per file inside a secrets directory
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return None;
        }
        Some(self.dir.join(relative))
    }
}

impl CredentialSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn lookup(&self, key: &str) -> Option<SecureString> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(mut contents) => {
                if contents.ends_with('\n') {
                    contents.pop();
                    if contents.ends_with('\r') {
                        contents.pop();
                    }
                }
                Some(SecureString::from(contents))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "credential file unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_environment_variable_name() {
        let source = EnvironmentSource::new("");
        assert_eq!(source.variable_name("db_password"), "DB_PASSWORD");
        assert_eq!(source.variable_name("orders.db-user"), "ORDERS_DB_USER");

        let prefixed = EnvironmentSource::new("DBB_");
        assert_eq!(prefixed.variable_name("key"), "DBB_KEY");
    }

    #[test]
    fn test_environment_empty_value_is_a_yield() {
        let source = EnvironmentSource::new("DBB_TEST_EMPTY_");
        std::env::set_var("DBB_TEST_EMPTY_SECRET", "");
        let value = source.lookup("secret").unwrap();
        assert!(value.is_empty());
        std::env::remove_var("DBB_TEST_EMPTY_SECRET");
    }

    #[test]
    fn test_file_source_strips_one_newline() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("db_password"), "s3cret\n").unwrap();
        std::fs::write(temp.path().join("padded"), "value\n\n").unwrap();

        let source = FileSource::new(temp.path().to_path_buf());
        assert_eq!(source.lookup("db_password").unwrap().as_str(), "s3cret");
        assert_eq!(source.lookup("padded").unwrap().as_str(), "value\n");
        assert!(source.lookup("missing").is_none());
    }

    #[test]
    fn test_file_source_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let inner = temp.path().join("secrets");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(temp.path().join("outside"), "nope").unwrap();

        let source = FileSource::new(inner);
        assert!(source.lookup("../outside").is_none());
        assert!(source.lookup("/etc/passwd").is_none());
    }
}
