//! Keystore CLI commands
//!
//! Secrets are read from a hidden prompt, or from stdin for scripted use.
//! They are never echoed back.

use std::io::{self, BufRead};

use clap::Subcommand;

use crate::config::{BackupPaths, Settings};
use crate::credentials::{Keystore, SecureString};
use crate::error::{BackupError, BackupResult};

/// Keystore subcommands
#[derive(Subcommand, Debug)]
pub enum KeystoreCommands {
    /// Store a secret under a key
    Set {
        /// Credential key, as referenced by the configuration
        key: String,

        /// Read the secret from the first line of stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Delete a stored secret
    Remove {
        key: String,
    },

    /// List stored keys (never the secrets)
    List,
}

/// Handle a keystore command
pub fn handle_keystore_command(
    paths: &BackupPaths,
    settings: &Settings,
    cmd: KeystoreCommands,
) -> BackupResult<()> {
    let keystore = Keystore::new(
        settings
            .credentials
            .keystore_path
            .clone()
            .unwrap_or_else(|| paths.keystore_file()),
    );

    match cmd {
        KeystoreCommands::Set { key, stdin } => {
            let secret = if stdin {
                read_secret_line(io::stdin().lock())?
            } else {
                prompt_secret(&key)?
            };
            keystore.set(&key, &secret)?;
            println!("Stored '{}' in {}", key, keystore.path().display());
        }

        KeystoreCommands::Remove { key } => {
            if keystore.remove(&key)? {
                println!("Removed '{}'", key);
            } else {
                return Err(BackupError::NotFound {
                    entity_type: "Keystore entry",
                    identifier: key,
                });
            }
        }

        KeystoreCommands::List => {
            let keys = keystore.keys()?;
            if keys.is_empty() {
                println!("Keystore is empty.");
            }
            for key in keys {
                println!("{}", key);
            }
        }
    }

    Ok(())
}

fn read_secret_line(mut input: impl BufRead) -> BackupResult<SecureString> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| BackupError::Io(format!("Failed to read secret from stdin: {}", e)))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(SecureString::new(line))
}

fn prompt_secret(key: &str) -> BackupResult<SecureString> {
    let read = |prompt: &str| {
        rpassword::prompt_password(prompt)
            .map(SecureString::new)
            .map_err(|e| BackupError::Io(format!("Failed to read secret: {}", e)))
    };

    loop {
        let first = read(&format!("Secret for '{}': ", key))?;
        let second = read("Confirm secret: ")?;
        if first == second {
            return Ok(first);
        }
        println!("Secrets do not match. Please try again.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stdin_secret_strips_one_newline() {
        let secret = read_secret_line(Cursor::new("s3cret\n\n")).unwrap();
        assert_eq!(secret.as_str(), "s3cret");

        let secret = read_secret_line(Cursor::new("crlf\r\n")).unwrap();
        assert_eq!(secret.as_str(), "crlf");
    }

    #[test]
    fn test_stdin_secret_may_be_empty() {
        let secret = read_secret_line(Cursor::new("")).unwrap();
        assert!(secret.is_empty());
    }
}
