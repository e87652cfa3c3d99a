//! Scheduled backups
//!
//! Cron expressions are opaque here: they are handed to an external scheduler
//! through [`render_crontab`], which invokes `db-backup schedule run <job>`.
//! Two entries for the same target with the same expression would start
//! overlapping runs, which is rejected as a configuration error.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};
use crate::models::{BackupType, TargetConfig};

/// One scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Job name passed to `schedule run`
    pub name: String,
    pub target: String,
    /// Five-field cron expression
    pub cron: String,
    #[serde(default)]
    pub backup_type: BackupType,
    /// Overrides `operation_timeout_secs` for this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Validate schedule entries against the configured targets
pub fn check_entries(entries: &[ScheduleEntry], targets: &[TargetConfig]) -> BackupResult<()> {
    let known: HashSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();
    let mut names = HashSet::new();
    let mut slots: HashMap<(&str, String), &str> = HashMap::new();

    for entry in entries {
        if entry.name.trim().is_empty() {
            return Err(BackupError::Config("Schedule entry name cannot be empty".into()));
        }
        if !names.insert(entry.name.as_str()) {
            return Err(BackupError::Config(format!(
                "Duplicate schedule entry: {}",
                entry.name
            )));
        }
        if !known.contains(entry.target.as_str()) {
            return Err(BackupError::Config(format!(
                "Schedule entry '{}' references unknown target '{}'",
                entry.name, entry.target
            )));
        }
        let fields = entry.cron.split_whitespace().count();
        if fields != 5 {
            return Err(BackupError::Config(format!(
                "Schedule entry '{}': expected 5 cron fields, found {}",
                entry.name, fields
            )));
        }

        let slot = (entry.target.as_str(), normalize_cron(&entry.cron));
        if let Some(other) = slots.insert(slot, entry.name.as_str()) {
            return Err(BackupError::ScheduleOverlap(format!(
                "'{}' and '{}' both back up '{}' at '{}'",
                other, entry.name, entry.target, entry.cron
            )));
        }
    }
    Ok(())
}

fn normalize_cron(cron: &str) -> String {
    cron.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a schedule entry by job name
pub fn find<'a>(entries: &'a [ScheduleEntry], name: &str) -> BackupResult<&'a ScheduleEntry> {
    entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| BackupError::NotFound {
            entity_type: "Schedule entry",
            identifier: name.to_string(),
        })
}

/// Crontab lines running every entry through `binary`
pub fn render_crontab(entries: &[ScheduleEntry], binary: &Path, config: &Path) -> String {
    let mut out = String::from("# db-backup schedule\n");
    for entry in entries {
        out.push_str(&format!(
            "{} {} --config {} schedule run {}\n",
            normalize_cron(&entry.cron),
            shell_quote(&binary.display().to_string()),
            shell_quote(&config.display().to_string()),
            shell_quote(&entry.name)
        ));
    }
    out
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn target(name: &str) -> TargetConfig {
        TargetConfig {
            name: name.into(),
            engine: DatabaseType::Postgres,
            host: Some("db".into()),
            port: None,
            database: Some(name.into()),
            path: None,
            user: None,
            user_credential: None,
            password: None,
            options: BTreeMap::new(),
        }
    }

    fn entry(name: &str, target: &str, cron: &str) -> ScheduleEntry {
        ScheduleEntry {
            name: name.into(),
            target: target.into(),
            cron: cron.into(),
            backup_type: BackupType::Full,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_valid_schedule() {
        let entries = vec![
            entry("nightly", "orders", "0 2 * * *"),
            entry("hourly", "orders", "0 * * * *"),
            entry("billing-nightly", "billing", "0 2 * * *"),
        ];
        assert!(check_entries(&entries, &[target("orders"), target("billing")]).is_ok());
    }

    #[test]
    fn test_overlap_is_reported() {
        let entries = vec![
            entry("a", "orders", "0 2 * * *"),
            entry("b", "orders", "0  2 * *  *"),
        ];
        let err = check_entries(&entries, &[target("orders")]).unwrap_err();
        assert!(matches!(err, BackupError::ScheduleOverlap(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_target_and_bad_cron() {
        assert!(check_entries(&[entry("a", "nope", "0 2 * * *")], &[target("orders")]).is_err());
        assert!(check_entries(&[entry("a", "orders", "@daily")], &[target("orders")]).is_err());
        assert!(check_entries(
            &[entry("a", "orders", "0 2 * * *"), entry("a", "orders", "0 3 * * *")],
            &[target("orders")]
        )
        .is_err());
    }

    #[test]
    fn test_render_crontab() {
        let entries = vec![entry("nightly", "orders", "0 2 * * *")];
        let tab = render_crontab(
            &entries,
            &PathBuf::from("/usr/local/bin/db-backup"),
            &PathBuf::from("/home/me/my config.json"),
        );
        assert!(tab.contains(
            "0 2 * * * /usr/local/bin/db-backup --config '/home/me/my config.json' schedule run nightly"
        ));
    }

    #[test]
    fn test_find() {
        let entries = vec![entry("nightly", "orders", "0 2 * * *")];
        assert_eq!(find(&entries, "nightly").unwrap().target, "orders");
        assert!(find(&entries, "weekly").unwrap_err().is_not_found());
    }
}
