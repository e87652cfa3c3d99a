//! Display formatting for terminal output
//!
//! Tables for catalog listings and plain-text summaries for operation
//! results.

pub mod backup;
pub mod report;

pub use backup::{format_record_details, format_record_list};
pub use report::{
    format_backup_run, format_reconcile_report, format_restore_outcome, format_retention_report,
    format_verify_report,
};

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Compact age such as `5m` or `3d`
pub fn format_age(age: chrono::Duration) -> String {
    let total_seconds = age.num_seconds().max(0);
    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }
    format!("{}mo", days / 30)
}

/// Elapsed wall time with millisecond precision below a minute
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        let whole = elapsed.as_secs();
        format!("{}m{:02}s", whole / 60, whole % 60)
    }
}
