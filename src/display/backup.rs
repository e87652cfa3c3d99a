//! Catalog record formatting

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_age, format_size};
use crate::models::BackupRecord;

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Type")]
    backup_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Age")]
    age: String,
}

#[derive(Tabled)]
struct VerboseRecordRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Type")]
    backup_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Pipeline")]
    pipeline: String,
}

/// Format catalog records as a table, oldest first
pub fn format_record_list(records: &[BackupRecord], verbose: bool, now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return "No backups found.".to_string();
    }

    let mut table = if verbose {
        Table::new(records.iter().map(|r| VerboseRecordRow {
            id: r.id.to_string(),
            target: r.target.clone(),
            engine: r.database_type.to_string(),
            backup_type: r.backup_type.to_string(),
            status: r.status.to_string(),
            size: format_size(r.size_bytes),
            created: r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            parent: r
                .parent_id
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
            pipeline: describe_pipeline(r),
        }))
    } else {
        Table::new(records.iter().map(|r| RecordRow {
            id: r.id.to_string(),
            target: r.target.clone(),
            backup_type: r.backup_type.to_string(),
            status: r.status.to_string(),
            size: format_size(r.size_bytes),
            age: format_age(now.signed_duration_since(r.created_at)),
        }))
    };
    table.with(Style::sharp());

    let total: u64 = records.iter().map(|r| r.size_bytes).sum();
    format!(
        "{}\nTotal: {} backup(s), {}",
        table,
        records.len(),
        format_size(total)
    )
}

/// Format everything known about one record
pub fn format_record_details(record: &BackupRecord) -> String {
    let mut output = String::new();
    output.push_str(&format!("Backup:     {}\n", record.id));
    output.push_str(&format!(
        "Target:     {} ({})\n",
        record.target, record.target_descriptor
    ));
    output.push_str(&format!("Engine:     {}\n", record.database_type));
    output.push_str(&format!("Type:       {}\n", record.backup_type));
    output.push_str(&format!("Status:     {}\n", record.status));
    output.push_str(&format!(
        "Created:    {}\n",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(at) = record.completed_at {
        output.push_str(&format!("Completed:  {}\n", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(at) = record.verified_at {
        output.push_str(&format!("Verified:   {}\n", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    output.push_str(&format!("Size:       {}\n", format_size(record.size_bytes)));
    if let Some(checksum) = &record.checksum {
        output.push_str(&format!("SHA-256:    {}\n", checksum));
    }
    output.push_str(&format!("Pipeline:   {}\n", describe_pipeline(record)));
    if let Some(parent) = &record.parent_id {
        output.push_str(&format!("Parent:     {}\n", parent));
    }
    if let Some(checkpoint) = &record.checkpoint {
        output.push_str(&format!("Checkpoint: {}\n", checkpoint));
    }
    output.push_str(&format!(
        "Artifact:   {}\n",
        record.storage.local_path.display()
    ));
    if let Some(uri) = &record.storage.cloud_uri {
        output.push_str(&format!("Mirror:     {}\n", uri));
    }
    for warning in &record.warnings {
        output.push_str(&format!("Warning:    {}\n", warning));
    }
    if let Some(error) = &record.error {
        output.push_str(&format!("Error:      {}\n", error));
    }
    output
}

fn describe_pipeline(record: &BackupRecord) -> String {
    if record.pipeline.is_empty() {
        return "none".into();
    }
    record
        .pipeline
        .iter()
        .map(|stage| stage.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
