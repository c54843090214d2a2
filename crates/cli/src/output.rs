//! Human-readable rendering of sync results and version history.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use marksync_core::conflict::{Resolution, SyncConflict};
use marksync_core::ledger::{VersionRecord, VersionSummary};
use marksync_core::models::{SyncResult, SyncStatus};

pub fn print_sync_result(result: &SyncResult) {
    let status = match result.status {
        SyncStatus::Success => "success",
        SyncStatus::Conflict => "completed with conflicts",
        SyncStatus::Error => "failed",
    };
    let prefix = if result.dry_run { "[dry run] " } else { "" };
    println!("{prefix}Sync {status}");
    println!();

    if result.bootstrapped {
        println!("  Remote was empty; uploaded the local tree.");
    } else if result.short_circuited {
        println!("  Already in sync.");
    }
    println!("  Pushed     : {}", result.pushed);
    println!("  Pulled     : {}", result.pulled);
    println!("  Conflicts  : {}", result.conflicts.len());
    if result.manual_conflicts > 0 {
        println!("  Need review: {}", result.manual_conflicts);
    }
    if let Some(checksum) = &result.checksum {
        println!("  Checksum   : {}", checksum.short());
    }
    if let Some(version) = result.version {
        println!("  Version    : {}", version);
    }
    if result.attempts > 1 {
        println!("  Attempts   : {}", result.attempts);
    }
    if let Some(error) = &result.error {
        println!("  Error      : {}", error);
    }

    if result.has_conflicts() {
        println!();
        println!("{}", conflict_table(&result.conflicts));
    }
}

fn conflict_table(conflicts: &[SyncConflict]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Id", "Kind", "Title", "Resolution"]);

    for conflict in conflicts {
        let title = conflict
            .resolved_value
            .as_ref()
            .or(conflict.local_change.after.as_ref())
            .or(conflict.local_change.before.as_ref())
            .map(|node| node.title.clone())
            .unwrap_or_default();

        let resolution = if conflict.requires_manual_resolution {
            Cell::new(format!("{} (review)", conflict.resolution)).fg(Color::Yellow)
        } else if conflict.resolution == Resolution::Delete {
            Cell::new(conflict.resolution.to_string()).fg(Color::Red)
        } else {
            Cell::new(conflict.resolution.to_string()).fg(Color::Green)
        };

        table.add_row(vec![
            Cell::new(conflict.id.as_str()),
            Cell::new(conflict.kind.to_string()),
            Cell::new(title),
            resolution,
        ]);
    }
    table
}

pub fn print_history(versions: &[VersionSummary]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Version", "Created", "Source", "Device", "Changes", "Checksum"]);

    for v in versions {
        table.add_row(vec![
            Cell::new(format!("v{}", v.version)),
            Cell::new(v.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(v.source_name.as_deref().unwrap_or(&v.source_type.to_string())),
            Cell::new(v.device_name.as_deref().unwrap_or("-")),
            Cell::new(v.change_summary.to_string()),
            Cell::new(v.checksum.short()),
        ]);
    }

    println!("{table}");
    println!("{} version(s) shown", versions.len());
}

pub fn print_version(record: &VersionRecord) {
    let title = format!("Version {}", record.version);
    println!("{title}");
    println!("{}", "=".repeat(title.len()));
    println!();
    println!("  Id        : {}", record.id);
    println!("  Created   : {}", record.created_at.to_rfc3339());
    println!("  Checksum  : {}", record.checksum);
    println!("  Source    : {} ({})", record.source_name.as_deref().unwrap_or("-"), record.source_type);
    println!("  Device    : {}", record.device_name.as_deref().unwrap_or("-"));
    println!("  Changes   : {}", record.change_summary);
    println!("  Nodes     : {}", record.bookmark_data.node_count());
    println!("  Bookmarks : {}", record.bookmark_data.bookmark_count());
}
