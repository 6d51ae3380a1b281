use crate::sync::{FileError, RunStatus, SyncProgress, SyncReport, SyncState};
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().heading));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().label), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().ok));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().failed));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().partial));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().accent),
        label.style(theme().label),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().heading));
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted).to_string()
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().label), value);
}

pub fn timing(elapsed: std::time::Duration) {
    println!(
        "{} {}",
        Icons::CLOCK.style(theme().label),
        format!("{:.2}s", elapsed.as_secs_f64()).style(theme().muted)
    );
}

pub fn file_failed(failure: &FileError) {
    eprintln!(
        "  {} {} {}",
        Icons::CROSS,
        failure.path,
        muted(&failure.message)
    );
}

/// Counters and per-file failures of a finished run
pub fn sync_report(report: &SyncReport) {
    let (icon, text) = match report.status() {
        RunStatus::Success => (Icons::CHECK, "completed".style(theme().ok).to_string()),
        RunStatus::Partial => (Icons::WARN, "partial".style(theme().partial).to_string()),
        RunStatus::Failed => (Icons::CROSS, "failed".style(theme().failed).to_string()),
    };
    println!("{} Sync {}", icon, text);
    summary_row("Files seen:", &report.files_seen.to_string());
    summary_row("Written:", &report.files_written.to_string());
    summary_row("Unchanged:", &report.files_unchanged.to_string());
    summary_row("Deleted:", &report.files_deleted.to_string());
    summary_row("Failed:", &report.files_failed.to_string());
    if let Some(revision) = &report.revision {
        summary_row("Revision:", revision);
    }
    for failure in &report.errors {
        file_failed(failure);
    }
}

pub fn progress(repo: &str, progress: &SyncProgress) {
    let state = match progress.state {
        SyncState::Idle => "idle".style(theme().ok).to_string(),
        SyncState::Queued => "queued".style(theme().accent).to_string(),
        SyncState::Syncing => "syncing".style(theme().partial).to_string(),
        SyncState::Failed => "failed".style(theme().failed).to_string(),
    };
    status(Icons::SYNC, repo, &state);
    if progress.files_total > 0 {
        summary_row(
            "Files:",
            &format!("{}/{}", progress.files_processed, progress.files_total),
        );
    }
    if let Some(started) = progress.started_at {
        summary_row("Started:", &started.to_rfc3339());
    }
    if let Some(finished) = progress.finished_at {
        summary_row("Finished:", &finished.to_rfc3339());
    }
    if let Some(err) = &progress.last_error {
        summary_row("Error:", &err.style(theme().failed).to_string());
    }
}
