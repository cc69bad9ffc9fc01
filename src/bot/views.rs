//! HTML renderings of worker and admin results.

use std::fmt::Write;

use html_escape::encode_text;

use crate::utils::human_readable_size;
use crate::worker::{DirEntry, WorkerHealth, WorkerReport};

/// One-line summary of a worker
#[must_use]
pub fn worker_line(report: &WorkerReport) -> String {
    let name = encode_text(&report.name);
    match report.health {
        WorkerHealth::Running => {
            let pid = report.record.pid.unwrap_or_default();
            let script = report.record.main_script.as_deref().unwrap_or("?");
            let mut line = format!(
                "🟢 <b>{name}</b>: running (pid <code>{pid}</code>, <code>{}</code>)",
                encode_text(script)
            );
            if let Some(started) = report.record.started_at {
                let _ = write!(line, " since {}", started.format("%Y-%m-%d %H:%M UTC"));
            }
            line
        }
        WorkerHealth::Stopped => format!("⚪ <b>{name}</b>: stopped"),
        WorkerHealth::Crashed => {
            format!("💥 <b>{name}</b>: process exited unexpectedly, marked stopped")
        }
    }
}

/// Summary of every worker
#[must_use]
pub fn worker_list(reports: &[WorkerReport]) -> String {
    if reports.is_empty() {
        return "ℹ️ No workers yet. Create one with /newworker &lt;name&gt;.".to_string();
    }
    let mut out = String::from("🧰 <b>Workers</b>\n\n");
    for report in reports {
        out.push_str(&worker_line(report));
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Directory listing: directories first get a trailing `/`, files show their size
#[must_use]
pub fn listing(worker: &str, path: &str, entries: &[DirEntry]) -> String {
    let shown = if path.is_empty() { "." } else { path };
    let mut out = format!(
        "📂 <b>{}</b>:<code>{}</code>\n\n",
        encode_text(worker),
        encode_text(shown)
    );
    if entries.is_empty() {
        out.push_str("<i>(empty)</i>");
        return out;
    }
    for entry in entries {
        if entry.is_dir {
            let _ = writeln!(out, "📁 <code>{}/</code>", encode_text(&entry.name));
        } else {
            let _ = writeln!(
                out,
                "📄 <code>{}</code> ({})",
                encode_text(&entry.name),
                human_readable_size(entry.size as f64)
            );
        }
    }
    out.trim_end().to_string()
}

/// Authorized users, sudo user marked
#[must_use]
pub fn user_list(users: &[i64], sudo_user: i64) -> String {
    let mut out = String::from("👥 <b>Authorized users</b>\n\n");
    for id in users {
        let marker = if *id == sudo_user { " (sudo)" } else { "" };
        let _ = writeln!(out, "• <code>{id}</code>{marker}");
    }
    out.trim_end().to_string()
}

/// Shell transcript as shown to the user (plain text, unescaped)
#[must_use]
pub fn shell_transcript(command: &str, output: &str) -> String {
    let body = if output.trim().is_empty() { "No output." } else { output };
    format!("$ {command}\n\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerRecord;

    fn report(health: WorkerHealth) -> WorkerReport {
        let mut record = WorkerRecord::new("/w/bot1".into());
        if health == WorkerHealth::Running {
            record.mark_running(77, "run.py");
        }
        WorkerReport {
            name: "bot1".to_string(),
            record,
            health,
        }
    }

    #[test]
    fn test_worker_lines() {
        let running = worker_line(&report(WorkerHealth::Running));
        assert!(running.contains("pid <code>77</code>"));
        assert!(running.contains("run.py"));
        assert!(worker_line(&report(WorkerHealth::Stopped)).contains("stopped"));
        assert!(worker_line(&report(WorkerHealth::Crashed)).contains("unexpectedly"));
        assert!(worker_list(&[]).contains("No workers"));
    }

    #[test]
    fn test_listing_format() {
        let entries = vec![
            DirEntry {
                name: "data".to_string(),
                is_dir: true,
                size: 0,
            },
            DirEntry {
                name: "run.py".to_string(),
                is_dir: false,
                size: 2048,
            },
        ];
        let text = listing("bot1", "", &entries);
        assert!(text.contains("📁 <code>data/</code>"));
        assert!(text.contains("📄 <code>run.py</code> (2.00 KB)"));
        assert!(listing("bot1", "x", &[]).contains("(empty)"));
    }

    #[test]
    fn test_shell_transcript() {
        assert_eq!(shell_transcript("true", ""), "$ true\n\nNo output.");
        assert_eq!(shell_transcript("echo hi", "hi"), "$ echo hi\n\nhi");
    }

    #[test]
    fn test_user_list_marks_sudo() {
        let text = user_list(&[1, 5], 1);
        assert!(text.contains("<code>1</code> (sudo)"));
        assert!(text.contains("<code>5</code>\n") || text.ends_with("<code>5</code>"));
    }
}
