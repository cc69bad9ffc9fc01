//! Upload progress: throttling and rendering.
//!
//! The transport pushes [`ProgressEvent`]s into a channel; [`relay`] drains
//! it and edits the status message at most once per interval. The throttle
//! itself is a plain state machine over caller-supplied instants.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use super::OutputChannel;
use crate::utils::human_readable_size;

/// Bytes sent so far out of a total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes transferred
    pub sent: u64,
    /// Total bytes
    pub total: u64,
}

/// A progress observation that passed the throttle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes transferred
    pub sent: u64,
    /// Total bytes
    pub total: u64,
    /// Percent complete, 0 to 100
    pub percent: f64,
    /// Time since the transfer started
    pub elapsed: Duration,
    /// Average bytes per second since the start
    pub speed: f64,
}

/// Drops observations arriving less than `interval` after the last emitted one
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    started: Instant,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    /// Throttle for a transfer that began at `started`
    #[must_use]
    pub const fn new(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            started,
            last_emit: None,
        }
    }

    /// Feed one event observed at `now`; returns a snapshot if it should be shown.
    pub fn observe(&mut self, event: ProgressEvent, now: Instant) -> Option<ProgressSnapshot> {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);

        let elapsed = now.saturating_duration_since(self.started);
        let percent = if event.total == 0 {
            0.0
        } else {
            (event.sent as f64 * 100.0 / event.total as f64).min(100.0)
        };
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 { event.sent as f64 / secs } else { 0.0 };

        Some(ProgressSnapshot {
            sent: event.sent,
            total: event.total,
            percent,
            elapsed,
            speed,
        })
    }
}

/// Ten-cell bar, one filled cell per started 10%
#[must_use]
pub fn progress_bar(percent: f64) -> String {
    (0..10)
        .map(|i| if f64::from(i) < percent / 10.0 { '▰' } else { '▱' })
        .collect()
}

/// Status text for an upload in progress (HTML)
#[must_use]
pub fn render_upload_progress(title: &str, snapshot: &ProgressSnapshot) -> String {
    format!(
        "📤 <b>Uploading:</b> <code>{}</code>\n<code>[{}] {:.1}%</code>\n<code>{} / {}</code>\n<b>Speed:</b> <code>{}/s</code>",
        html_escape::encode_text(title),
        progress_bar(snapshot.percent),
        snapshot.percent,
        human_readable_size(snapshot.sent as f64),
        human_readable_size(snapshot.total as f64),
        human_readable_size(snapshot.speed),
    )
}

/// Drain `events` until the sender side closes, editing the status through
/// the throttle. Edit failures are logged and ignored.
pub async fn relay(
    mut events: mpsc::Receiver<ProgressEvent>,
    output: &dyn OutputChannel,
    title: &str,
    interval: Duration,
) {
    let mut throttle = ProgressThrottle::new(interval, Instant::now());
    while let Some(event) = events.recv().await {
        let Some(snapshot) = throttle.observe(event, Instant::now()) else {
            continue;
        };
        if let Err(e) = output
            .edit_status(&render_upload_progress(title, &snapshot))
            .await
        {
            debug!(error = %e, "Progress update failed, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(sent: u64) -> ProgressEvent {
        ProgressEvent { sent, total: 100 }
    }

    #[test]
    fn test_throttle_suppresses_within_interval() {
        let t0 = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(2), t0);

        assert!(throttle.observe(ev(1), t0).is_some());
        assert!(throttle.observe(ev(2), t0 + Duration::from_millis(500)).is_none());
        assert!(throttle.observe(ev(3), t0 + Duration::from_millis(1999)).is_none());
        let snap = throttle.observe(ev(50), t0 + Duration::from_secs(2));
        assert!(snap.is_some());
        assert!(throttle.observe(ev(60), t0 + Duration::from_secs(3)).is_none());
        assert!(throttle.observe(ev(70), t0 + Duration::from_secs(4)).is_some());
    }

    #[test]
    fn test_snapshot_math() {
        let t0 = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(2), t0);
        let snap = throttle
            .observe(ProgressEvent { sent: 400, total: 1000 }, t0 + Duration::from_secs(4))
            .map(|s| (s.percent, s.speed));
        assert_eq!(snap, Some((40.0, 100.0)));

        let mut throttle = ProgressThrottle::new(Duration::ZERO, t0);
        let zero = throttle.observe(ProgressEvent { sent: 0, total: 0 }, t0);
        assert_eq!(zero.map(|s| (s.percent, s.speed)), Some((0.0, 0.0)));
    }

    #[test]
    fn test_bar_and_render() {
        assert_eq!(progress_bar(0.0), "▱▱▱▱▱▱▱▱▱▱");
        assert_eq!(progress_bar(35.0), "▰▰▰▰▱▱▱▱▱▱");
        assert_eq!(progress_bar(100.0), "▰▰▰▰▰▰▰▰▰▰");

        let snap = ProgressSnapshot {
            sent: 1024,
            total: 2048,
            percent: 50.0,
            elapsed: Duration::from_secs(1),
            speed: 1024.0,
        };
        let text = render_upload_progress("a <b>", &snap);
        assert!(text.contains("a &lt;b&gt;"));
        assert!(text.contains("50.0%"));
        assert!(text.contains("1.00 KB / 2.00 KB"));
        assert!(text.contains("1.00 KB/s"));
    }
}
