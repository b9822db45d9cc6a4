//! Telemetry replay source - reads events from a JSONL file
//!
//! Each non-blank line is one JSON-encoded `TelemetryEvent`. Unparseable
//! lines are logged and skipped.

use crate::domain::types::TelemetryEvent;
use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Counts of one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub sent: u64,
    pub skipped: u64,
}

/// Parse one JSONL record
pub fn parse_event(line: &str) -> Result<TelemetryEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Stream every event of `path` into `tx`, returning once the file is exhausted
/// or the receiver is gone
pub async fn replay_file(path: &str, tx: mpsc::Sender<TelemetryEvent>) -> anyhow::Result<ReplayStats> {
    let file = File::open(path).await.with_context(|| format!("failed to open events file {}", path))?;
    let mut lines = BufReader::new(file).lines();
    let mut stats = ReplayStats::default();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read events file")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_event(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    warn!(line = %line_no, "replay_receiver_closed");
                    break;
                }
                stats.sent += 1;
            }
            Err(e) => {
                stats.skipped += 1;
                warn!(line = %line_no, error = %e, "replay_line_skipped");
            }
        }
    }

    info!(file = %path, sent = %stats.sent, skipped = %stats.skipped, "replay_finished");
    Ok(stats)
}
