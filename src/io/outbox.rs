//! Notification outbox - writes queued deliveries to file
//!
//! Deliveries are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::infra::metrics::Metrics;
use crate::io::notifier::{ChannelNotifier, Delivery};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Outbox writer task for notification deliveries
pub struct OutboxWriter {
    file_path: String,
    rx: mpsc::Receiver<Delivery>,
    metrics: Arc<Metrics>,
}

impl OutboxWriter {
    /// Write one delivery to the outbox file
    /// Returns true if successful, false otherwise
    pub fn write_delivery(&self, delivery: &Delivery) -> bool {
        let json = match serde_json::to_string(delivery) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "outbox_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                let (kind, recipients) = match delivery {
                    Delivery::Email(m) => ("email", m.to.len()),
                    Delivery::Sms(m) => ("sms", m.to.len()),
                };
                info!(kind = %kind, recipients = %recipients, "notification_delivered");
                self.metrics.record_notification_sent();
                true
            }
            Err(e) => {
                error!(file = %self.file_path, error = %e, "outbox_write_failed");
                self.metrics.record_notification_dropped();
                false
            }
        }
    }

    /// Append a line to the outbox file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "outbox_written");

        Ok(())
    }

    /// Run the writer until every notifier is dropped
    pub async fn run(mut self) {
        info!(file_path = %self.file_path, "outbox_writer_started");
        while let Some(delivery) = self.rx.recv().await {
            self.write_delivery(&delivery);
        }
        info!("outbox_writer_stopped");
    }
}

/// Create a notifier and the outbox writer draining it
///
/// Returns the notifier (for the pipeline) and the writer (to be spawned)
pub fn create_outbox(
    file_path: &str,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (ChannelNotifier, OutboxWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let writer = OutboxWriter { file_path: file_path.to_string(), rx, metrics };
    (ChannelNotifier::new(tx), writer)
}
