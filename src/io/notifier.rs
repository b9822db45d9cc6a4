//! Notification delivery collaborator
//!
//! Delivery is fire-and-forget: `ChannelNotifier` hands messages to the outbox
//! writer without waiting and reports a full queue as an error.

use crate::domain::error::NotifyError;
use crate::domain::types::AssetId;
use crate::infra::config::PipelineConfig;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsMessage {
    pub gateway: String,
    pub to: Vec<String>,
    pub message: String,
}

/// One outbound message as written to the outbox
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    Email(EmailMessage),
    Sms(SmsMessage),
}

pub trait Notifier: Send + Sync {
    fn send_email(&self, from: &str, to: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;

    fn send_sms(&self, gateway: &str, to: &[String], message: &str) -> Result<(), NotifyError>;
}

pub type DeliverySender = mpsc::Sender<Delivery>;

/// Notifier that queues deliveries on a bounded channel
pub struct ChannelNotifier {
    tx: DeliverySender,
}

impl ChannelNotifier {
    pub fn new(tx: DeliverySender) -> Self {
        Self { tx }
    }

    fn enqueue(&self, delivery: Delivery) -> Result<(), NotifyError> {
        self.tx.try_send(delivery).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

impl Notifier for ChannelNotifier {
    fn send_email(&self, from: &str, to: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if to.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        self.enqueue(Delivery::Email(EmailMessage {
            from: from.to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        }))
    }

    fn send_sms(&self, gateway: &str, to: &[String], message: &str) -> Result<(), NotifyError> {
        if to.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        self.enqueue(Delivery::Sms(SmsMessage {
            gateway: gateway.to_string(),
            to: to.to_vec(),
            message: message.to_string(),
        }))
    }
}

/// Account and group notification addresses
pub trait RecipientDirectory: Send + Sync {
    /// Comma separated recipients of the account, if any
    fn account_recipients(&self, account_id: &str) -> Option<String>;

    /// Comma separated recipients of every group the asset belongs to
    fn group_recipients(&self, asset_id: &AssetId) -> Vec<String>;
}

/// Recipients from the `[contacts]` and `[[groups]]` config tables
pub struct ConfigRecipients {
    accounts: FxHashMap<String, String>,
    groups: Vec<(FxHashSet<AssetId>, String)>,
}

impl ConfigRecipients {
    pub fn new(config: &PipelineConfig) -> Self {
        let accounts = config
            .account_contacts()
            .iter()
            .map(|(account, list)| (account.clone(), list.clone()))
            .collect();
        let groups = config
            .groups()
            .iter()
            .filter_map(|group| {
                let list = group.notify_email.clone()?;
                let members = group.assets.iter().map(|a| AssetId::new(a.as_str())).collect();
                Some((members, list))
            })
            .collect();
        Self { accounts, groups }
    }
}

impl RecipientDirectory for ConfigRecipients {
    fn account_recipients(&self, account_id: &str) -> Option<String> {
        self.accounts.get(account_id).cloned()
    }

    fn group_recipients(&self, asset_id: &AssetId) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(members, _)| members.contains(asset_id))
            .map(|(_, list)| list.clone())
            .collect()
    }
}
