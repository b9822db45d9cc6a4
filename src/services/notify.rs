//! Notification trigger
//!
//! Evaluates the per-asset selector and the general rule set, records the
//! last notification when requested, and sends geozone auto-notify messages.
//! Rule-engine and delivery failures are logged and counted, never escalated.

use crate::domain::asset::AssetState;
use crate::domain::geozone::{GeozoneTransition, TransitionKind};
use crate::domain::types::TelemetryEvent;
use crate::infra::config::PipelineConfig;
use crate::infra::metrics::Metrics;
use crate::io::notifier::{Notifier, RecipientDirectory};
use crate::io::rules::{ActionMask, RuleEngine};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SMS_PREFIX: &str = "SMS:";

/// Recipients split by delivery channel
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Recipients {
    pub email: Vec<String>,
    pub sms: Vec<String>,
}

impl Recipients {
    pub fn is_empty(&self) -> bool {
        self.email.is_empty() && self.sms.is_empty()
    }
}

/// Split comma separated recipient lists; `SMS:`-prefixed entries go to SMS
pub fn split_recipients<'a>(lists: impl IntoIterator<Item = &'a str>) -> Recipients {
    let mut recipients = Recipients::default();
    for entry in lists.into_iter().flat_map(|list| list.split(',')) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let is_sms = entry.len() >= SMS_PREFIX.len()
            && entry.is_char_boundary(SMS_PREFIX.len())
            && entry[..SMS_PREFIX.len()].eq_ignore_ascii_case(SMS_PREFIX);
        let (target, value) = if is_sms {
            (&mut recipients.sms, entry[SMS_PREFIX.len()..].trim())
        } else {
            (&mut recipients.email, entry)
        };
        if !value.is_empty() && !target.iter().any(|v| v.eq_ignore_ascii_case(value)) {
            target.push(value.to_string());
        }
    }
    recipients
}

fn format_time(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ts.to_string(),
    }
}

pub struct NotificationTrigger {
    rules: Option<Arc<dyn RuleEngine>>,
    notifier: Option<Arc<dyn Notifier>>,
    recipients: Option<Arc<dyn RecipientDirectory>>,
    from_email: String,
    sms_gateway: String,
    /// Selectors that failed the syntax check, reported once each
    bad_selectors: Mutex<FxHashSet<String>>,
    metrics: Arc<Metrics>,
}

impl NotificationTrigger {
    pub fn new(
        config: &PipelineConfig,
        rules: Option<Arc<dyn RuleEngine>>,
        notifier: Option<Arc<dyn Notifier>>,
        recipients: Option<Arc<dyn RecipientDirectory>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rules,
            notifier,
            recipients,
            from_email: config.notify_from_email().to_string(),
            sms_gateway: config.sms_gateway().to_string(),
            bad_selectors: Mutex::new(FxHashSet::default()),
            metrics,
        }
    }

    /// Run selector and rules for the event; records the last notification
    /// on `state` when the accumulated mask asks for it
    pub fn evaluate(&self, state: &mut AssetState, event: &TelemetryEvent) -> ActionMask {
        let Some(engine) = &self.rules else {
            return ActionMask::NONE;
        };
        // rule-generated statuses are never fed back into the rules
        if event.status_code.is_rule_trigger() {
            return ActionMask::NONE;
        }

        let mut mask = ActionMask::NONE;
        let mut rule_id = None;

        let selector = state.notify_selector.as_deref().filter(|s| !s.trim().is_empty());
        if let Some(selector) = selector.filter(|s| self.selector_is_valid(engine.as_ref(), s, event)) {
            match engine.execute_selector(selector, event) {
                Ok(actions) => {
                    if !actions.is_empty() {
                        rule_id = Some(format!("selector:{}", selector.trim()));
                    }
                    mask |= actions;
                }
                Err(e) => {
                    self.metrics.record_rule_failure();
                    warn!(asset = %event.asset_id, selector = %selector, error = %e, "selector_failed");
                }
            }
        }

        match engine.execute_rules(event) {
            Ok(outcome) => {
                mask |= outcome.actions;
                if rule_id.is_none() {
                    rule_id = outcome.rule_id;
                }
            }
            Err(e) => {
                self.metrics.record_rule_failure();
                warn!(key = %event.key(), error = %e, "rules_failed");
            }
        }

        if mask.contains(ActionMask::SAVE_LAST) {
            state.last_notify_time = event.timestamp;
            state.last_notify_code = Some(event.status_code.0);
            state.last_notify_rule = rule_id;
            debug!(
                asset = %event.asset_id,
                code = %event.status_code,
                rule = %state.last_notify_rule.as_deref().unwrap_or(""),
                "last_notification_recorded"
            );
        }
        mask
    }

    /// Syntax-check a selector before running it; an invalid one is logged
    /// and counted the first time it is seen, then skipped silently
    fn selector_is_valid(&self, engine: &dyn RuleEngine, selector: &str, event: &TelemetryEvent) -> bool {
        if engine.check_selector_syntax(selector) {
            return true;
        }
        if self.bad_selectors.lock().insert(selector.to_string()) {
            self.metrics.record_rule_failure();
            warn!(asset = %event.asset_id, selector = %selector, "selector_invalid");
        }
        false
    }

    /// Recipients of zone auto-notify for this asset: account, asset and group lists
    pub fn recipients_for(&self, state: &AssetState) -> Recipients {
        let mut lists: Vec<String> = Vec::new();
        if let Some(directory) = &self.recipients {
            lists.extend(directory.account_recipients(&state.account_id));
        }
        lists.extend(state.notify_email.clone());
        if let Some(directory) = &self.recipients {
            lists.extend(directory.group_recipients(&state.asset_id));
        }
        split_recipients(lists.iter().map(String::as_str))
    }

    /// Send the arrive/depart message for a zone flagged auto-notify
    pub fn auto_notify(&self, state: &AssetState, event: &TelemetryEvent, transition: &GeozoneTransition) {
        let zone = &transition.zone;
        if !zone.auto_notify {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        let recipients = self.recipients_for(state);
        if recipients.is_empty() {
            debug!(asset = %state.asset_id, zone = %zone.id, "auto_notify_no_recipients");
            return;
        }

        let verb = match transition.kind {
            TransitionKind::Arrive => "Arrive",
            TransitionKind::Depart => "Depart",
        };
        let time = format_time(event.timestamp);
        let subject = format!("{} {}: {}", state.asset_id, verb, zone.name());
        let body = match &event.address {
            Some(address) => format!("{}\nTime: {}\nZone: {}\nAddress: {}", subject, time, zone.id, address),
            None => format!("{}\nTime: {}\nZone: {}", subject, time, zone.id),
        };

        if !recipients.email.is_empty() {
            match notifier.send_email(&self.from_email, &recipients.email, &subject, &body) {
                Ok(()) => info!(asset = %state.asset_id, zone = %zone.id, kind = %verb, to = %recipients.email.len(), "auto_notify_email"),
                Err(e) => {
                    self.metrics.record_notification_dropped();
                    warn!(asset = %state.asset_id, zone = %zone.id, error = %e, "auto_notify_email_failed");
                }
            }
        }
        if !recipients.sms.is_empty() {
            let message = format!("{} {}", subject, time);
            match notifier.send_sms(&self.sms_gateway, &recipients.sms, &message) {
                Ok(()) => info!(asset = %state.asset_id, zone = %zone.id, kind = %verb, to = %recipients.sms.len(), "auto_notify_sms"),
                Err(e) => {
                    self.metrics.record_notification_dropped();
                    warn!(asset = %state.asset_id, zone = %zone.id, error = %e, "auto_notify_sms_failed");
                }
            }
        }
    }
}
