//! Rule engine collaborator
//!
//! The pipeline only consumes `ActionMask::SAVE_LAST`; every other bit is
//! passed through untouched.

use crate::domain::error::RuleError;
use crate::domain::status::StatusCode;
use crate::domain::types::TelemetryEvent;
use crate::infra::config::RuleConfig;
use smallvec::SmallVec;

/// Bitset of actions requested by rule evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionMask(pub u32);

impl ActionMask {
    pub const NONE: ActionMask = ActionMask(0);
    pub const EMAIL: ActionMask = ActionMask(0x0001);
    /// Record the last notification on the asset
    pub const SAVE_LAST: ActionMask = ActionMask(0x0002);
    pub const QUEUE: ActionMask = ActionMask(0x0004);

    #[inline]
    pub fn contains(self, other: ActionMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ActionMask {
    type Output = ActionMask;

    fn bitor(self, rhs: ActionMask) -> ActionMask {
        ActionMask(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ActionMask {
    fn bitor_assign(&mut self, rhs: ActionMask) {
        self.0 |= rhs.0;
    }
}

/// Result of evaluating the general rule set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub actions: ActionMask,
    /// First rule that fired
    pub rule_id: Option<String>,
}

pub trait RuleEngine: Send + Sync {
    fn execute_selector(&self, selector: &str, event: &TelemetryEvent) -> Result<ActionMask, RuleError>;

    fn execute_rules(&self, event: &TelemetryEvent) -> Result<RuleOutcome, RuleError>;

    fn check_selector_syntax(&self, selector: &str) -> bool;
}

struct StatusRule {
    id: String,
    codes: SmallVec<[StatusCode; 4]>,
    actions: ActionMask,
}

/// Rule engine over `[[rules]]` config entries.
///
/// A rule fires when the event status is one of its codes. A selector is a
/// comma separated list of status codes, or `*` for any status.
pub struct ConfigRuleEngine {
    rules: Vec<StatusRule>,
}

impl ConfigRuleEngine {
    pub fn new(configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(configs.len());
        for cfg in configs {
            let codes = cfg
                .status_codes
                .iter()
                .map(|s| {
                    StatusCode::parse(s).ok_or_else(|| {
                        RuleError::InvalidSelector(format!("rule {}: unknown status {}", cfg.id, s))
                    })
                })
                .collect::<Result<SmallVec<[StatusCode; 4]>, _>>()?;
            let mut actions = ActionMask(cfg.actions);
            if cfg.record_last {
                actions |= ActionMask::SAVE_LAST;
            }
            rules.push(StatusRule { id: cfg.id.clone(), codes, actions });
        }
        Ok(Self { rules })
    }

    fn parse_selector(selector: &str) -> Result<Option<SmallVec<[StatusCode; 4]>>, RuleError> {
        let selector = selector.trim();
        if selector == "*" {
            return Ok(None);
        }
        if selector.is_empty() {
            return Err(RuleError::InvalidSelector("empty selector".to_string()));
        }
        selector
            .split(',')
            .map(|s| StatusCode::parse(s.trim()).ok_or_else(|| RuleError::InvalidSelector(s.trim().to_string())))
            .collect::<Result<SmallVec<_>, _>>()
            .map(Some)
    }
}

impl RuleEngine for ConfigRuleEngine {
    fn execute_selector(&self, selector: &str, event: &TelemetryEvent) -> Result<ActionMask, RuleError> {
        let matched = match Self::parse_selector(selector)? {
            None => true,
            Some(codes) => codes.contains(&event.status_code),
        };
        Ok(if matched { ActionMask::EMAIL | ActionMask::SAVE_LAST } else { ActionMask::NONE })
    }

    fn execute_rules(&self, event: &TelemetryEvent) -> Result<RuleOutcome, RuleError> {
        let mut outcome = RuleOutcome::default();
        for rule in self.rules.iter().filter(|r| r.codes.contains(&event.status_code)) {
            outcome.actions |= rule.actions;
            if outcome.rule_id.is_none() {
                outcome.rule_id = Some(rule.id.clone());
            }
        }
        Ok(outcome)
    }

    fn check_selector_syntax(&self, selector: &str) -> bool {
        Self::parse_selector(selector).is_ok()
    }
}
