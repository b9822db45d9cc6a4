//! Diagnostic fault-code sets
//!
//! Fault codes travel as property strings, e.g. `type=OBDII mil=1 dtc=P0071,P0420`.
//! OBDII sets accumulate (ordered union of DTCs); any other encoding overwrites.

use smallvec::SmallVec;

const OBDII: &str = "OBDII";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ObdiiFaults {
    dtcs: SmallVec<[String; 8]>,
}

impl ObdiiFaults {
    fn parse(s: &str) -> Option<Self> {
        let mut is_obdii = false;
        let mut dtcs = SmallVec::new();
        for token in s.split_whitespace() {
            let (key, value) = token.split_once('=')?;
            match key.to_ascii_lowercase().as_str() {
                "type" => is_obdii = value.eq_ignore_ascii_case(OBDII),
                "dtc" => {
                    dtcs.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|d| !d.is_empty())
                            .map(|d| d.to_ascii_uppercase()),
                    );
                }
                _ => {}
            }
        }
        is_obdii.then_some(Self { dtcs })
    }

    fn union(mut self, other: ObdiiFaults) -> Self {
        for dtc in other.dtcs {
            if !self.dtcs.contains(&dtc) {
                self.dtcs.push(dtc);
            }
        }
        self
    }

    fn encode(&self) -> String {
        if self.dtcs.is_empty() {
            format!("type={} mil=0", OBDII)
        } else {
            format!("type={} mil=1 dtc={}", OBDII, self.dtcs.join(","))
        }
    }
}

/// Merge a newly reported fault code into the stored one
pub fn merge_fault_codes(stored: Option<&str>, incoming: &str) -> String {
    let Some(stored) = stored.filter(|s| !s.trim().is_empty()) else {
        return incoming.to_string();
    };
    match (ObdiiFaults::parse(stored), ObdiiFaults::parse(incoming)) {
        (Some(old), Some(new)) => old.union(new).encode(),
        _ => incoming.to_string(),
    }
}
