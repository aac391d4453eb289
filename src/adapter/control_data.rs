//! Parser for `pg_controldata` output.
//!
//! Used when the engine is down and SQL probes are unavailable: the control
//! file still tells us the cluster state and where WAL ended.

use std::collections::HashMap;

use crate::domain::{LocalPosition, Timeline, WalPosition};
use crate::error::HaError;

const STATE: &str = "Database cluster state";
const MIN_RECOVERY_LSN: &str = "Minimum recovery ending location";
const MIN_RECOVERY_TLI: &str = "Min recovery ending loc's timeline";
const CHECKPOINT_LSN: &str = "Latest checkpoint location";
const CHECKPOINT_TLI: &str = "Latest checkpoint's TimeLineID";

/// Key/value view of `pg_controldata` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlData {
    fields: HashMap<String, String>,
}

impl ControlData {
    /// Splits `key: value` lines. Lines without a colon are skipped.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let fields = output
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self { fields }
    }

    /// Raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `Database cluster state` value.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.get(STATE)
    }

    /// Timeline and position recorded by a cleanly stopped cluster.
    ///
    /// Any state other than a clean shutdown (including a crashed primary)
    /// yields [`LocalPosition::default`], which callers treat as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::MalformedLsn`] or [`HaError::Internal`] when the
    /// relevant fields are present but malformed.
    pub fn local_position(&self) -> Result<LocalPosition, HaError> {
        let (in_recovery, lsn_key, tli_key) = match self.state() {
            Some("shut down in recovery" | "in archive recovery") => {
                (true, MIN_RECOVERY_LSN, MIN_RECOVERY_TLI)
            }
            Some("shut down") => (false, CHECKPOINT_LSN, CHECKPOINT_TLI),
            _ => return Ok(LocalPosition::default()),
        };

        let (Some(lsn), Some(tli)) = (self.get(lsn_key), self.get(tli_key)) else {
            return Ok(LocalPosition::default());
        };
        let position = WalPosition::parse(lsn)?;
        let timeline = tli
            .parse::<Timeline>()
            .map_err(|e| HaError::Internal(format!("pg_controldata {tli_key}: {e}")))?;

        Ok(LocalPosition {
            in_recovery,
            timeline,
            position,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn output(state: &str) -> String {
        format!(
            "pg_control version number:            1300\n\
             Database cluster state:               {state}\n\
             Latest checkpoint location:           0/3000028\n\
             Latest checkpoint's TimeLineID:       2\n\
             Minimum recovery ending location:     0/4000060\n\
             Min recovery ending loc's timeline:   3\n"
        )
    }

    #[test]
    fn clean_shutdown_uses_checkpoint() {
        let Ok(pos) = ControlData::parse(&output("shut down")).local_position() else {
            panic!("should parse");
        };
        assert!(!pos.in_recovery);
        assert_eq!(pos.timeline, 2);
        assert_eq!(pos.position, WalPosition::new(0x0300_0028));
    }

    #[test]
    fn recovery_shutdown_uses_min_recovery_point() {
        for state in ["shut down in recovery", "in archive recovery"] {
            let Ok(pos) = ControlData::parse(&output(state)).local_position() else {
                panic!("should parse");
            };
            assert!(pos.in_recovery);
            assert_eq!(pos.timeline, 3);
            assert_eq!(pos.position, WalPosition::new(0x0400_0060));
        }
    }

    #[test]
    fn other_states_are_unknown() {
        let Ok(pos) = ControlData::parse(&output("in production")).local_position() else {
            panic!("should parse");
        };
        assert!(!pos.is_known());
        assert_eq!(ControlData::parse("garbage").state(), None);
    }
}
