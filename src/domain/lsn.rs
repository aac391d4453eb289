//! Replication positions, timelines and the rewind decision.
//!
//! A [`WalPosition`] is a byte offset into the write-ahead log and is only
//! meaningful relative to other positions on the same timeline. Positions
//! that carry their timeline are wrapped in [`TimelinePosition`], whose
//! comparison refuses to order values from different timelines.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HaError;

/// Timeline identifier. Incremented by the engine on every promotion.
pub type Timeline = u32;

/// Offset into the write-ahead log.
///
/// Textual form is the engine's two-part hexadecimal notation
/// (`XXXXXXXX/YYYYYYYY`): high and low 32-bit halves, each 1–8 hex digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalPosition(u64);

impl WalPosition {
    /// The zero position (`0/0`).
    pub const ZERO: Self = Self(0);

    /// Creates a position from a raw byte offset.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw byte offset.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` for `0/0`.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parses the engine's `XXXX/YYYYYYYY` notation.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::MalformedLsn`] for any other shape.
    pub fn parse(text: &str) -> Result<Self, HaError> {
        let malformed = || HaError::MalformedLsn(text.to_string());
        let (high, low) = text.trim().split_once('/').ok_or_else(malformed)?;
        let half = |part: &str| {
            if part.is_empty() || part.len() > 8 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(malformed());
            }
            u32::from_str_radix(part, 16).map_err(|_| malformed())
        };
        let high = half(high)?;
        let low = half(low)?;
        Ok(Self((u64::from(high) << 32) | u64::from(low)))
    }
}

impl fmt::Display for WalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for WalPosition {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalPosition {
    type Error = HaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalPosition> for String {
    fn from(pos: WalPosition) -> Self {
        pos.to_string()
    }
}

/// Parses an LSN string. Shorthand for [`WalPosition::parse`].
///
/// # Errors
///
/// Returns [`HaError::MalformedLsn`] on anything that is not `XXXX/YYYYYYYY`.
pub fn parse_lsn(text: &str) -> Result<WalPosition, HaError> {
    WalPosition::parse(text)
}

/// A WAL position qualified by the timeline it was read on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimelinePosition {
    /// Timeline the position belongs to.
    pub timeline: Timeline,
    /// Offset within that timeline.
    pub position: WalPosition,
}

impl TimelinePosition {
    /// Creates a new qualified position.
    #[must_use]
    pub const fn new(timeline: Timeline, position: WalPosition) -> Self {
        Self { timeline, position }
    }

    /// Orders two positions on the same timeline.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::IncomparableTimeline`] if the timelines differ.
    pub fn compare(&self, other: &Self) -> Result<Ordering, HaError> {
        if self.timeline != other.timeline {
            return Err(HaError::IncomparableTimeline {
                left: self.timeline,
                right: other.timeline,
            });
        }
        Ok(self.position.cmp(&other.position))
    }
}

/// Bytes by which `local` trails `reference`, clamped at zero.
///
/// # Errors
///
/// Returns [`HaError::IncomparableTimeline`] when the positions are on
/// different timelines.
pub fn lag(reference: &TimelinePosition, local: &TimelinePosition) -> Result<u64, HaError> {
    reference.compare(local)?;
    Ok(reference
        .position
        .as_u64()
        .saturating_sub(local.position.as_u64()))
}

/// One line of a timeline history file: the timeline that was branched
/// from and the position at which the branch happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Timeline that was left at the switch point.
    pub parent_timeline: Timeline,
    /// First position that belongs to the child timeline.
    pub switch_point: WalPosition,
    /// Free-form reason recorded by the engine.
    #[serde(default)]
    pub reason: String,
}

/// Parses the contents of a `<timeline>.history` file.
///
/// Each non-empty, non-comment line is
/// `<parent timeline> <TAB> <switch LSN> <TAB> <reason>`.
///
/// # Errors
///
/// Returns [`HaError::MalformedLsn`] for a bad switch point and
/// [`HaError::Internal`] for a line without a numeric timeline.
pub fn parse_history(text: &str) -> Result<Vec<HistoryEntry>, HaError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, char::is_whitespace);
        let parent = fields
            .next()
            .and_then(|f| f.parse::<Timeline>().ok())
            .ok_or_else(|| HaError::Internal(format!("malformed history line: {line:?}")))?;
        let switch_point = WalPosition::parse(fields.next().unwrap_or_default())?;
        let reason = fields.next().unwrap_or_default().trim().to_string();
        entries.push(HistoryEntry {
            parent_timeline: parent,
            switch_point,
            reason,
        });
    }
    Ok(entries)
}

/// Timeline and position of the local node, plus whether it is replaying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPosition {
    /// `true` while the node is (or was shut down) in recovery.
    pub in_recovery: bool,
    /// Local timeline; `0` when unknown.
    pub timeline: Timeline,
    /// Local position; `0/0` when unknown.
    pub position: WalPosition,
}

impl LocalPosition {
    /// `false` when either the timeline or the position could not be
    /// determined. Unknown local state never triggers a rewind.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.timeline != 0 && !self.position.is_zero()
    }
}

/// Decides whether the local node has diverged from the primary and must
/// be rewound before it can stream from it.
///
/// `history` is the primary's timeline history, ordered by parent timeline.
/// When the primary is ahead and its history gives no continuation point
/// for the local timeline, the answer is `true`.
#[must_use]
pub fn needs_rewind(local: &LocalPosition, primary_timeline: Timeline, history: &[HistoryEntry]) -> bool {
    match local.timeline.cmp(&primary_timeline) {
        Ordering::Greater => true,
        Ordering::Equal => false,
        Ordering::Less => {
            for entry in history {
                match entry.parent_timeline.cmp(&local.timeline) {
                    Ordering::Equal if local.in_recovery => {
                        return local.position > entry.switch_point;
                    }
                    Ordering::Equal => return local.position >= entry.switch_point,
                    Ordering::Greater => return true,
                    Ordering::Less => {}
                }
            }
            // No branch point for our timeline: the end-of-checkpoint
            // position would be needed to rule divergence out.
            true
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn lsn(text: &str) -> WalPosition {
        let Ok(pos) = WalPosition::parse(text) else {
            panic!("valid lsn {text}");
        };
        pos
    }

    fn entry(parent: Timeline, switch: &str) -> HistoryEntry {
        HistoryEntry {
            parent_timeline: parent,
            switch_point: lsn(switch),
            reason: "no recovery target specified".to_string(),
        }
    }

    #[test]
    fn parses_two_part_hex() {
        assert_eq!(lsn("0/3000060").as_u64(), 0x300_0060);
        assert_eq!(lsn("1/0").as_u64(), 1 << 32);
        assert_eq!(lsn("FFFFFFFF/FFFFFFFF").as_u64(), u64::MAX);
        assert_eq!(lsn("16/b374d848"), lsn("16/B374D848"));
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in ["", "0", "0/", "/0", "0/0/0", "G/0", "123456789/0", "-1/0", "0x1/0"] {
            assert!(
                matches!(WalPosition::parse(bad), Err(HaError::MalformedLsn(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_matches_engine_notation() {
        assert_eq!(lsn("0/3000060").to_string(), "0/3000060");
        assert_eq!(WalPosition::new((0x16 << 32) | 0xB374_D848).to_string(), "16/B374D848");
    }

    #[test]
    fn ordering_is_total_within_a_timeline() {
        let texts = ["0/0", "0/10", "0/FFFFFFFF", "1/0", "1/1", "A/0"];
        let positions: Vec<_> = texts.iter().map(|t| TimelinePosition::new(3, lsn(t))).collect();
        for a in &positions {
            for b in &positions {
                let (Ok(ab), Ok(ba)) = (a.compare(b), b.compare(a)) else {
                    panic!("same timeline must compare");
                };
                assert_eq!(ab, ba.reverse());
                for c in &positions {
                    let (Ok(bc), Ok(ac)) = (b.compare(c), a.compare(c)) else {
                        panic!("same timeline must compare");
                    };
                    if ab != Ordering::Greater && bc != Ordering::Greater {
                        assert_ne!(ac, Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn cross_timeline_comparison_fails() {
        let a = TimelinePosition::new(1, lsn("0/10"));
        let b = TimelinePosition::new(2, lsn("0/10"));
        assert!(matches!(
            a.compare(&b),
            Err(HaError::IncomparableTimeline { left: 1, right: 2 })
        ));
        assert!(lag(&a, &b).is_err());
    }

    #[test]
    fn lag_is_clamped_at_zero() {
        let reference = TimelinePosition::new(2, lsn("0/1000"));
        let behind = TimelinePosition::new(2, lsn("0/400"));
        let ahead = TimelinePosition::new(2, lsn("0/2000"));
        assert_eq!(lag(&reference, &behind).ok(), Some(0xC00));
        assert_eq!(lag(&reference, &ahead).ok(), Some(0));
    }

    #[test]
    fn parses_history_file() {
        let text = "1\t0/3000060\tno recovery target specified\n\n2\t0/5000000\tbefore 2024-01-01\n";
        let Ok(entries) = parse_history(text) else {
            panic!("valid history");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.first().map(|e| e.parent_timeline), Some(1));
        assert_eq!(entries.get(1).map(|e| e.switch_point), Some(lsn("0/5000000")));
        assert!(parse_history("x\t0/1\treason").is_err());
        assert!(parse_history("1\tnope\treason").is_err());
    }

    #[test]
    fn no_rewind_on_same_timeline() {
        for (pos, recovery) in [("0/1", true), ("FF/FFFFFFFF", false), ("0/0", false)] {
            let local = LocalPosition {
                in_recovery: recovery,
                timeline: 4,
                position: lsn(pos),
            };
            assert!(!needs_rewind(&local, 4, &[entry(3, "0/1")]));
        }
    }

    #[test]
    fn rewind_when_local_timeline_is_ahead() {
        let local = LocalPosition {
            in_recovery: false,
            timeline: 5,
            position: lsn("0/1"),
        };
        assert!(needs_rewind(&local, 4, &[]));
    }

    #[test]
    fn branch_point_decides_for_older_timeline() {
        let history = [entry(1, "0/3000000"), entry(2, "0/5000000")];

        let at_switch = LocalPosition {
            in_recovery: false,
            timeline: 2,
            position: lsn("0/5000000"),
        };
        assert!(needs_rewind(&at_switch, 3, &history));

        let replaying_at_switch = LocalPosition {
            in_recovery: true,
            ..at_switch
        };
        assert!(!needs_rewind(&replaying_at_switch, 3, &history));

        let replaying_past = LocalPosition {
            in_recovery: true,
            timeline: 2,
            position: lsn("0/5000001"),
        };
        assert!(needs_rewind(&replaying_past, 3, &history));

        let before_switch = LocalPosition {
            in_recovery: false,
            timeline: 2,
            position: lsn("0/4000000"),
        };
        assert!(!needs_rewind(&before_switch, 3, &history));
    }

    #[test]
    fn rewind_when_history_skips_local_timeline() {
        let local = LocalPosition {
            in_recovery: true,
            timeline: 2,
            position: lsn("0/100"),
        };
        assert!(needs_rewind(&local, 4, &[entry(1, "0/50"), entry(3, "0/900")]));
        assert!(needs_rewind(&local, 4, &[]));
    }

    #[test]
    fn serde_uses_lsn_text() {
        let pos = TimelinePosition::new(2, lsn("0/3000060"));
        let Ok(json) = serde_json::to_string(&pos) else {
            panic!("serialization failed");
        };
        assert_eq!(json, r#"{"timeline":2,"position":"0/3000060"}"#);
        let Ok(back) = serde_json::from_str::<TimelinePosition>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(back, pos);
        assert!(serde_json::from_str::<WalPosition>(r#""bogus""#).is_err());
    }
}
