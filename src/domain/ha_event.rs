//! Domain events reflecting coordinator decisions.
//!
//! Every state transition and every engine command emits an [`HaEvent`]
//! through the [`super::EventBus`]. Events are streamed to WebSocket
//! subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::role::HaState;

/// Domain event emitted by the coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum HaEvent {
    /// The coordinator moved between states.
    StateChanged {
        /// Local member.
        member: String,
        /// Previous state.
        from: HaState,
        /// New state.
        to: HaState,
        /// Transition timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The local node was promoted.
    Promoted {
        /// Local member.
        member: String,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The local node's writable service was stopped.
    Demoted {
        /// Local member.
        member: String,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Local data was rewound to the new leader's history.
    Rewound {
        /// Local member.
        member: String,
        /// Rewind source.
        leader: String,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Replication was pointed at a new upstream.
    FollowReconfigured {
        /// Local member.
        member: String,
        /// New upstream.
        leader: String,
        /// Whether the engine was restarted rather than reloaded.
        restarted: bool,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An engine command failed and will be retried next tick.
    CommandFailed {
        /// Local member.
        member: String,
        /// Command name (`promote`, `demote`, `follow`, `recover`).
        command: String,
        /// Error message.
        error: String,
        /// Failure timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A tick was aborted before reaching a decision.
    TickFailed {
        /// Local member.
        member: String,
        /// Error message.
        error: String,
        /// Failure timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Health verdicts computed during a tick.
    HealthReported {
        /// Local member.
        member: String,
        /// Verdict for the local member.
        healthy: bool,
        /// Other members currently eligible for promotion.
        candidates: Vec<String>,
        /// Report timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl HaEvent {
    /// Member the event originated from.
    #[must_use]
    pub fn member(&self) -> &str {
        match self {
            Self::StateChanged { member, .. }
            | Self::Promoted { member, .. }
            | Self::Demoted { member, .. }
            | Self::Rewound { member, .. }
            | Self::FollowReconfigured { member, .. }
            | Self::CommandFailed { member, .. }
            | Self::TickFailed { member, .. }
            | Self::HealthReported { member, .. } => member,
        }
    }

    /// Discriminator string, matching the serialized `event_type`.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Promoted { .. } => "promoted",
            Self::Demoted { .. } => "demoted",
            Self::Rewound { .. } => "rewound",
            Self::FollowReconfigured { .. } => "follow_reconfigured",
            Self::CommandFailed { .. } => "command_failed",
            Self::TickFailed { .. } => "tick_failed",
            Self::HealthReported { .. } => "health_reported",
        }
    }
}
