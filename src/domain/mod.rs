//! Domain layer: replication positions, quorum specs, cluster topology,
//! roles, and the event system.
//!
//! Nothing in here talks to a database or the coordination store; every
//! type is derived fresh from probes on each tick and only compared.

pub mod cluster;
pub mod event_bus;
pub mod ha_event;
pub mod lsn;
pub mod role;
pub mod sync_standby;

pub use cluster::{Cluster, HaConfig, Leader, Member, MemberHealth, MemberStatus};
pub use event_bus::EventBus;
pub use ha_event::HaEvent;
pub use lsn::{HistoryEntry, LocalPosition, Timeline, TimelinePosition, WalPosition};
pub use role::{HaState, ReplicationMode, Role, WalKind};
pub use sync_standby::{SyncMethod, SyncStandbySpec};
