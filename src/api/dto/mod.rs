//! Data Transfer Objects for REST request/response serialization.
//!
//! WAL positions are serialized in the engine's `XXXX/YYYYYYYY` text form.

pub mod ha_dto;
pub mod member_dto;

pub use ha_dto::*;
pub use member_dto::*;
