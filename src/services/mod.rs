//! Service layer: domain operations on the room plus the background tasks
//! and transport-facing handlers built on them.

pub mod bid_service;
pub mod broadcast;
pub mod driver;
pub mod host_service;
pub mod persistence;
pub mod sale_service;
pub mod socket_service;
pub mod sse_service;
pub mod team_service;
