//! Wire-level data transfer objects for the WebSocket and SSE surfaces.

pub mod command;
pub mod event;
pub mod view;
