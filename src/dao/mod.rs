//! Persistence layer: snapshot entities and the filesystem-backed store.

pub mod models;
pub mod snapshot_store;
pub mod storage;
