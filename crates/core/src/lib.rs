//! Core domain for finsync: the record model, the storage adapter contract
//! every backend implements, and the persisted-state migration engine.

pub mod auth;
pub mod errors;
pub mod migrations;
pub mod model;
pub mod storage;

pub use errors::{Error, Result, WriteSide};
