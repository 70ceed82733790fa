//! Storage adapter contract and change-notification primitives.

mod adapter;
mod listeners;

pub use adapter::*;
pub use listeners::*;
