//! Fleet Runner: task dispatch across independently provisioned workers.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod resource;
pub mod roster;
pub mod simulate;
pub mod task;
