//! Type definitions for hub data
//!
//! Entity snapshots, state-change events and the result shapes of the
//! recorder (statistics) and history queries.

mod entity;
mod history;
mod statistics;

pub use entity::*;
pub use history::*;
pub use statistics::*;
