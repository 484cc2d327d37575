//! Repository layer for job persistence.

pub mod job;
pub mod memory;

pub use job::*;
pub use memory::*;
