//! Utility modules shared across the crate.

pub mod graph;
