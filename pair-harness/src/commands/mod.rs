//! Command implementations for the pair-harness CLI

pub mod list;
pub mod run;
