//! Reporting: interval tables and run summaries for the terminal.

pub mod format;

pub use format::*;
