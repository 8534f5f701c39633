//! `boot-curves` library crate.
//!
//! The binary (`bfit`) is a thin wrapper around this library so that:
//!
//! - the bootstrap and interval code is testable without spawning processes
//! - callers can plug in their own models, guess generators and fit adapters
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod bootstrap;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
