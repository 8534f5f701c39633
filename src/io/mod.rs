//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - ensemble CSV export (`export`)
//! - curve band JSON read/write (`band`)

pub mod band;
pub mod export;
pub mod ingest;

pub use band::*;
pub use export::*;
pub use ingest::*;
