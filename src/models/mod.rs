//! Model functions.
//!
//! Models are small, pure functions of `(x, params)` so that fitting and
//! resampling code can stay generic over them.

pub mod model;

pub use model::*;
