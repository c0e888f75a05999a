//! # modemctl – shared types
//!
//! Status rows produced by discovery and session steps, and the sinks
//! that present them.

pub mod status;

pub use status::*;
