//! Helper functions/traits/macros, diagnostics rendering, byte conversion

#[macro_use]
pub mod misc;
pub mod diag;
pub mod into_bytes;
