//! Raw scan table schema
//!
//! This module defines the row-oriented input contract (one JSON object per
//! scan) and the loader that turns it into typed, ordered scans.

mod loader;
mod raw_row;

pub use loader::*;
pub use raw_row::*;
