//! Query Feature Extraction
//!
//! Parses query text into the structured facts the rules need: which tables
//! are read, which columns are filtered on, and what the query orders or
//! groups by.

mod extract;

pub use extract::*;
