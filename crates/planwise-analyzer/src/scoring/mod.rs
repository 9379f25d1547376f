//! Confidence and impact scoring for findings

mod score;

pub use score::*;
