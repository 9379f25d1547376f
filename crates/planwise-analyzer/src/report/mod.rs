//! Recommendation reports
//!
//! Ties the pipeline together: features and plan in, ordered scored
//! findings out, with room for validation evidence appended later.

mod evidence;
mod orchestrator;
mod summary;

pub use evidence::*;
pub use orchestrator::*;
pub use summary::*;
