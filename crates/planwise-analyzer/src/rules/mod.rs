//! Rules Engine
//!
//! Each rule is a pure predicate over a plan node, its ancestor chain and
//! the query's features. The engine walks the plan once and reports
//! findings in rule-declaration order.

mod builtin;
mod engine;
mod finding;

pub use builtin::*;
pub use engine::*;
pub use finding::*;
