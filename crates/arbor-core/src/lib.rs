//! Arbor core - pure data structures behind the broadcast node
//!
//! - [`tree`] - implicit k-ary fan-out tree over a fixed membership list
//! - [`seen`] - grow-only, insertion-ordered log of observed values
//! - [`id`] - node identity

pub mod id;
pub mod seen;
pub mod tree;

pub use id::NodeId;
pub use seen::{SeenLog, Value};
pub use tree::Tree;
