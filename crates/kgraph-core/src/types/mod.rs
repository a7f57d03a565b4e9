//! Core types for kgraph.

mod attributes;
mod document;
mod entity;
mod ids;
mod relationship;

pub use attributes::*;
pub use document::*;
pub use entity::*;
pub use ids::*;
pub use relationship::*;
