//! Traits for the engine's external collaborators.

mod embedder;
mod index_sync;
mod lock;

pub use embedder::*;
pub use index_sync::*;
pub use lock::*;
