//! Engine - backing-resource arena and the reconciler over it.
//!
//! The engine manages the core data structures:
//! - Arena: slab of realized text/element resources with tree structure
//! - Reconciler: two-pointer keyed diff realizing node trees into the arena
//!
//! Everything here is driven by the projector, which owns the arena and
//! hands the reconciler a split borrow per pass.

pub mod arena;
pub(crate) mod reconcile;

pub use arena::{Arena, ResourceKind};
