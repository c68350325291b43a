//! Error types for configuration misuse.
//!
//! Only programmer errors at setup time are fatal. Unresolved registry
//! labels render as empty output, and indistinguishable-sibling conditions
//! are reported on the warning channel; neither surfaces here.

use thiserror::Error;

use crate::types::ResourceId;

/// Fatal setup errors returned by projector entry points.
#[derive(Debug, Error)]
pub enum WeftError {
    /// The projector already owns an attached tree.
    #[error("projector is already attached")]
    AlreadyAttached,

    /// The operation requires an attached tree.
    #[error("projector is not attached")]
    NotAttached,

    /// The execution mode is fixed once a tree is attached.
    #[error("render mode cannot be changed after attachment")]
    ModeChangeAfterAttach,

    /// Merge attachment requires a known element target whose existing
    /// children line up tag for tag with the rendered output.
    #[error("merge target {0:?} is unknown or does not match the rendered output")]
    MergeTargetMismatch(ResourceId),
}
