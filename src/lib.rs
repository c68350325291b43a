//! # weft
//!
//! Component-based UI reconciliation engine for Rust.
//!
//! weft keeps a retained tree of backing resources in sync with an
//! abstract node tree produced by widget render functions. Each render
//! pass diffs the new description against the previous one with a greedy
//! keyed matcher, preserving component instances and backing resources
//! wherever the [`node::same`] predicate holds.
//!
//! ## Architecture
//!
//! ```text
//! Widget render → WNode tree → reconciler → Arena (backing resources)
//!                       ↑                        |
//!                  invalidate() ← scheduler ← embedder tick
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core types (Value, Props, RegistryLabel, ids)
//! - [`node`] - Node model, builders, and the `same()` predicate
//! - [`diff`] - Property change-detection strategies
//! - [`widget`] - Widget contract, definitions, aspect pipeline
//! - [`registry`] - Label→definition registry with deferred resolution
//! - [`engine`] - Backing-resource arena and the reconciler
//! - [`projector`] - Attached tree, scheduler, batched render passes

pub mod diff;
pub mod engine;
pub mod error;
pub mod node;
pub mod projector;
pub mod registry;
pub mod types;
pub mod widget;

// Re-export commonly used items
pub use types::{Event, EventCallback, InstanceId, Props, RegistryLabel, ResourceId, Value};

pub use diff::{value_changed, DiffMode};

pub use node::{
    component, element, named, same, text, ComponentBuilder, ComponentNode, Definition,
    ElementBuilder, ElementNode, TextNode, WNode,
};

pub use engine::{Arena, ResourceKind};

pub use error::WeftError;

pub use projector::{ExitSignal, Invalidator, Projector, ProjectorMode};

pub use registry::{Injector, Precedence, Registry, RegistryHandler};

pub use widget::{
    current_widget, NodeHandles, PropertySpec, RenderContext, Widget, WidgetDef, WidgetSeed,
    WidgetType, WidgetTypeBuilder,
};
