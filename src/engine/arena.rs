//! Backing-resource arena.
//!
//! Realized output lives here as a slab of text and element resources,
//! each with a parent link and an ordered child list. The arena is the
//! engine's single mutation surface: reconciliation expresses every
//! structural decision as create/insert/detach/remove calls against it,
//! and an embedder reads the committed tree back out through the
//! accessor methods.

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::types::{Props, ResourceId, Value};

/// What kind of output a resource backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Text,
    Element,
}

/// One realized resource.
pub(crate) struct Resource {
    pub kind: ResourceKind,
    /// Tag for elements, text content for text resources.
    pub label: String,
    pub parent: Option<ResourceId>,
    pub children: SmallVec<[ResourceId; 4]>,
    pub props: Props,
    pub attrs: Props,
}

/// Slab of realized resources plus the tree structure over them.
#[derive(Default)]
pub struct Arena {
    resources: SlotMap<ResourceId, Resource>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Creation and Structure
    // =========================================================================

    pub(crate) fn create_element(&mut self, tag: &str) -> ResourceId {
        self.resources.insert(Resource {
            kind: ResourceKind::Element,
            label: tag.to_string(),
            parent: None,
            children: SmallVec::new(),
            props: Props::new(),
            attrs: Props::new(),
        })
    }

    pub(crate) fn create_text(&mut self, text: &str) -> ResourceId {
        self.resources.insert(Resource {
            kind: ResourceKind::Text,
            label: text.to_string(),
            parent: None,
            children: SmallVec::new(),
            props: Props::new(),
            attrs: Props::new(),
        })
    }

    /// Register an externally created root element. Used when an existing
    /// resource is adopted rather than built by reconciliation.
    pub fn adopt_root(&mut self, tag: &str) -> ResourceId {
        self.create_element(tag)
    }

    /// Insert `child` under `parent`, before `anchor` when given, at the
    /// end otherwise. Detaches the child from any previous parent first,
    /// so a move is a single call.
    pub(crate) fn insert_before(
        &mut self,
        parent: ResourceId,
        child: ResourceId,
        anchor: Option<ResourceId>,
    ) {
        self.detach(child);
        let slot = anchor.and_then(|a| {
            self.resources[parent].children.iter().position(|&c| c == a)
        });
        match slot {
            Some(index) => self.resources[parent].children.insert(index, child),
            None => self.resources[parent].children.push(child),
        }
        self.resources[child].parent = Some(parent);
    }

    /// Unlink a resource from its parent without destroying it.
    pub(crate) fn detach(&mut self, id: ResourceId) {
        let Some(parent) = self.resources.get(id).and_then(|r| r.parent) else {
            return;
        };
        self.resources[parent].children.retain(|c| *c != id);
        self.resources[id].parent = None;
    }

    /// Detach and destroy a resource and everything under it. Returns the
    /// destroyed ids in document order, the root first.
    pub(crate) fn remove_subtree(&mut self, id: ResourceId) -> Vec<ResourceId> {
        self.detach(id);
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(resource) = self.resources.remove(next) {
                removed.push(next);
                stack.extend(resource.children.iter().rev());
            }
        }
        removed
    }

    /// Destroy a single already-detached resource.
    pub(crate) fn destroy(&mut self, id: ResourceId) {
        self.resources.remove(id);
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    pub(crate) fn set_text(&mut self, id: ResourceId, text: &str) {
        self.resources[id].label = text.to_string();
    }

    pub(crate) fn set_prop(&mut self, id: ResourceId, key: &str, value: Value) {
        self.resources[id].props.insert(key, value);
    }

    pub(crate) fn remove_prop(&mut self, id: ResourceId, key: &str) {
        self.resources[id].props.remove(key);
    }

    pub(crate) fn set_attr(&mut self, id: ResourceId, key: &str, value: Value) {
        self.resources[id].attrs.insert(key, value);
    }

    pub(crate) fn remove_attr(&mut self, id: ResourceId, key: &str) {
        self.resources[id].attrs.remove(key);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.resources.get(id).map(|r| r.kind)
    }

    /// Element tag name. `None` for text resources.
    pub fn tag(&self, id: ResourceId) -> Option<&str> {
        self.resources
            .get(id)
            .filter(|r| r.kind == ResourceKind::Element)
            .map(|r| r.label.as_str())
    }

    /// Text content. `None` for element resources.
    pub fn text(&self, id: ResourceId) -> Option<&str> {
        self.resources
            .get(id)
            .filter(|r| r.kind == ResourceKind::Text)
            .map(|r| r.label.as_str())
    }

    pub fn parent(&self, id: ResourceId) -> Option<ResourceId> {
        self.resources.get(id).and_then(|r| r.parent)
    }

    pub fn children(&self, id: ResourceId) -> &[ResourceId] {
        self.resources
            .get(id)
            .map(|r| r.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn prop(&self, id: ResourceId, key: &str) -> Option<&Value> {
        self.resources.get(id).and_then(|r| r.props.get(key))
    }

    pub fn attr(&self, id: ResourceId, key: &str) -> Option<&Value> {
        self.resources.get(id).and_then(|r| r.attrs.get(key))
    }

    /// Live property bag of a resource.
    pub fn props(&self, id: ResourceId) -> Option<&Props> {
        self.resources.get(id).map(|r| &r.props)
    }

    /// Live attribute bag of a resource.
    pub fn attrs(&self, id: ResourceId) -> Option<&Props> {
        self.resources.get(id).map(|r| &r.attrs)
    }

    /// Total live resources, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
