//! Node model - the abstract description of desired output.
//!
//! A [`WNode`] is an immutable description of what should be shown: a text
//! run, a tagged element with properties and children, or a component
//! reference to be expanded by the engine. Nodes also carry the realized
//! state (backing resource, instance link) once the engine has processed
//! them; a node belongs to exactly one tree and is replaced, never shared,
//! on update.
//!
//! The [`same`] predicate is the single source of truth for every matching
//! decision in the reconciler. It is pure and O(1).

use std::rc::Rc;

use smallvec::SmallVec;

use crate::diff::DiffMode;
use crate::projector::ExitSignal;
use crate::types::{Event, EventCallback, InstanceId, Props, RegistryLabel, ResourceId, Value};
use crate::widget::WidgetDef;

/// Deferred-property callback: invoked with `inserted = false` at first
/// realization and again with `inserted = true` after the commit.
pub type DeferredProps = Rc<dyn Fn(bool) -> Props>;

/// Presentation effect run when an element is inserted.
pub type EnterEffect = Rc<dyn Fn(ResourceId)>;

/// Presentation effect run when an element is removed. The resource stays
/// alive until the effect calls [`ExitSignal::finish`].
pub type ExitEffect = Rc<dyn Fn(ResourceId, ExitSignal)>;

/// Event listeners attached to an element node.
pub type ListenerList = SmallVec<[(Rc<str>, EventCallback); 2]>;

// =============================================================================
// Node Variants
// =============================================================================

/// A text node: immutable string payload plus its backing resource slot.
#[derive(Clone)]
pub struct TextNode {
    /// The string payload.
    pub text: Rc<str>,
    pub(crate) resource: Option<ResourceId>,
}

/// An element node: tag, property bags, children and presentation hooks.
#[derive(Clone)]
pub struct ElementNode {
    /// Tag identifier.
    pub tag: Rc<str>,
    /// Sibling-distinguishing key.
    pub key: Option<Value>,
    /// Diffed properties.
    pub props: Props,
    /// Raw attributes, always reference-diffed.
    pub attrs: Props,
    /// Raw event listeners.
    pub events: ListenerList,
    /// Strategy for diffing `props` against the previous render.
    pub diff_mode: DiffMode,
    /// Ordered children.
    pub children: Vec<WNode>,
    /// Deferred-property callback (see module docs of [`crate::projector`]).
    pub deferred: Option<DeferredProps>,
    /// Effect run after insertion.
    pub enter: Option<EnterEffect>,
    /// Effect run on removal; may defer the actual resource release.
    pub exit: Option<ExitEffect>,
    /// Pre-existing backing resource to adopt (progressive enhancement).
    pub merge_target: Option<ResourceId>,
    pub(crate) resource: Option<ResourceId>,
    pub(crate) inserted: bool,
}

/// How a component node names its definition.
#[derive(Clone)]
pub enum Definition {
    /// A concrete definition, ready to instantiate.
    Concrete(WidgetDef),
    /// A registry label resolved at realization time.
    Named(RegistryLabel),
}

impl Definition {
    /// Identity comparison: concrete definitions by pointer, labels by
    /// value. A concrete definition is never identical to a label.
    pub fn identical(a: &Definition, b: &Definition) -> bool {
        match (a, b) {
            (Definition::Concrete(x), Definition::Concrete(y)) => Rc::ptr_eq(x, y),
            (Definition::Named(x), Definition::Named(y)) => x == y,
            _ => false,
        }
    }

    /// True for not-yet-resolved registry references.
    pub fn is_named(&self) -> bool {
        matches!(self, Definition::Named(_))
    }
}

/// A component node: definition reference, properties and children, plus
/// the instance link once realized.
#[derive(Clone)]
pub struct ComponentNode {
    /// The component definition or registry label.
    pub definition: Definition,
    /// Sibling-distinguishing key.
    pub key: Option<Value>,
    /// Properties assigned to the instance.
    pub props: Props,
    /// Children handed to the instance.
    pub children: Vec<WNode>,
    pub(crate) instance: Option<InstanceId>,
}

/// A node in the abstract tree.
#[derive(Clone)]
pub enum WNode {
    /// Immutable text run.
    Text(TextNode),
    /// Tagged element.
    Element(ElementNode),
    /// Component reference.
    Component(ComponentNode),
}

impl WNode {
    /// The node's distinguishing key, when it carries one.
    pub fn key(&self) -> Option<&Value> {
        match self {
            WNode::Text(_) => None,
            WNode::Element(e) => e.key.as_ref(),
            WNode::Component(c) => c.key.as_ref(),
        }
    }

    /// The realized instance handle of a component node.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            WNode::Component(c) => c.instance,
            _ => None,
        }
    }

    /// The realized backing resource of a text or element node.
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            WNode::Text(t) => t.resource,
            WNode::Element(e) => e.resource,
            WNode::Component(_) => None,
        }
    }

    /// Short description for diagnostics.
    pub(crate) fn describe(&self) -> String {
        match self {
            WNode::Text(t) => format!("text {:?}", t.text),
            WNode::Element(e) => match &e.key {
                Some(k) => format!("element <{}> key={k:?}", e.tag),
                None => format!("element <{}>", e.tag),
            },
            WNode::Component(c) => match &c.definition {
                Definition::Concrete(def) => format!("component {}", def.name()),
                Definition::Named(label) => format!("component {label:?}"),
            },
        }
    }
}

// =============================================================================
// Sameness
// =============================================================================

fn keys_match(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Value::identical(x, y),
        _ => false,
    }
}

/// Decide whether the backing state of `a` can be reused for `b`.
///
/// Elements are same when tag and key match and, if either side pins an
/// explicit backing resource, the identities agree. Components are same
/// when the definition reference is identical and the key matches, except
/// that an un-instantiated previous node can never match a still-unresolved
/// registry reference. Mixed variants are never same; two text nodes
/// always are (the payload is patched in place).
pub fn same(a: &WNode, b: &WNode) -> bool {
    match (a, b) {
        (WNode::Text(_), WNode::Text(_)) => true,
        (WNode::Element(ea), WNode::Element(eb)) => {
            if ea.merge_target.is_some() || eb.merge_target.is_some() {
                if ea.merge_target != eb.merge_target {
                    return false;
                }
            }
            ea.tag == eb.tag && keys_match(ea.key.as_ref(), eb.key.as_ref())
        }
        (WNode::Component(ca), WNode::Component(cb)) => {
            // A pending registry reference can never be identical to a
            // node that was never realized.
            if ca.instance.is_none() && cb.definition.is_named() {
                return false;
            }
            Definition::identical(&ca.definition, &cb.definition)
                && keys_match(ca.key.as_ref(), cb.key.as_ref())
        }
        _ => false,
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Create a text node.
pub fn text(content: impl Into<Rc<str>>) -> WNode {
    WNode::Text(TextNode {
        text: content.into(),
        resource: None,
    })
}

/// Start building an element node.
pub fn element(tag: impl Into<Rc<str>>) -> ElementBuilder {
    ElementBuilder {
        node: ElementNode {
            tag: tag.into(),
            key: None,
            props: Props::new(),
            attrs: Props::new(),
            events: SmallVec::new(),
            diff_mode: DiffMode::Auto,
            children: Vec::new(),
            deferred: None,
            enter: None,
            exit: None,
            merge_target: None,
            resource: None,
            inserted: false,
        },
    }
}

/// Start building a component node from a concrete definition.
pub fn component(def: &WidgetDef) -> ComponentBuilder {
    ComponentBuilder {
        node: ComponentNode {
            definition: Definition::Concrete(def.clone()),
            key: None,
            props: Props::new(),
            children: Vec::new(),
            instance: None,
        },
    }
}

/// Start building a component node resolved through the registry.
pub fn named(label: impl Into<RegistryLabel>) -> ComponentBuilder {
    ComponentBuilder {
        node: ComponentNode {
            definition: Definition::Named(label.into()),
            key: None,
            props: Props::new(),
            children: Vec::new(),
            instance: None,
        },
    }
}

/// Builder for [`ElementNode`].
pub struct ElementBuilder {
    node: ElementNode,
}

impl ElementBuilder {
    /// Set the distinguishing key.
    pub fn key(mut self, key: impl Into<Value>) -> Self {
        self.node.key = Some(key.into());
        self
    }

    /// Add a diffed property.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.node.props.insert(key, value);
        self
    }

    /// Replace the whole property bag.
    pub fn props(mut self, props: Props) -> Self {
        self.node.props = props;
        self
    }

    /// Add a raw attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.node.attrs.insert(key, value);
        self
    }

    /// Attach an event listener.
    pub fn on(mut self, name: impl Into<Rc<str>>, callback: impl Fn(&Event) + 'static) -> Self {
        self.node.events.push((name.into(), Rc::new(callback)));
        self
    }

    /// Override the property diff strategy for this element.
    pub fn diff_mode(mut self, mode: DiffMode) -> Self {
        self.node.diff_mode = mode;
        self
    }

    /// Append a child node.
    pub fn child(mut self, child: WNode) -> Self {
        self.node.children.push(child);
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = WNode>) -> Self {
        self.node.children.extend(children);
        self
    }

    /// Install the deferred-property callback.
    pub fn deferred(mut self, f: impl Fn(bool) -> Props + 'static) -> Self {
        self.node.deferred = Some(Rc::new(f));
        self
    }

    /// Install an enter effect, run after insertion.
    pub fn enter(mut self, f: impl Fn(ResourceId) + 'static) -> Self {
        self.node.enter = Some(Rc::new(f));
        self
    }

    /// Install an exit effect; removal waits for the effect to finish.
    pub fn exit(mut self, f: impl Fn(ResourceId, ExitSignal) + 'static) -> Self {
        self.node.exit = Some(Rc::new(f));
        self
    }

    /// Adopt a pre-existing backing resource instead of creating one.
    pub fn merge(mut self, target: ResourceId) -> Self {
        self.node.merge_target = Some(target);
        self
    }

    /// Finish building.
    pub fn build(self) -> WNode {
        WNode::Element(self.node)
    }
}

/// Builder for [`ComponentNode`].
pub struct ComponentBuilder {
    node: ComponentNode,
}

impl ComponentBuilder {
    /// Set the distinguishing key.
    pub fn key(mut self, key: impl Into<Value>) -> Self {
        self.node.key = Some(key.into());
        self
    }

    /// Add a property.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.node.props.insert(key, value);
        self
    }

    /// Replace the whole property bag.
    pub fn props(mut self, props: Props) -> Self {
        self.node.props = props;
        self
    }

    /// Append a child node.
    pub fn child(mut self, child: WNode) -> Self {
        self.node.children.push(child);
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = WNode>) -> Self {
        self.node.children.extend(children);
        self
    }

    /// Finish building.
    pub fn build(self) -> WNode {
        WNode::Component(self.node)
    }
}

// =============================================================================
// Tests
// =============================================================================
