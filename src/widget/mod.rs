//! Widget contract and component definitions.
//!
//! A *widget* is the user-supplied object behind a component node: it
//! renders a node tree from its assigned properties and children, and may
//! hook attachment and detachment. A [`WidgetType`] is the engine-facing
//! definition of a widget kind: the factory that constructs instances,
//! the decorator/aspect pipeline, per-property diff overrides, and the
//! no-bind set. Aspect lists are flattened across the `inherits` chain
//! once, when the type is built.

pub(crate) mod instance;

pub use instance::current_widget;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::warn;

use crate::diff::DiffMode;
use crate::node::WNode;
use crate::projector::Invalidator;
use crate::registry::RegistryHandler;
use crate::types::{Props, ResourceId, Value};

// =============================================================================
// Widget Contract
// =============================================================================

/// Everything a widget can reach during a render.
pub struct RenderContext<'a> {
    props: &'a Props,
    children: Option<Vec<WNode>>,
    invalidator: &'a Invalidator,
    registry: &'a Rc<RegistryHandler>,
    nodes: &'a NodeHandles,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        props: &'a Props,
        children: Vec<WNode>,
        invalidator: &'a Invalidator,
        registry: &'a Rc<RegistryHandler>,
        nodes: &'a NodeHandles,
    ) -> Self {
        Self {
            props,
            children: Some(children),
            invalidator,
            registry,
            nodes,
        }
    }

    /// The current property bag.
    pub fn props(&self) -> &Props {
        self.props
    }

    /// Convenience lookup into the property bag.
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    /// Take the children assigned to this component. Children can be
    /// embedded in the render output exactly once.
    pub fn take_children(&mut self) -> Vec<WNode> {
        self.children.take().unwrap_or_default()
    }

    /// Request a re-render of this instance.
    pub fn invalidate(&self) {
        self.invalidator.invalidate();
    }

    /// The instance's registry handler, for nested label resolution.
    pub fn registry(&self) -> &Rc<RegistryHandler> {
        self.registry
    }

    /// Backing-resource lookup for this instance's keyed elements.
    pub fn nodes(&self) -> &NodeHandles {
        self.nodes
    }
}

/// The component contract. Constructed by the engine through a
/// [`WidgetType`] factory; rendered, attached and detached by the engine.
pub trait Widget: 'static {
    /// Produce the desired output for the current properties/children.
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Vec<WNode>;

    /// Called after the instance's first output is committed.
    fn on_attach(&mut self) {}

    /// Called when the instance is no longer matched by the diff.
    fn on_detach(&mut self) {}
}

/// Engine-supplied capabilities handed to a widget factory.
pub struct WidgetSeed {
    /// Marks the instance dirty and schedules a pass.
    pub invalidator: Invalidator,
    /// Scoped registry lookup.
    pub registry: Rc<RegistryHandler>,
    /// Label→backing-resource lookup, cleared every render.
    pub nodes: NodeHandles,
}

/// Factory constructing widget instances.
pub type WidgetFactory = Box<dyn Fn(&WidgetSeed) -> Rc<RefCell<dyn Widget>>>;

// =============================================================================
// Node Handles
// =============================================================================

/// Per-instance lookup from element key to realized backing resource.
///
/// Populated while the instance's output is realized; cleared at the start
/// of every render so stale handles never survive a structural change.
#[derive(Clone, Default)]
pub struct NodeHandles {
    map: Rc<RefCell<HashMap<String, ResourceId>>>,
}

impl NodeHandles {
    /// Resource realized for the element with the given string key.
    pub fn get(&self, key: &str) -> Option<ResourceId> {
        self.map.borrow().get(key).copied()
    }

    pub(crate) fn insert(&self, key: String, resource: ResourceId) {
        self.map.borrow_mut().insert(key, resource);
    }

    pub(crate) fn clear(&self) {
        self.map.borrow_mut().clear();
    }
}

// =============================================================================
// Aspect Pipeline
// =============================================================================

/// The render callable threaded through before-render aspects.
pub type RenderFn = Rc<dyn Fn(&mut dyn Widget, &mut RenderContext<'_>) -> Vec<WNode>>;

/// Transforms the incoming property bag before assignment.
pub type BeforePropertiesAspect = Rc<dyn Fn(Props) -> Option<Props>>;

/// Wraps the render callable.
pub type BeforeRenderAspect = Rc<dyn Fn(RenderFn) -> Option<RenderFn>>;

/// Transforms the produced output.
pub type AfterRenderAspect = Rc<dyn Fn(Vec<WNode>) -> Option<Vec<WNode>>>;

/// Reaction fired when a property's computed result changes, with the
/// previous and next value.
pub type Reaction = Rc<dyn Fn(Option<&Value>, Option<&Value>)>;

/// Flattened aspect lists for one concrete type.
#[derive(Clone, Default)]
pub struct AspectSet {
    pub(crate) before_properties: Vec<BeforePropertiesAspect>,
    pub(crate) before_render: Vec<BeforeRenderAspect>,
    pub(crate) after_render: Vec<AfterRenderAspect>,
}

/// Run a value-threading aspect chain. A hook that fails to return a
/// continuation value is skipped with a warning and the previous valid
/// value is kept; rendering never aborts over a misbehaving aspect.
pub(crate) fn thread_aspects<T>(
    kind: &str,
    type_name: &str,
    aspects: &[Rc<dyn Fn(T) -> Option<T>>],
    mut value: T,
) -> T
where
    T: Clone,
{
    for aspect in aspects {
        match aspect(value.clone()) {
            Some(next) => value = next,
            None => {
                warn!(
                    widget = type_name,
                    aspect = kind,
                    "aspect returned no continuation value; previous value kept"
                );
            }
        }
    }
    value
}

// =============================================================================
// Widget Type
// =============================================================================

/// Per-property diff override.
#[derive(Clone)]
pub struct PropertySpec {
    /// Strategy applied to this key.
    pub mode: DiffMode,
    /// Optional reaction fired when the key changed.
    pub reaction: Option<Reaction>,
}

/// A component definition: everything the engine needs to instantiate and
/// maintain one kind of widget. Compared by `Rc` identity.
pub struct WidgetType {
    name: Rc<str>,
    factory: WidgetFactory,
    aspects: AspectSet,
    properties: HashMap<String, PropertySpec>,
    no_bind: HashSet<String>,
}

/// Shared handle to a [`WidgetType`].
pub type WidgetDef = Rc<WidgetType>;

impl WidgetType {
    /// Start building a definition around a factory.
    pub fn builder<W, F>(name: impl Into<Rc<str>>, factory: F) -> WidgetTypeBuilder
    where
        W: Widget,
        F: Fn(&WidgetSeed) -> W + 'static,
    {
        WidgetTypeBuilder {
            name: name.into(),
            factory: Box::new(move |seed| Rc::new(RefCell::new(factory(seed)))),
            inherits: None,
            aspects: AspectSet::default(),
            properties: HashMap::new(),
            no_bind: HashSet::new(),
        }
    }

    /// Definition for a widget with no state of its own: just a render
    /// function over the context.
    pub fn stateless(
        name: impl Into<Rc<str>>,
        render: impl Fn(&mut RenderContext<'_>) -> Vec<WNode> + 'static,
    ) -> WidgetDef {
        let render = Rc::new(render);
        WidgetType::builder(name, move |_seed| Stateless {
            render: render.clone(),
        })
        .build()
    }

    /// Type name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn create(&self, seed: &WidgetSeed) -> Rc<RefCell<dyn Widget>> {
        (self.factory)(seed)
    }

    pub(crate) fn aspects(&self) -> &AspectSet {
        &self.aspects
    }

    pub(crate) fn property_spec(&self, key: &str) -> Option<&PropertySpec> {
        self.properties.get(key)
    }

    pub(crate) fn has_property_overrides(&self) -> bool {
        !self.properties.is_empty()
    }

    pub(crate) fn is_no_bind(&self, key: &str) -> bool {
        self.no_bind.contains(key)
    }
}

struct Stateless {
    render: Rc<dyn Fn(&mut RenderContext<'_>) -> Vec<WNode>>,
}

impl Widget for Stateless {
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Vec<WNode> {
        (self.render)(ctx)
    }
}

/// Builder for [`WidgetType`]. Inherited aspects and property overrides
/// are flattened here, once per concrete type: parent hooks run before
/// the type's own, and own property overrides shadow inherited ones.
pub struct WidgetTypeBuilder {
    name: Rc<str>,
    factory: WidgetFactory,
    inherits: Option<WidgetDef>,
    aspects: AspectSet,
    properties: HashMap<String, PropertySpec>,
    no_bind: HashSet<String>,
}

impl WidgetTypeBuilder {
    /// Inherit aspects, property overrides and no-bind keys from another
    /// definition.
    pub fn inherits(mut self, parent: &WidgetDef) -> Self {
        self.inherits = Some(parent.clone());
        self
    }

    /// Add a before-properties aspect.
    pub fn before_properties(mut self, f: impl Fn(Props) -> Option<Props> + 'static) -> Self {
        self.aspects.before_properties.push(Rc::new(f));
        self
    }

    /// Add a before-render aspect wrapping the render callable.
    pub fn before_render(mut self, f: impl Fn(RenderFn) -> Option<RenderFn> + 'static) -> Self {
        self.aspects.before_render.push(Rc::new(f));
        self
    }

    /// Add an after-render aspect transforming the output.
    pub fn after_render(
        mut self,
        f: impl Fn(Vec<WNode>) -> Option<Vec<WNode>> + 'static,
    ) -> Self {
        self.aspects.after_render.push(Rc::new(f));
        self
    }

    /// Override the diff strategy for one property.
    pub fn property(mut self, key: impl Into<String>, mode: DiffMode) -> Self {
        self.properties.insert(
            key.into(),
            PropertySpec {
                mode,
                reaction: None,
            },
        );
        self
    }

    /// Override the diff strategy and install a reaction for one property.
    pub fn property_with_reaction(
        mut self,
        key: impl Into<String>,
        mode: DiffMode,
        reaction: impl Fn(Option<&Value>, Option<&Value>) + 'static,
    ) -> Self {
        self.properties.insert(
            key.into(),
            PropertySpec {
                mode,
                reaction: Some(Rc::new(reaction)),
            },
        );
        self
    }

    /// Exempt a handler-valued property from context binding.
    pub fn no_bind(mut self, key: impl Into<String>) -> Self {
        self.no_bind.insert(key.into());
        self
    }

    /// Flatten the inheritance chain and finish the definition.
    pub fn build(self) -> WidgetDef {
        let mut aspects = AspectSet::default();
        let mut properties = HashMap::new();
        let mut no_bind = HashSet::new();

        if let Some(parent) = &self.inherits {
            aspects = parent.aspects.clone();
            properties = parent.properties.clone();
            no_bind = parent.no_bind.clone();
        }
        aspects
            .before_properties
            .extend(self.aspects.before_properties);
        aspects.before_render.extend(self.aspects.before_render);
        aspects.after_render.extend(self.aspects.after_render);
        properties.extend(self.properties);
        no_bind.extend(self.no_bind);

        Rc::new(WidgetType {
            name: self.name,
            factory: self.factory,
            aspects,
            properties,
            no_bind,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
