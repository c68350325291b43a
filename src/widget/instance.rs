//! Component instance - the live, stateful realization of a component node.
//!
//! One record per component-node occurrence that survives diffing. The
//! record owns the current property bag, the child sequence awaiting the
//! next render, dirty/lifecycle flags, the per-instance registry handler,
//! the node-handle map and the handler bind cache. It is created lazily
//! when its node is first realized and destroyed the moment the diff no
//! longer matches it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use bitflags::bitflags;

use super::{thread_aspects, NodeHandles, RenderContext, RenderFn, Widget, WidgetDef};
use crate::diff::{value_changed, DiffMode};
use crate::node::WNode;
use crate::projector::Invalidator;
use crate::registry::RegistryHandler;
use crate::types::{EventCallback, InstanceId, Props, ResourceId, Value};

bitflags! {
    /// Lifecycle state of one instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstanceFlags: u8 {
        /// A re-render is pending.
        const DIRTY = 1 << 0;
        /// The instance's own render is executing.
        const RENDERING = 1 << 1;
        /// Initial construction render; invalidations are suppressed.
        const INITIALIZING = 1 << 2;
        /// The instance has been disposed.
        const DISPOSED = 1 << 3;
    }
}

/// State shared between the instance record and its [`Invalidator`].
pub(crate) struct InstanceShared {
    pub flags: Cell<InstanceFlags>,
    pub depth: Cell<usize>,
    pub id: Cell<InstanceId>,
}

impl InstanceShared {
    pub fn new(depth: usize) -> Rc<Self> {
        Rc::new(InstanceShared {
            flags: Cell::new(InstanceFlags::INITIALIZING),
            depth: Cell::new(depth),
            id: Cell::new(InstanceId::default()),
        })
    }

    pub fn set(&self, flag: InstanceFlags) {
        self.flags.set(self.flags.get() | flag);
    }

    pub fn clear(&self, flag: InstanceFlags) {
        self.flags.set(self.flags.get() - flag);
    }

    pub fn has(&self, flag: InstanceFlags) -> bool {
        self.flags.get().contains(flag)
    }
}

// =============================================================================
// Current-Widget Context
// =============================================================================

thread_local! {
    /// Stack of instances whose bound handlers are currently executing.
    static CONTEXT_STACK: RefCell<Vec<InstanceId>> = const { RefCell::new(Vec::new()) };
}

/// The instance whose bound handler is currently running, if any.
pub fn current_widget() -> Option<InstanceId> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
}

fn push_context(id: InstanceId) {
    CONTEXT_STACK.with(|stack| stack.borrow_mut().push(id));
}

fn pop_context() {
    CONTEXT_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

// =============================================================================
// Instance Record
// =============================================================================

pub(crate) struct InstanceRecord {
    pub def: WidgetDef,
    pub widget: Rc<RefCell<dyn Widget>>,
    pub shared: Rc<InstanceShared>,
    pub invalidator: Invalidator,
    pub registry: Rc<RegistryHandler>,
    pub nodes: NodeHandles,
    /// Current property bag, post-merge.
    pub props: Props,
    /// False until the first assignment; gates the cheap pass-through.
    pub props_assigned: bool,
    /// Children awaiting the next render.
    pub children: Vec<WNode>,
    /// Most recently committed output.
    pub rendered: Vec<WNode>,
    /// Backing parent the output realizes under.
    pub containing: ResourceId,
    /// Bound-handler memo, keyed by original handler address; the
    /// original is kept alongside the wrapper so a cache hit can be
    /// confirmed with `Rc::ptr_eq` (an address alone can be reused by a
    /// later allocation).
    bound: HashMap<usize, (EventCallback, EventCallback)>,
}

impl InstanceRecord {
    pub fn new(
        def: WidgetDef,
        widget: Rc<RefCell<dyn Widget>>,
        shared: Rc<InstanceShared>,
        invalidator: Invalidator,
        registry: Rc<RegistryHandler>,
        nodes: NodeHandles,
        containing: ResourceId,
    ) -> Self {
        InstanceRecord {
            def,
            widget,
            shared,
            invalidator,
            registry,
            nodes,
            props: Props::new(),
            props_assigned: false,
            children: Vec::new(),
            rendered: Vec::new(),
            containing,
            bound: HashMap::new(),
        }
    }

    // =========================================================================
    // Property Assignment
    // =========================================================================

    /// Run the full property pipeline: before-properties aspects, the
    /// change-detection walk, reactions, handler binding, and finally
    /// invalidation when anything observable changed.
    ///
    /// Returns true when at least one key changed.
    pub fn assign_properties(&mut self, incoming: Props) -> bool {
        let incoming = thread_aspects(
            "before_properties",
            self.def.name(),
            &self.def.aspects().before_properties,
            incoming,
        );

        let full_diff = self.def.has_property_overrides() || self.props_assigned;
        let (changed_keys, mut merged) = if full_diff {
            self.diff_merge(&incoming)
        } else {
            // Cheap first assignment: every supplied key counts as changed.
            let keys: Vec<String> = incoming.keys().map(String::from).collect();
            (keys, incoming)
        };

        // Reactions fire once per assignment, only for keys that changed.
        for key in &changed_keys {
            if let Some(spec) = self.def.property_spec(key) {
                if let Some(reaction) = &spec.reaction {
                    reaction(self.props.get(key), merged.get(key));
                }
            }
        }

        self.bind_handlers(&mut merged);
        self.props = merged;
        self.props_assigned = true;

        let changed = !changed_keys.is_empty();
        if changed && !self.shared.has(InstanceFlags::INITIALIZING) {
            self.invalidator.invalidate();
        }
        changed
    }

    /// Union-of-keys walk applying the registered strategy (or `auto`)
    /// per key. Returns the changed keys and the merged bag.
    fn diff_merge(&self, incoming: &Props) -> (Vec<String>, Props) {
        let mut changed = Vec::new();
        let mut merged = Props::new();
        for key in self.props.keys_union(incoming) {
            let previous = self.props.get(key);
            let next = incoming.get(key);
            let mode = self
                .def
                .property_spec(key)
                .map(|spec| spec.mode)
                .unwrap_or(DiffMode::Auto);
            if value_changed(mode, previous, next) {
                changed.push(key.to_string());
            }
            if let Some(value) = next {
                merged.insert(key, value.clone());
            }
        }
        (changed, merged)
    }

    /// Wrap handler-valued properties so they run with this instance as
    /// the current widget context, memoized per handler identity so an
    /// unchanged handler keeps a stable wrapped identity across renders.
    fn bind_handlers(&mut self, props: &mut Props) {
        let id = self.shared.id.get();
        let mut retained: HashMap<usize, (EventCallback, EventCallback)> = HashMap::new();
        for (key, value) in props.iter_mut() {
            let Value::Handler(handler) = value else {
                continue;
            };
            if self.def.is_no_bind(key) {
                continue;
            }
            let identity = Rc::as_ptr(handler) as *const () as usize;
            let cached = self
                .bound
                .get(&identity)
                .filter(|(original, _)| Rc::ptr_eq(original, handler))
                .map(|(_, wrapped)| wrapped.clone());
            let wrapped = cached.unwrap_or_else(|| {
                let inner = handler.clone();
                let wrapped: EventCallback = Rc::new(move |event| {
                    push_context(id);
                    inner(event);
                    pop_context();
                });
                wrapped
            });
            retained.insert(identity, (handler.clone(), wrapped.clone()));
            *value = Value::Handler(wrapped);
        }
        // Entries for handlers that disappeared are dropped here.
        self.bound = retained;
    }

    // =========================================================================
    // Render Pipeline
    // =========================================================================

    /// Run the full render pipeline: clear node handles, thread the
    /// before-render aspects around the render callable, render, then
    /// thread the after-render aspects over the output.
    pub fn render_output(&mut self) -> Vec<WNode> {
        self.nodes.clear();
        self.shared.set(InstanceFlags::RENDERING);

        let base: RenderFn = Rc::new(|widget, ctx| widget.render(ctx));
        let render = thread_aspects(
            "before_render",
            self.def.name(),
            &self.def.aspects().before_render,
            base,
        );

        let props = self.props.clone();
        let children = mem::take(&mut self.children);
        let widget = self.widget.clone();
        let output = {
            let mut ctx = RenderContext::new(
                &props,
                children,
                &self.invalidator,
                &self.registry,
                &self.nodes,
            );
            render(&mut *widget.borrow_mut(), &mut ctx)
        };

        let output = thread_aspects(
            "after_render",
            self.def.name(),
            &self.def.aspects().after_render,
            output,
        );

        self.shared.clear(InstanceFlags::RENDERING);
        output
    }

    /// Full handle release at disposal: node handles, bind cache and the
    /// registry invalidation sink.
    pub fn release(&mut self) {
        self.nodes.clear();
        self.bound.clear();
        self.registry.clear_invalidate();
    }
}
