//! Reconciler - realizes node trees against the arena and diffs updates.
//!
//! # Algorithm
//!
//! Child lists are matched left to right with a two-pointer walk plus
//! key-based lookahead, using [`same`] as the single matching predicate:
//!
//! 1. When the heads match, the pair is updated in place and both
//!    pointers advance.
//! 2. When the new head has no match anywhere in the remaining old
//!    children, it is freshly realized before the nearest realized
//!    anchor (found by walking forward through not-yet-placed old
//!    children, descending into component output).
//! 3. When the old head has no match in the remaining new children, it
//!    is a pure removal and is torn down.
//! 4. Otherwise the new head matched a later old child: that child's
//!    realized resources are re-anchored at the current position and the
//!    pair is updated, preserving instances and resources across a
//!    reorder.
//!
//! This is a greedy matcher biased toward the no-reorder common case,
//! not an optimal tree edit distance.
//!
//! Component realization, update, and disposal live here too; the
//! scheduler in [`crate::projector`] drives everything through
//! [`EngineCtx`], a split borrow over the projector state.

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use slotmap::{SecondaryMap, SlotMap};
use tracing::warn;

use crate::diff::{value_changed, DiffMode};
use crate::engine::arena::Arena;
use crate::node::{
    same, ComponentNode, Definition, DeferredProps, ElementNode, ListenerList, TextNode, WNode,
};
use crate::projector::{ExitSignal, Invalidator, PostCallback, ProjectorState, Scheduler};
use crate::registry::{Precedence, Registry, RegistryHandler};
use crate::types::{InstanceId, Props, ResourceId, Value};
use crate::widget::instance::{InstanceFlags, InstanceRecord, InstanceShared};
use crate::widget::{NodeHandles, WidgetSeed};

/// Scope of the instance whose output is currently being realized.
pub(crate) struct Scope {
    pub registry: Rc<RegistryHandler>,
    pub nodes: NodeHandles,
}

/// Second-phase deferred-property resolution, run after the commit.
pub(crate) struct DeferredEntry {
    pub callback: DeferredProps,
    pub resource: ResourceId,
    /// Explicitly supplied properties always win over deferred ones.
    pub explicit: Props,
}

/// Split borrow over the projector state, plus the per-operation
/// callback accumulators drained once the state borrow is released.
pub(crate) struct EngineCtx<'a> {
    pub arena: &'a mut Arena,
    pub instances: &'a mut SlotMap<InstanceId, Rc<RefCell<InstanceRecord>>>,
    pub listeners: &'a mut SecondaryMap<ResourceId, ListenerList>,
    /// Base registry new instance handlers chain to.
    pub registry: Rc<Registry>,
    pub scheduler: Rc<RefCell<Scheduler>>,
    pub state: Weak<RefCell<ProjectorState>>,
    pub scopes: Vec<Scope>,
    pub post: Vec<PostCallback>,
    pub deferred: Vec<DeferredEntry>,
}

// =============================================================================
// Child Reconciliation
// =============================================================================

/// Reconcile an old child sequence against a new one under `parent`,
/// consuming both and returning the realized new sequence. `tail_anchor`
/// is the first sibling resource after this slice, used when no anchor
/// can be found among the old children.
pub(crate) fn update_children(
    cx: &mut EngineCtx<'_>,
    parent: ResourceId,
    old: Vec<WNode>,
    new: Vec<WNode>,
    tail_anchor: Option<ResourceId>,
    depth: usize,
) -> Vec<WNode> {
    let mut old: Vec<Option<WNode>> = old.into_iter().map(Some).collect();
    let mut new = new;

    // Registry references are resolved before any comparison so a label
    // that just became available matches the instance realized for it.
    for child in &mut new {
        resolve_definition(cx, child);
    }

    let mut old_index = 0usize;
    let mut new_index = 0usize;
    let mut structural = false;

    while new_index < new.len() {
        while old_index < old.len() && old[old_index].is_none() {
            old_index += 1;
        }

        // Heads match: update the pair in place.
        if old_index < old.len() {
            let head = old[old_index].take_if(|o| same(o, &new[new_index]));
            if let Some(old_child) = head {
                let next_anchor = find_anchor(cx, &old, old_index + 1, tail_anchor);
                update_node(cx, old_child, &mut new[new_index], next_anchor, depth);
                old_index += 1;
                new_index += 1;
                continue;
            }
        }

        let found = old
            .iter()
            .enumerate()
            .skip(old_index + 1)
            .find(|(_, slot)| slot.as_ref().is_some_and(|o| same(o, &new[new_index])))
            .map(|(i, _)| i);

        match found {
            None => {
                // Fresh insertion before the nearest realized anchor.
                let anchor = find_anchor(cx, &old, old_index, tail_anchor);
                realize_node(cx, &mut new[new_index], parent, anchor, depth);
                structural = true;
                new_index += 1;
            }
            Some(found_index) => {
                let head_survives = old_index < old.len()
                    && old[old_index]
                        .as_ref()
                        .is_some_and(|o| new[new_index..].iter().any(|n| same(o, n)));
                if !head_survives {
                    // Pure removal; retry the same new child against the
                    // next old one.
                    if let Some(dead) = old.get_mut(old_index).and_then(Option::take) {
                        teardown(cx, dead, true);
                        structural = true;
                    }
                    old_index += 1;
                } else {
                    // The matched old child moved: re-anchor its realized
                    // resources here, then update the pair.
                    if let Some(moved) = old[found_index].take() {
                        let anchor = find_anchor(cx, &old, old_index, tail_anchor);
                        move_realized(cx, &moved, parent, anchor);
                        update_node(cx, moved, &mut new[new_index], anchor, depth);
                        structural = true;
                    }
                    new_index += 1;
                }
            }
        }
    }

    // Anything left in the old sequence is removed.
    for dead in old.into_iter().flatten() {
        teardown(cx, dead, true);
        structural = true;
    }

    if structural {
        queue_distinguishability_check(cx, &new);
    }
    new
}

/// Sibling uniqueness diagnostic: two keyless siblings that `same()`
/// each other make the diff ambiguous. Emitted after the pass commits.
fn queue_distinguishability_check(cx: &mut EngineCtx<'_>, children: &[WNode]) {
    let mut messages = Vec::new();
    for i in 0..children.len() {
        if matches!(children[i], WNode::Text(_)) || children[i].key().is_some() {
            continue;
        }
        for j in (i + 1)..children.len() {
            if children[j].key().is_none() && same(&children[i], &children[j]) {
                messages.push(format!(
                    "siblings {} and {} are not distinguishable; add unique key properties",
                    children[i].describe(),
                    children[j].describe()
                ));
            }
        }
    }
    for message in messages {
        cx.post.push(Box::new(move || warn!("{message}")));
    }
}

/// Swap a still-unresolved registry reference for its definition when the
/// scope's registry now knows the label. A miss is silent; the handler
/// records the awaited label and invalidates the owning instance once it
/// is defined.
fn resolve_definition(cx: &EngineCtx<'_>, node: &mut WNode) {
    let WNode::Component(component) = node else {
        return;
    };
    let Definition::Named(label) = &component.definition else {
        return;
    };
    let resolved = match cx.scopes.last() {
        Some(scope) => scope.registry.get(label),
        None => cx.registry.get(label),
    };
    if let Some(def) = resolved {
        component.definition = Definition::Concrete(def);
    }
}

/// First realized backing resource of a node, descending into rendered
/// component output.
fn first_realized(cx: &EngineCtx<'_>, node: &WNode) -> Option<ResourceId> {
    match node {
        WNode::Text(t) => t.resource,
        WNode::Element(e) => e.resource,
        WNode::Component(c) => {
            let record = cx.instances.get(c.instance?)?;
            let record = record.borrow();
            record.rendered.iter().find_map(|n| first_realized(cx, n))
        }
    }
}

/// Insertion anchor: the first realized resource among the not-yet-placed
/// old children from `from` onward, falling back to the slice tail.
fn find_anchor(
    cx: &EngineCtx<'_>,
    old: &[Option<WNode>],
    from: usize,
    tail: Option<ResourceId>,
) -> Option<ResourceId> {
    old.get(from..)
        .unwrap_or(&[])
        .iter()
        .flatten()
        .find_map(|n| first_realized(cx, n))
        .or(tail)
}

/// Re-anchor every realized resource of a moved node (including rendered
/// component output) before `anchor` under `parent`.
fn move_realized(
    cx: &mut EngineCtx<'_>,
    node: &WNode,
    parent: ResourceId,
    anchor: Option<ResourceId>,
) {
    let mut resources = Vec::new();
    collect_realized(cx, node, &mut resources);
    for resource in resources {
        cx.arena.insert_before(parent, resource, anchor);
    }
}

fn collect_realized(cx: &EngineCtx<'_>, node: &WNode, out: &mut Vec<ResourceId>) {
    match node {
        WNode::Text(t) => out.extend(t.resource),
        WNode::Element(e) => out.extend(e.resource),
        WNode::Component(c) => {
            let Some(record) = c.instance.and_then(|id| cx.instances.get(id)) else {
                return;
            };
            let record = record.borrow();
            for child in &record.rendered {
                collect_realized(cx, child, out);
            }
        }
    }
}

// =============================================================================
// Realization
// =============================================================================

pub(crate) fn realize_node(
    cx: &mut EngineCtx<'_>,
    node: &mut WNode,
    parent: ResourceId,
    anchor: Option<ResourceId>,
    depth: usize,
) {
    match node {
        WNode::Text(text) => {
            let resource = cx.arena.create_text(&text.text);
            cx.arena.insert_before(parent, resource, anchor);
            text.resource = Some(resource);
        }
        WNode::Element(element) => realize_element(cx, element, parent, anchor, depth),
        WNode::Component(component) => realize_component(cx, component, parent, anchor, depth),
    }
}

fn realize_element(
    cx: &mut EngineCtx<'_>,
    element: &mut ElementNode,
    parent: ResourceId,
    anchor: Option<ResourceId>,
    depth: usize,
) {
    // A merge target is adopted in place rather than created.
    let resource = match element.merge_target {
        Some(existing) => existing,
        None => {
            let created = cx.arena.create_element(&element.tag);
            cx.arena.insert_before(parent, created, anchor);
            created
        }
    };

    // First-phase deferred properties: resolved as "not yet inserted",
    // explicit values win, second phase queued for after the commit.
    let mut applied = element.props.clone();
    if let Some(callback) = &element.deferred {
        applied = callback(false).merged_over(&element.props);
        cx.deferred.push(DeferredEntry {
            callback: callback.clone(),
            resource,
            explicit: element.props.clone(),
        });
    }
    for (key, value) in applied.iter() {
        cx.arena.set_prop(resource, key, value.clone());
    }
    for (key, value) in element.attrs.iter() {
        cx.arena.set_attr(resource, key, value.clone());
    }
    if !element.events.is_empty() {
        cx.listeners.insert(resource, element.events.clone());
    }

    let children = mem::take(&mut element.children);
    element.children = update_children(cx, resource, Vec::new(), children, None, depth);
    element.resource = Some(resource);
    element.inserted = true;

    record_handle(cx, element, resource);

    if let Some(enter) = &element.enter {
        let enter = enter.clone();
        cx.post.push(Box::new(move || enter(resource)));
    }
}

/// String-keyed elements are reachable through the owning instance's
/// node-handle map.
fn record_handle(cx: &EngineCtx<'_>, element: &ElementNode, resource: ResourceId) {
    if let (Some(Value::Str(key)), Some(scope)) = (&element.key, cx.scopes.last()) {
        scope.nodes.insert(key.to_string(), resource);
    }
}

fn realize_component(
    cx: &mut EngineCtx<'_>,
    component: &mut ComponentNode,
    parent: ResourceId,
    anchor: Option<ResourceId>,
    depth: usize,
) {
    // An unresolved label silently produces no output; the handler has
    // already subscribed for its definition.
    let def = match &component.definition {
        Definition::Concrete(def) => def.clone(),
        Definition::Named(_) => return,
    };

    let handler = RegistryHandler::with_local(
        Registry::shared(),
        cx.registry.clone(),
        Precedence::LocalFirst,
    );
    let nodes = NodeHandles::default();
    let shared = InstanceShared::new(depth);
    let invalidator = Invalidator::new(cx.scheduler.clone(), shared.clone(), cx.state.clone());
    handler.set_invalidate(invalidator.as_callback());

    let seed = WidgetSeed {
        invalidator: invalidator.clone(),
        registry: handler.clone(),
        nodes: nodes.clone(),
    };
    let id = {
        let shared = shared.clone();
        cx.instances.insert_with_key(|id| {
            shared.id.set(id);
            let widget = def.create(&seed);
            Rc::new(RefCell::new(InstanceRecord::new(
                def.clone(),
                widget,
                shared.clone(),
                invalidator.clone(),
                handler.clone(),
                nodes.clone(),
                parent,
            )))
        })
    };
    component.instance = Some(id);

    // Core context first, then children, then properties; invalidations
    // raised by the initial assignment are suppressed by INITIALIZING.
    if let Some(record) = cx.instances.get(id).cloned() {
        let mut record = record.borrow_mut();
        record.children = mem::take(&mut component.children);
        record.assign_properties(component.props.clone());
    }

    render_instance(cx, id, anchor);
    shared.clear(InstanceFlags::INITIALIZING);

    if let Some(record) = cx.instances.get(id) {
        let widget = record.borrow().widget.clone();
        cx.post.push(Box::new(move || widget.borrow_mut().on_attach()));
    }
}

/// Render an instance and reconcile its previous output against the new
/// one inside its containing parent. The dirty flag is cleared up front
/// so invalidations raised during the render ride the next pass.
pub(crate) fn render_instance(
    cx: &mut EngineCtx<'_>,
    id: InstanceId,
    tail_anchor: Option<ResourceId>,
) {
    let Some(record) = cx.instances.get(id).cloned() else {
        return;
    };
    let (shared, containing, scope) = {
        let record = record.borrow();
        if record.shared.has(InstanceFlags::DISPOSED) {
            return;
        }
        (
            record.shared.clone(),
            record.containing,
            Scope {
                registry: record.registry.clone(),
                nodes: record.nodes.clone(),
            },
        )
    };
    shared.clear(InstanceFlags::DIRTY);

    let (output, old) = {
        let mut record = record.borrow_mut();
        let output = record.render_output();
        (output, mem::take(&mut record.rendered))
    };

    let depth = shared.depth.get();
    cx.scopes.push(scope);
    let realized = update_children(cx, containing, old, output, tail_anchor, depth + 1);
    cx.scopes.pop();
    record.borrow_mut().rendered = realized;
}

/// Tail anchor for a standalone re-render: the sibling resource right
/// after the instance's current output in its containing parent.
pub(crate) fn anchor_after_output(cx: &EngineCtx<'_>, id: InstanceId) -> Option<ResourceId> {
    let record = cx.instances.get(id)?.borrow();
    let mut resources = Vec::new();
    for node in &record.rendered {
        collect_realized(cx, node, &mut resources);
    }
    let last = *resources.last()?;
    let parent = cx.arena.parent(last)?;
    let siblings = cx.arena.children(parent);
    let position = siblings.iter().position(|&c| c == last)?;
    siblings.get(position + 1).copied()
}

// =============================================================================
// Update
// =============================================================================

fn update_node(
    cx: &mut EngineCtx<'_>,
    old: WNode,
    new: &mut WNode,
    next_anchor: Option<ResourceId>,
    depth: usize,
) {
    match (old, new) {
        (WNode::Text(old_text), WNode::Text(new_text)) => {
            update_text(cx, old_text, new_text);
        }
        (WNode::Element(old_element), WNode::Element(new_element)) => {
            update_element(cx, old_element, new_element, depth);
        }
        (WNode::Component(old_component), WNode::Component(new_component)) => {
            update_component(cx, old_component, new_component, next_anchor);
        }
        // Mixed variants are never same(); unreachable by construction.
        (old, new) => {
            warn!(
                "mismatched update pair: {} vs {}",
                old.describe(),
                new.describe()
            );
        }
    }
}

fn update_text(cx: &mut EngineCtx<'_>, old: TextNode, new: &mut TextNode) {
    new.resource = old.resource;
    if let Some(resource) = new.resource {
        if new.text != old.text {
            cx.arena.set_text(resource, &new.text);
        }
    }
}

fn update_element(
    cx: &mut EngineCtx<'_>,
    mut old: ElementNode,
    new: &mut ElementNode,
    depth: usize,
) {
    let Some(resource) = old.resource else {
        return;
    };
    new.resource = Some(resource);
    new.inserted = true;

    // Deferred properties resolve before comparison on updates, reporting
    // the already-inserted state.
    let mut applied = new.props.clone();
    if let Some(callback) = &new.deferred {
        applied = callback(true).merged_over(&new.props);
    }
    apply_prop_diff(cx.arena, resource, &applied, new.diff_mode);
    apply_attr_diff(cx.arena, resource, &new.attrs);

    if new.events.is_empty() {
        cx.listeners.remove(resource);
    } else {
        cx.listeners.insert(resource, new.events.clone());
    }

    let old_children = mem::take(&mut old.children);
    let new_children = mem::take(&mut new.children);
    new.children = update_children(cx, resource, old_children, new_children, None, depth);

    record_handle(cx, new, resource);
}

/// Diff the supplied bag against the live backing properties with the
/// given strategy and apply only the changed keys.
pub(crate) fn apply_prop_diff(arena: &mut Arena, resource: ResourceId, next: &Props, mode: DiffMode) {
    let mut changes: Vec<(String, Option<Value>)> = Vec::new();
    if let Some(previous) = arena.props(resource) {
        for key in previous.keys_union(next) {
            if value_changed(mode, previous.get(key), next.get(key)) {
                changes.push((key.to_string(), next.get(key).cloned()));
            }
        }
    }
    for (key, value) in changes {
        match value {
            Some(value) => arena.set_prop(resource, &key, value),
            None => arena.remove_prop(resource, &key),
        }
    }
}

/// Attributes always diff by reference identity.
fn apply_attr_diff(arena: &mut Arena, resource: ResourceId, next: &Props) {
    let mut changes: Vec<(String, Option<Value>)> = Vec::new();
    if let Some(previous) = arena.attrs(resource) {
        for key in previous.keys_union(next) {
            if value_changed(DiffMode::Reference, previous.get(key), next.get(key)) {
                changes.push((key.to_string(), next.get(key).cloned()));
            }
        }
    }
    for (key, value) in changes {
        match value {
            Some(value) => arena.set_attr(resource, &key, value),
            None => arena.remove_attr(resource, &key),
        }
    }
}

fn update_component(
    cx: &mut EngineCtx<'_>,
    old: ComponentNode,
    new: &mut ComponentNode,
    next_anchor: Option<ResourceId>,
) {
    new.instance = old.instance;
    let Some(id) = new.instance else {
        return;
    };
    let Some(record) = cx.instances.get(id).cloned() else {
        return;
    };

    let shared = {
        let mut record = record.borrow_mut();
        record.children = mem::take(&mut new.children);
        record.assign_properties(new.props.clone());
        record.shared.clone()
    };

    // Dirty instances render inline while their ancestor is mid-pass;
    // the queued entry is skipped later because the flag clears here.
    // A clean instance keeps its whole subtree untouched.
    if shared.has(InstanceFlags::DIRTY) {
        render_instance(cx, id, next_anchor);
    }
}

// =============================================================================
// Teardown
// =============================================================================

/// Tear a node down: dispose component instances depth-first, release
/// event listeners, and remove backing resources. `remove_resources` is
/// false beneath a subtree whose root removal already covers them.
pub(crate) fn teardown(cx: &mut EngineCtx<'_>, node: WNode, remove_resources: bool) {
    match node {
        WNode::Text(text) => {
            if let (true, Some(resource)) = (remove_resources, text.resource) {
                remove_resource_tree(cx, resource);
            }
        }
        WNode::Element(mut element) => {
            for child in element.children.drain(..) {
                teardown(cx, child, false);
            }
            let Some(resource) = element.resource else {
                return;
            };
            match (&element.exit, remove_resources) {
                // The exit effect owns the actual removal; the resource
                // stays in place until the signal finishes.
                (Some(exit), true) => {
                    let exit = exit.clone();
                    let signal = ExitSignal::new(cx.state.clone(), resource);
                    cx.post.push(Box::new(move || exit(resource, signal)));
                }
                (_, true) => remove_resource_tree(cx, resource),
                (_, false) => {
                    cx.listeners.remove(resource);
                }
            }
        }
        WNode::Component(component) => {
            if let Some(id) = component.instance {
                dispose_instance_inner(cx, id, remove_resources);
            }
        }
    }
}

pub(crate) fn remove_resource_tree(cx: &mut EngineCtx<'_>, resource: ResourceId) {
    for removed in cx.arena.remove_subtree(resource) {
        cx.listeners.remove(removed);
    }
}

/// Dispose an instance: rendered output first (depth-first, so nested
/// detach hooks fire bottom-up), then the detach hook, then every owned
/// handle.
pub(crate) fn dispose_instance(cx: &mut EngineCtx<'_>, id: InstanceId) {
    dispose_instance_inner(cx, id, true);
}

/// `remove_resources` is false when an enclosing subtree removal (or a
/// pending exit signal) already owns the rendered resources.
fn dispose_instance_inner(cx: &mut EngineCtx<'_>, id: InstanceId, remove_resources: bool) {
    let Some(record) = cx.instances.remove(id) else {
        return;
    };
    {
        let record = record.borrow();
        if record.shared.has(InstanceFlags::DISPOSED) {
            return;
        }
        record.shared.set(InstanceFlags::DISPOSED);
    }

    let rendered = mem::take(&mut record.borrow_mut().rendered);
    for node in rendered {
        teardown(cx, node, remove_resources);
    }

    let widget = record.borrow().widget.clone();
    widget.borrow_mut().on_detach();
    record.borrow_mut().release();
}
