//! Projector - one attached tree plus its scheduler state.
//!
//! The projector owns the arena, the instance table, and the event
//! listener table, and drives them through batched render passes. An
//! [`Invalidator`] marks an instance dirty and appends an
//! `{instance, depth}` entry to the queue; at flush time the queue is
//! deduplicated by instance (keeping the first occurrence) and sorted by
//! ascending depth so ancestors re-supply properties before descendants
//! render. A pending-pass token guards against scheduling more than one
//! pass per tick.
//!
//! Two modes: *batched* (the embedder calls [`Projector::render`] once
//! per tick) and *synchronous* (an invalidation outside a running pass
//! flushes inline before returning, used by the sandboxed attachment
//! mode and off-screen measurement).
//!
//! Two callback phases run after a pass commits with the state borrow
//! released: after-render callbacks (attach hooks, enter/exit effects,
//! distinguishability diagnostics) run in the same tick, while
//! deferred-render callbacks (second-phase deferred-property resolution)
//! run inline only in synchronous mode; in batched mode they are held
//! and drained at the start of the next tick.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::mem;
use std::rc::{Rc, Weak};

use slotmap::{SecondaryMap, SlotMap};

use crate::diff::DiffMode;
use crate::engine::arena::Arena;
use crate::engine::reconcile::{self, DeferredEntry, EngineCtx};
use crate::error::WeftError;
use crate::node::{component, ListenerList, WNode};
use crate::registry::Registry;
use crate::types::{Event, EventCallback, InstanceId, ResourceId};
use crate::widget::instance::{InstanceFlags, InstanceRecord, InstanceShared};
use crate::widget::{RenderContext, WidgetType};

/// When render passes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectorMode {
    /// Passes run when the embedder ticks [`Projector::render`].
    #[default]
    Batched,
    /// Passes run inline as soon as they are requested.
    Sync,
}

// =============================================================================
// Scheduler
// =============================================================================

pub(crate) struct QueueEntry {
    pub instance: InstanceId,
    pub depth: usize,
}

pub(crate) struct Scheduler {
    queue: Vec<QueueEntry>,
    /// Pass requested but not yet executed.
    pending: bool,
    /// A pass or another engine operation is currently executing.
    busy: bool,
    /// Second-phase deferred properties held for the next tick (batched
    /// mode only).
    deferred: Vec<DeferredEntry>,
    mode: ProjectorMode,
}

impl Scheduler {
    fn new(mode: ProjectorMode) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Scheduler {
            queue: Vec::new(),
            pending: false,
            busy: false,
            deferred: Vec::new(),
            mode,
        }))
    }
}

/// Marks one instance dirty and requests a pass. Cheap to clone; handed
/// to every widget through its seed.
#[derive(Clone)]
pub struct Invalidator {
    scheduler: Rc<RefCell<Scheduler>>,
    shared: Rc<InstanceShared>,
    state: Weak<RefCell<ProjectorState>>,
}

impl Invalidator {
    pub(crate) fn new(
        scheduler: Rc<RefCell<Scheduler>>,
        shared: Rc<InstanceShared>,
        state: Weak<RefCell<ProjectorState>>,
    ) -> Self {
        Invalidator {
            scheduler,
            shared,
            state,
        }
    }

    /// Mark the instance dirty and request a pass. Never renders inline
    /// from within a render or a running pass; repeated calls coalesce
    /// into a single render per pass.
    pub fn invalidate(&self) {
        if self.shared.has(InstanceFlags::DISPOSED) {
            return;
        }
        self.shared.set(InstanceFlags::DIRTY);
        let flush_inline = {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.queue.push(QueueEntry {
                instance: self.shared.id.get(),
                depth: self.shared.depth.get(),
            });
            if scheduler.pending {
                false
            } else {
                scheduler.pending = true;
                scheduler.mode == ProjectorMode::Sync
                    && !scheduler.busy
                    && !self.shared.has(InstanceFlags::RENDERING)
            }
        };
        if flush_inline {
            if let Some(state) = self.state.upgrade() {
                run_pass(&state, &self.scheduler);
            }
        }
    }

    pub(crate) fn as_callback(&self) -> Rc<dyn Fn()> {
        let this = self.clone();
        Rc::new(move || this.invalidate())
    }
}

/// Handed to an exit effect; the removed element's subtree stays in the
/// arena until the effect finishes.
pub struct ExitSignal {
    state: Weak<RefCell<ProjectorState>>,
    resource: ResourceId,
}

impl ExitSignal {
    pub(crate) fn new(state: Weak<RefCell<ProjectorState>>, resource: ResourceId) -> Self {
        ExitSignal { state, resource }
    }

    /// Complete the exit: the subtree is removed now.
    pub fn finish(self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut guard = state.borrow_mut();
        let state = &mut *guard;
        for removed in state.arena.remove_subtree(self.resource) {
            state.listeners.remove(removed);
        }
    }
}

/// Callback run after the pass commits, with the state borrow released.
pub(crate) type PostCallback = Box<dyn FnOnce()>;

// =============================================================================
// Projector
// =============================================================================

struct Root {
    resource: ResourceId,
    instance: InstanceId,
}

pub(crate) struct ProjectorState {
    pub(crate) arena: Arena,
    pub(crate) instances: SlotMap<InstanceId, Rc<RefCell<InstanceRecord>>>,
    pub(crate) listeners: SecondaryMap<ResourceId, ListenerList>,
    pub(crate) registry: Rc<Registry>,
    roots: Vec<Root>,
}

/// One attached tree: arena, instances, listeners and the scheduler.
pub struct Projector {
    state: Rc<RefCell<ProjectorState>>,
    scheduler: Rc<RefCell<Scheduler>>,
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector {
    pub fn new() -> Self {
        Self::with_registry(Registry::shared())
    }

    /// Projector whose instances resolve labels against `registry`.
    pub fn with_registry(registry: Rc<Registry>) -> Self {
        Projector {
            state: Rc::new(RefCell::new(ProjectorState {
                arena: Arena::new(),
                instances: SlotMap::with_key(),
                listeners: SecondaryMap::new(),
                registry,
                roots: Vec::new(),
            })),
            scheduler: Scheduler::new(ProjectorMode::default()),
        }
    }

    /// Detached synchronous projector for tests and off-screen
    /// measurement: every requested pass flushes before the caller's
    /// call returns.
    pub fn sandbox() -> Self {
        let projector = Self::new();
        projector.scheduler.borrow_mut().mode = ProjectorMode::Sync;
        projector
    }

    pub fn mode(&self) -> ProjectorMode {
        self.scheduler.borrow().mode
    }

    /// Switch execution mode. Only legal before attachment.
    pub fn set_mode(&self, mode: ProjectorMode) -> Result<(), WeftError> {
        if !self.state.borrow().roots.is_empty() {
            return Err(WeftError::ModeChangeAfterAttach);
        }
        self.scheduler.borrow_mut().mode = mode;
        Ok(())
    }

    pub fn registry(&self) -> Rc<Registry> {
        self.state.borrow().registry.clone()
    }

    // =========================================================================
    // Attachment
    // =========================================================================

    /// Attach by append: create a fresh backing root, realize the render
    /// function's output under it, and return the root resource.
    pub fn append(
        &self,
        render: impl Fn(&mut RenderContext<'_>) -> Vec<WNode> + 'static,
    ) -> Result<ResourceId, WeftError> {
        self.ensure_detached()?;
        let root = self.state.borrow_mut().arena.adopt_root("root");
        self.attach_root(root, WidgetType::stateless("projector-root", render));
        Ok(root)
    }

    /// Attach by merge: reuse an existing backing subtree node for node
    /// where element tags match positionally. A top-level tag mismatch
    /// detaches again and fails.
    pub fn merge(
        &self,
        target: ResourceId,
        render: impl Fn(&mut RenderContext<'_>) -> Vec<WNode> + 'static,
    ) -> Result<(), WeftError> {
        self.ensure_detached()?;
        let snapshot = {
            let state = self.state.borrow();
            if !state.arena.contains(target) {
                return Err(WeftError::MergeTargetMismatch(target));
            }
            snapshot_elements(&state.arena, target)
        };
        let mismatch = Rc::new(Cell::new(false));

        let stamp_mismatch = mismatch.clone();
        let def = WidgetType::stateless("projector-root", move |ctx| {
            let mut output = render(ctx);
            stamp_merge_targets(&mut output, target, &snapshot, &stamp_mismatch);
            output
        });
        self.attach_root(target, def);

        if mismatch.get() {
            self.detach()?;
            return Err(WeftError::MergeTargetMismatch(target));
        }
        Ok(())
    }

    fn ensure_detached(&self) -> Result<(), WeftError> {
        if self.state.borrow().roots.is_empty() {
            Ok(())
        } else {
            Err(WeftError::AlreadyAttached)
        }
    }

    fn attach_root(&self, containing: ResourceId, def: Rc<WidgetType>) {
        let instance = Rc::new(Cell::new(None));
        let slot = instance.clone();
        let (post, deferred) = self.with_cx(|cx| {
            let mut node = component(&def).build();
            reconcile::realize_node(cx, &mut node, containing, None, 0);
            slot.set(node.instance());
        });
        if let Some(instance) = instance.get() {
            self.state.borrow_mut().roots.push(Root {
                resource: containing,
                instance,
            });
        }
        run_callbacks(&self.state, &self.scheduler, post, deferred);
        self.flush_if_sync();
    }

    /// Tear the attached tree down: pending work is dropped, every
    /// instance is disposed bottom-up, and the backing root is removed.
    pub fn detach(&self) -> Result<(), WeftError> {
        let roots = {
            let mut state = self.state.borrow_mut();
            if state.roots.is_empty() {
                return Err(WeftError::NotAttached);
            }
            mem::take(&mut state.roots)
        };
        {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.queue.clear();
            scheduler.pending = false;
            scheduler.deferred.clear();
        }
        let (post, deferred) = self.with_cx(|cx| {
            for root in roots {
                reconcile::dispose_instance(cx, root.instance);
                reconcile::remove_resource_tree(cx, root.resource);
            }
        });
        run_callbacks(&self.state, &self.scheduler, post, deferred);
        Ok(())
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// True when a pass has been requested and not yet executed.
    pub fn needs_render(&self) -> bool {
        self.scheduler.borrow().pending
    }

    /// Run the pending pass now. In batched mode the embedder calls this
    /// once per tick; a no-op when nothing is queued.
    pub fn render(&self) {
        run_pass(&self.state, &self.scheduler);
    }

    /// Deliver an event to the listeners bound to a backing resource.
    /// Returns true when at least one listener ran.
    pub fn dispatch(&self, target: ResourceId, event: &Event) -> bool {
        let callbacks: Vec<EventCallback> = {
            let state = self.state.borrow();
            state
                .listeners
                .get(target)
                .map(|list| {
                    list.iter()
                        .filter(|(name, _)| *name == event.name)
                        .map(|(_, callback)| callback.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        let delivered = !callbacks.is_empty();
        for callback in callbacks {
            callback(event);
        }
        delivered
    }

    /// Read access to the committed tree.
    pub fn with_arena<R>(&self, f: impl FnOnce(&Arena) -> R) -> R {
        f(&self.state.borrow().arena)
    }

    fn with_cx<R>(
        &self,
        f: impl FnOnce(&mut EngineCtx<'_>) -> R,
    ) -> (Vec<PostCallback>, Vec<DeferredEntry>) {
        self.scheduler.borrow_mut().busy = true;
        let result = with_cx(&self.state, &self.scheduler, f);
        self.scheduler.borrow_mut().busy = false;
        let (_, post, deferred) = result;
        (post, deferred)
    }

    fn flush_if_sync(&self) {
        let flush = {
            let scheduler = self.scheduler.borrow();
            scheduler.mode == ProjectorMode::Sync && !scheduler.queue.is_empty()
        };
        if flush {
            run_pass(&self.state, &self.scheduler);
        }
    }
}

// =============================================================================
// Pass Execution
// =============================================================================

fn with_cx<R>(
    state: &Rc<RefCell<ProjectorState>>,
    scheduler: &Rc<RefCell<Scheduler>>,
    f: impl FnOnce(&mut EngineCtx<'_>) -> R,
) -> (R, Vec<PostCallback>, Vec<DeferredEntry>) {
    let weak = Rc::downgrade(state);
    let mut guard = state.borrow_mut();
    let st = &mut *guard;
    let mut cx = EngineCtx {
        arena: &mut st.arena,
        instances: &mut st.instances,
        listeners: &mut st.listeners,
        registry: st.registry.clone(),
        scheduler: scheduler.clone(),
        state: weak,
        scopes: Vec::new(),
        post: Vec::new(),
        deferred: Vec::new(),
    };
    let result = f(&mut cx);
    let post = mem::take(&mut cx.post);
    let deferred = mem::take(&mut cx.deferred);
    (result, post, deferred)
}

pub(crate) fn run_pass(state: &Rc<RefCell<ProjectorState>>, scheduler: &Rc<RefCell<Scheduler>>) {
    // Deferred-render work held from the previous tick resolves first.
    let held = {
        let mut sched = scheduler.borrow_mut();
        if sched.busy {
            return;
        }
        mem::take(&mut sched.deferred)
    };
    apply_deferred(state, held);

    loop {
        let entries = {
            let mut sched = scheduler.borrow_mut();
            // A request from within a running pass rides that pass.
            if sched.busy {
                return;
            }
            sched.pending = false;
            if sched.queue.is_empty() {
                return;
            }
            let raw = mem::take(&mut sched.queue);
            sched.busy = true;
            order_queue(raw)
        };

        let ((), post, deferred) = with_cx(state, scheduler, |cx| {
            for entry in entries {
                let dirty = cx
                    .instances
                    .get(entry.instance)
                    .is_some_and(|r| r.borrow().shared.has(InstanceFlags::DIRTY));
                // Disposed mid-queue, or already rendered inline by an
                // ancestor during this pass.
                if !dirty {
                    continue;
                }
                let anchor = reconcile::anchor_after_output(cx, entry.instance);
                reconcile::render_instance(cx, entry.instance, anchor);
            }
        });
        scheduler.borrow_mut().busy = false;
        run_callbacks(state, scheduler, post, deferred);

        // Sync mode drains work raised by the callback phases; batched
        // mode leaves it for the next tick.
        let again = {
            let sched = scheduler.borrow();
            sched.mode == ProjectorMode::Sync && !sched.queue.is_empty()
        };
        if !again {
            break;
        }
    }
}

/// Dedup by instance keeping the first occurrence, then stable-sort by
/// ascending depth so ancestors render before descendants.
fn order_queue(raw: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut seen = HashSet::new();
    let mut entries: Vec<QueueEntry> = raw
        .into_iter()
        .filter(|entry| seen.insert(entry.instance))
        .collect();
    entries.sort_by_key(|entry| entry.depth);
    entries
}

fn run_callbacks(
    state: &Rc<RefCell<ProjectorState>>,
    scheduler: &Rc<RefCell<Scheduler>>,
    post: Vec<PostCallback>,
    deferred: Vec<DeferredEntry>,
) {
    for callback in post {
        callback();
    }
    // Second-phase deferred properties run a tick later: inline in sync
    // mode, held for the start of the next tick in batched mode.
    let sync = scheduler.borrow().mode == ProjectorMode::Sync;
    if sync {
        apply_deferred(state, deferred);
    } else {
        scheduler.borrow_mut().deferred.extend(deferred);
    }
}

/// Resolve deferred properties as "inserted", diff against the live
/// resource, re-apply. Explicit values still win.
fn apply_deferred(state: &Rc<RefCell<ProjectorState>>, entries: Vec<DeferredEntry>) {
    for entry in entries {
        let next = (entry.callback)(true).merged_over(&entry.explicit);
        let mut guard = state.borrow_mut();
        let st = &mut *guard;
        if !st.arena.contains(entry.resource) {
            continue;
        }
        reconcile::apply_prop_diff(&mut st.arena, entry.resource, &next, DiffMode::Auto);
    }
}

// =============================================================================
// Merge Stamping
// =============================================================================

/// Element children of every element under `root`, in order, captured
/// once at merge time.
fn snapshot_elements(
    arena: &Arena,
    root: ResourceId,
) -> HashMap<ResourceId, Vec<(ResourceId, String)>> {
    let mut map = HashMap::new();
    let mut stack = vec![root];
    while let Some(parent) = stack.pop() {
        let elements: Vec<(ResourceId, String)> = arena
            .children(parent)
            .iter()
            .filter_map(|&child| arena.tag(child).map(|tag| (child, tag.to_string())))
            .collect();
        stack.extend(elements.iter().map(|(id, _)| *id));
        map.insert(parent, elements);
    }
    map
}

/// Pair the output's element nodes with the snapshot's element children
/// position by position; matching tags adopt the existing resource,
/// anything else flags a mismatch and realizes fresh.
fn stamp_merge_targets(
    nodes: &mut [WNode],
    parent: ResourceId,
    snapshot: &HashMap<ResourceId, Vec<(ResourceId, String)>>,
    mismatch: &Cell<bool>,
) {
    let Some(existing) = snapshot.get(&parent) else {
        return;
    };
    let mut position = 0usize;
    for node in nodes {
        let WNode::Element(element) = node else {
            continue;
        };
        match existing.get(position) {
            Some((id, tag)) if tag.as_str() == &*element.tag => {
                element.merge_target = Some(*id);
                stamp_merge_targets(&mut element.children, *id, snapshot, mismatch);
            }
            _ => mismatch.set(true),
        }
        position += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{element, named, text};
    use crate::types::{Props, Value};
    use crate::widget::{NodeHandles, Widget, WidgetDef};

    type InvalidatorSlot = Rc<RefCell<Option<Invalidator>>>;
    type Body = Rc<RefCell<Box<dyn Fn(&mut RenderContext<'_>) -> Vec<WNode>>>>;

    /// Widget whose output is swapped from the outside between renders.
    struct Puppet {
        body: Body,
        renders: Rc<Cell<usize>>,
        detach_log: Option<(Rc<RefCell<Vec<String>>>, String)>,
    }

    impl Widget for Puppet {
        fn render(&mut self, ctx: &mut RenderContext<'_>) -> Vec<WNode> {
            self.renders.set(self.renders.get() + 1);
            (self.body.borrow())(ctx)
        }

        fn on_detach(&mut self) {
            if let Some((log, name)) = &self.detach_log {
                log.borrow_mut().push(name.clone());
            }
        }
    }

    struct PuppetHandle {
        def: WidgetDef,
        body: Body,
        renders: Rc<Cell<usize>>,
        invalidator: InvalidatorSlot,
    }

    impl PuppetHandle {
        fn invalidate(&self) {
            if let Some(invalidator) = &*self.invalidator.borrow() {
                invalidator.invalidate();
            }
        }

        fn set_body(&self, body: impl Fn(&mut RenderContext<'_>) -> Vec<WNode> + 'static) {
            *self.body.borrow_mut() = Box::new(body);
        }
    }

    fn puppet(name: &str) -> PuppetHandle {
        puppet_logged(name, None)
    }

    fn puppet_logged(name: &str, log: Option<Rc<RefCell<Vec<String>>>>) -> PuppetHandle {
        let body: Body = Rc::new(RefCell::new(Box::new(|_: &mut RenderContext<'_>| Vec::new())));
        let renders = Rc::new(Cell::new(0usize));
        let invalidator: InvalidatorSlot = Rc::new(RefCell::new(None));

        let factory_body = body.clone();
        let factory_renders = renders.clone();
        let factory_slot = invalidator.clone();
        let detach_log = log.map(|l| (l, name.to_string()));
        let def = WidgetType::builder(name, move |seed| {
            *factory_slot.borrow_mut() = Some(seed.invalidator.clone());
            Puppet {
                body: factory_body.clone(),
                renders: factory_renders.clone(),
                detach_log: detach_log.clone(),
            }
        })
        .build();

        PuppetHandle {
            def,
            body,
            renders,
            invalidator,
        }
    }

    #[test]
    fn test_append_realizes_output() {
        let projector = Projector::sandbox();
        let root = projector
            .append(|_| vec![element("div").child(text("hello")).build()])
            .unwrap();

        projector.with_arena(|arena| {
            let children = arena.children(root);
            assert_eq!(children.len(), 1);
            assert_eq!(arena.tag(children[0]), Some("div"));
            let inner = arena.children(children[0]);
            assert_eq!(arena.text(inner[0]), Some("hello"));
        });
    }

    #[test]
    fn test_append_twice_is_an_error() {
        let projector = Projector::sandbox();
        projector.append(|_| Vec::new()).unwrap();
        assert!(matches!(
            projector.append(|_| Vec::new()),
            Err(WeftError::AlreadyAttached)
        ));
    }

    #[test]
    fn test_detach_without_attach_is_an_error() {
        let projector = Projector::sandbox();
        assert!(matches!(projector.detach(), Err(WeftError::NotAttached)));
    }

    #[test]
    fn test_mode_change_after_attach_is_an_error() {
        let projector = Projector::new();
        projector.append(|_| Vec::new()).unwrap();
        assert!(matches!(
            projector.set_mode(ProjectorMode::Sync),
            Err(WeftError::ModeChangeAfterAttach)
        ));
    }

    #[test]
    fn test_dirty_coalescing() {
        let projector = Projector::new();
        let handle = puppet("ticker");
        handle.set_body(|_| vec![text("p")]);

        let def = handle.def.clone();
        projector.append(move |_| vec![component(&def).build()]).unwrap();
        projector.render();
        assert_eq!(handle.renders.get(), 1);

        handle.invalidate();
        handle.invalidate();
        handle.invalidate();
        assert!(projector.needs_render());
        projector.render();
        assert_eq!(handle.renders.get(), 2);

        // Nothing pending: another tick renders nothing.
        projector.render();
        assert_eq!(handle.renders.get(), 2);
    }

    #[test]
    fn test_noop_rerender_keeps_resources() {
        let projector = Projector::sandbox();
        let handle = puppet("stable");
        handle.set_body(|_| vec![element("div").child(text("x")).build()]);

        let def = handle.def.clone();
        let root = projector.append(move |_| vec![component(&def).build()]).unwrap();

        let before = projector.with_arena(|arena| arena.children(root).to_vec());
        handle.invalidate();
        let after = projector.with_arena(|arena| arena.children(root).to_vec());

        assert_eq!(handle.renders.get(), 2);
        assert_eq!(before, after);
    }

    #[test]
    fn test_keyed_reorder_preserves_resources() {
        let projector = Projector::sandbox();
        let handle = puppet("list");
        let keys = Rc::new(RefCell::new(vec![1i64, 2, 3]));

        let render_keys = keys.clone();
        handle.set_body(move |_| {
            render_keys
                .borrow()
                .iter()
                .map(|&k| element("item").key(k).build())
                .collect()
        });

        let def = handle.def.clone();
        let root = projector.append(move |_| vec![component(&def).build()]).unwrap();

        let before = projector.with_arena(|arena| arena.children(root).to_vec());
        assert_eq!(before.len(), 3);

        *keys.borrow_mut() = vec![3, 1, 2];
        handle.invalidate();

        let after = projector.with_arena(|arena| arena.children(root).to_vec());
        assert_eq!(after, vec![before[2], before[0], before[1]]);
    }

    #[test]
    fn test_removal_in_keyed_list() {
        let projector = Projector::sandbox();
        let handle = puppet("list");
        let keys = Rc::new(RefCell::new(vec![1i64, 2, 3]));

        let render_keys = keys.clone();
        handle.set_body(move |_| {
            render_keys
                .borrow()
                .iter()
                .map(|&k| element("item").key(k).build())
                .collect()
        });

        let def = handle.def.clone();
        let root = projector.append(move |_| vec![component(&def).build()]).unwrap();
        let before = projector.with_arena(|arena| arena.children(root).to_vec());

        *keys.borrow_mut() = vec![1, 3];
        handle.invalidate();

        let after = projector.with_arena(|arena| arena.children(root).to_vec());
        assert_eq!(after, vec![before[0], before[2]]);
    }

    #[test]
    fn test_ancestor_renders_before_descendant() {
        let projector = Projector::new();
        let child = puppet("child");
        child.set_body(|ctx| {
            let value = ctx.prop("v").cloned().unwrap_or(Value::Null);
            vec![text(format!("{value:?}"))]
        });
        let parent = puppet("parent");
        let child_def = child.def.clone();
        let value = Rc::new(Cell::new(1i64));
        let render_value = value.clone();
        parent.set_body(move |_| {
            vec![component(&child_def).prop("v", render_value.get()).build()]
        });

        let parent_def = parent.def.clone();
        projector
            .append(move |_| vec![component(&parent_def).build()])
            .unwrap();
        projector.render();
        assert_eq!(child.renders.get(), 1);

        // Child queued first, parent second; the depth sort runs the
        // parent first and its inline child render absorbs the entry.
        value.set(2);
        child.invalidate();
        parent.invalidate();
        projector.render();
        assert_eq!(parent.renders.get(), 2);
        assert_eq!(child.renders.get(), 2);
    }

    #[test]
    fn test_clean_component_subtree_skipped() {
        let projector = Projector::sandbox();
        let child = puppet("child");
        child.set_body(|_| vec![text("c")]);
        let parent = puppet("parent");
        let child_def = child.def.clone();
        parent.set_body(move |_| vec![component(&child_def).prop("v", 1i64).build()]);

        let parent_def = parent.def.clone();
        projector
            .append(move |_| vec![component(&parent_def).build()])
            .unwrap();
        assert_eq!(child.renders.get(), 1);

        // Parent re-renders with identical child properties; the child's
        // whole subtree is skipped.
        parent.invalidate();
        assert_eq!(parent.renders.get(), 2);
        assert_eq!(child.renders.get(), 1);
    }

    #[test]
    fn test_registry_race_resolves_on_define() {
        let projector = Projector::sandbox();
        let root = projector
            .append(|_| vec![named("late").prop("v", 1i64).build()])
            .unwrap();

        // Unresolved label renders as empty output, silently.
        projector.with_arena(|arena| assert!(arena.children(root).is_empty()));

        let late = puppet("late");
        late.set_body(|_| vec![element("late-el").build()]);
        projector.registry().define("late", late.def.clone());

        projector.with_arena(|arena| {
            let children = arena.children(root);
            assert_eq!(children.len(), 1);
            assert_eq!(arena.tag(children[0]), Some("late-el"));
        });
    }

    #[test]
    fn test_detach_disposes_bottom_up() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let projector = Projector::sandbox();

        let child = puppet_logged("child", Some(log.clone()));
        child.set_body(|_| vec![text("c")]);
        let parent = puppet_logged("parent", Some(log.clone()));
        let child_def = child.def.clone();
        parent.set_body(move |_| vec![component(&child_def).build()]);

        let parent_def = parent.def.clone();
        projector
            .append(move |_| vec![component(&parent_def).build()])
            .unwrap();

        projector.detach().unwrap();
        assert_eq!(*log.borrow(), vec!["child", "parent"]);
        projector.with_arena(|arena| assert!(arena.is_empty()));
    }

    #[test]
    fn test_deferred_properties_two_phases() {
        let projector = Projector::sandbox();
        let phases = Rc::new(RefCell::new(Vec::new()));

        let seen = phases.clone();
        let root = projector
            .append(move |_| {
                let seen = seen.clone();
                vec![element("div")
                    .prop("fixed", 10i64)
                    .deferred(move |inserted| {
                        seen.borrow_mut().push(inserted);
                        Props::new()
                            .with("measured", if inserted { 2i64 } else { 1i64 })
                            .with("fixed", 99i64)
                    })
                    .build()]
            })
            .unwrap();

        assert_eq!(*phases.borrow(), vec![false, true]);
        projector.with_arena(|arena| {
            let div = arena.children(root)[0];
            assert_eq!(arena.prop(div, "measured"), Some(&Value::Int(2)));
            // Explicit values win over deferred ones in both phases.
            assert_eq!(arena.prop(div, "fixed"), Some(&Value::Int(10)));
        });
    }

    #[test]
    fn test_deferred_second_phase_waits_for_tick() {
        let projector = Projector::new();
        let phases = Rc::new(RefCell::new(Vec::new()));

        let seen = phases.clone();
        let root = projector
            .append(move |_| {
                let seen = seen.clone();
                vec![element("div")
                    .deferred(move |inserted| {
                        seen.borrow_mut().push(inserted);
                        Props::new().with("measured", if inserted { 2i64 } else { 1i64 })
                    })
                    .build()]
            })
            .unwrap();

        // In batched mode the second phase belongs to the next tick.
        assert_eq!(*phases.borrow(), vec![false]);
        projector.with_arena(|arena| {
            let div = arena.children(root)[0];
            assert_eq!(arena.prop(div, "measured"), Some(&Value::Int(1)));
        });

        projector.render();
        assert_eq!(*phases.borrow(), vec![false, true]);
        projector.with_arena(|arena| {
            let div = arena.children(root)[0];
            assert_eq!(arena.prop(div, "measured"), Some(&Value::Int(2)));
        });
    }

    #[test]
    fn test_exit_effect_defers_removal() {
        let projector = Projector::sandbox();
        let handle = puppet("host");
        let show = Rc::new(Cell::new(true));
        let signal_slot: Rc<RefCell<Option<ExitSignal>>> = Rc::new(RefCell::new(None));

        let render_show = show.clone();
        let render_slot = signal_slot.clone();
        handle.set_body(move |_| {
            if render_show.get() {
                let slot = render_slot.clone();
                vec![element("fading")
                    .exit(move |_, signal| {
                        *slot.borrow_mut() = Some(signal);
                    })
                    .build()]
            } else {
                Vec::new()
            }
        });

        let def = handle.def.clone();
        let root = projector.append(move |_| vec![component(&def).build()]).unwrap();
        let fading = projector.with_arena(|arena| arena.children(root)[0]);

        show.set(false);
        handle.invalidate();

        // Removal waits for the effect to finish.
        projector.with_arena(|arena| assert!(arena.contains(fading)));
        let signal = signal_slot.borrow_mut().take();
        signal.map(ExitSignal::finish);
        projector.with_arena(|arena| assert!(!arena.contains(fading)));
    }

    #[test]
    fn test_exit_effect_keeps_nested_component_output_alive() {
        let projector = Projector::sandbox();
        let inner = puppet("inner");
        inner.set_body(|_| vec![element("inner-el").build()]);

        let host = puppet("host");
        let show = Rc::new(Cell::new(true));
        let signal_slot: Rc<RefCell<Option<ExitSignal>>> = Rc::new(RefCell::new(None));

        let render_show = show.clone();
        let render_slot = signal_slot.clone();
        let inner_def = inner.def.clone();
        host.set_body(move |_| {
            if render_show.get() {
                let slot = render_slot.clone();
                vec![element("fading")
                    .exit(move |_, signal| {
                        *slot.borrow_mut() = Some(signal);
                    })
                    .child(component(&inner_def).build())
                    .build()]
            } else {
                Vec::new()
            }
        });

        let def = host.def.clone();
        let root = projector.append(move |_| vec![component(&def).build()]).unwrap();
        let (fading, inner_el) = projector.with_arena(|arena| {
            let fading = arena.children(root)[0];
            (fading, arena.children(fading)[0])
        });

        show.set(false);
        host.invalidate();

        // The whole subtree, nested component output included, stays in
        // place until the effect finishes.
        projector.with_arena(|arena| {
            assert!(arena.contains(fading));
            assert!(arena.contains(inner_el));
            assert_eq!(arena.children(fading), &[inner_el]);
        });

        let signal = signal_slot.borrow_mut().take();
        signal.map(ExitSignal::finish);
        projector.with_arena(|arena| {
            assert!(!arena.contains(fading));
            assert!(!arena.contains(inner_el));
        });
    }

    #[test]
    fn test_event_dispatch() {
        let projector = Projector::sandbox();
        let count = Rc::new(Cell::new(0usize));

        let pressed = count.clone();
        let root = projector
            .append(move |_| {
                let pressed = pressed.clone();
                vec![element("button")
                    .on("press", move |_| pressed.set(pressed.get() + 1))
                    .build()]
            })
            .unwrap();

        let button = projector.with_arena(|arena| arena.children(root)[0]);
        assert!(projector.dispatch(button, &Event::new("press")));
        assert!(!projector.dispatch(button, &Event::new("hover")));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_bound_handler_identity_stable_across_renders() {
        let projector = Projector::sandbox();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

        let child = puppet("child");
        let captured = seen.clone();
        child.set_body(move |ctx| {
            if let Some(value) = ctx.prop("on_ping") {
                captured.borrow_mut().push(value.clone());
            }
            Vec::new()
        });

        let parent = puppet("parent");
        let child_def = child.def.clone();
        let tick = Rc::new(Cell::new(0i64));
        let ping: Rc<RefCell<Value>> = Rc::new(RefCell::new(Value::handler(|_| {})));

        let render_tick = tick.clone();
        let render_ping = ping.clone();
        parent.set_body(move |_| {
            vec![component(&child_def)
                .prop("n", render_tick.get())
                .prop("on_ping", render_ping.borrow().clone())
                .build()]
        });

        let parent_def = parent.def.clone();
        projector
            .append(move |_| vec![component(&parent_def).build()])
            .unwrap();

        // Same raw handler across a re-render keeps a stable bound
        // identity.
        tick.set(1);
        parent.invalidate();
        {
            let seen = seen.borrow();
            assert_eq!(seen.len(), 2);
            assert!(Value::identical(&seen[0], &seen[1]));
            assert!(!Value::identical(&seen[0], &*ping.borrow()));
        }

        // A different raw handler binds fresh.
        *ping.borrow_mut() = Value::handler(|_| {});
        tick.set(2);
        parent.invalidate();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(!Value::identical(&seen[1], &seen[2]));
    }

    #[test]
    fn test_merge_adopts_existing_resources() {
        let projector = Projector::sandbox();
        let (target, header) = {
            let mut state = projector.state.borrow_mut();
            let target = state.arena.adopt_root("root");
            let header = state.arena.create_element("header");
            state.arena.insert_before(target, header, None);
            (target, header)
        };

        projector
            .merge(target, |_| {
                vec![element("header").prop("live", true).build()]
            })
            .unwrap();

        projector.with_arena(|arena| {
            // Same resource, now carrying rendered properties.
            assert_eq!(arena.children(target), &[header]);
            assert_eq!(arena.prop(header, "live"), Some(&Value::Bool(true)));
        });
    }

    #[test]
    fn test_merge_tag_mismatch_fails() {
        let projector = Projector::sandbox();
        let target = {
            let mut state = projector.state.borrow_mut();
            let target = state.arena.adopt_root("root");
            let footer = state.arena.create_element("footer");
            state.arena.insert_before(target, footer, None);
            target
        };

        let result = projector.merge(target, |_| vec![element("header").build()]);
        assert!(matches!(result, Err(WeftError::MergeTargetMismatch(t)) if t == target));
    }

    #[test]
    fn test_node_handles_track_keyed_elements() {
        struct Form;
        impl Widget for Form {
            fn render(&mut self, _ctx: &mut RenderContext<'_>) -> Vec<WNode> {
                vec![element("input").key("field").build()]
            }
        }

        let slot: Rc<RefCell<Option<NodeHandles>>> = Rc::new(RefCell::new(None));
        let captured = slot.clone();
        let def = WidgetType::builder("form", move |seed| {
            *captured.borrow_mut() = Some(seed.nodes.clone());
            Form
        })
        .build();

        let projector = Projector::sandbox();
        projector.append(move |_| vec![component(&def).build()]).unwrap();

        let nodes = slot.borrow().clone();
        let field = nodes.and_then(|n| n.get("field"));
        let field = field.unwrap();
        projector.with_arena(|arena| assert_eq!(arena.tag(field), Some("input")));
    }

    #[test]
    fn test_batched_mode_waits_for_tick() {
        let projector = Projector::new();
        let handle = puppet("ticker");
        handle.set_body(|_| vec![text("p")]);

        let def = handle.def.clone();
        projector.append(move |_| vec![component(&def).build()]).unwrap();
        // Attachment realizes eagerly even in batched mode.
        assert_eq!(handle.renders.get(), 1);

        handle.invalidate();
        assert_eq!(handle.renders.get(), 1);
        projector.render();
        assert_eq!(handle.renders.get(), 2);
    }
}
