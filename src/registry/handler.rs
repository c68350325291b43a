//! Registry handler - composes a local registry over a base registry.
//!
//! Each component instance owns a handler: lookups consult the local and
//! base registries in a configurable order and re-expose them as a single
//! surface. When a lookup misses, the handler subscribes to both
//! registries for that label and re-emits its own invalidation exactly
//! once when the label becomes satisfiable, so an instance re-renders only
//! when something it actually asked for arrives.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use super::{Injector, Registry};
use crate::types::RegistryLabel;
use crate::widget::WidgetDef;

/// Which registry wins when both define a label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precedence {
    /// Local entries shadow base entries.
    #[default]
    LocalFirst,
    /// Base entries shadow local entries.
    BaseFirst,
}

struct HandlerState {
    /// Labels asked for but not yet satisfied.
    awaited: HashSet<RegistryLabel>,
    /// Labels we already subscribed for, to avoid duplicate listeners.
    subscribed: HashSet<RegistryLabel>,
    invalidate: Option<Rc<dyn Fn()>>,
}

/// A two-level registry lookup surface.
pub struct RegistryHandler {
    local: Rc<Registry>,
    base: Rc<Registry>,
    precedence: Precedence,
    state: RefCell<HandlerState>,
    self_weak: Weak<RegistryHandler>,
}

impl RegistryHandler {
    /// Create a handler with a fresh local registry over `base`.
    pub fn new(base: Rc<Registry>, precedence: Precedence) -> Rc<Self> {
        Self::with_local(Rc::new(Registry::new()), base, precedence)
    }

    /// Create a handler over an existing local registry.
    pub fn with_local(
        local: Rc<Registry>,
        base: Rc<Registry>,
        precedence: Precedence,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| RegistryHandler {
            local,
            base,
            precedence,
            state: RefCell::new(HandlerState {
                awaited: HashSet::new(),
                subscribed: HashSet::new(),
                invalidate: None,
            }),
            self_weak: self_weak.clone(),
        })
    }

    /// The local registry, for scoped definitions.
    pub fn local(&self) -> &Rc<Registry> {
        &self.local
    }

    /// The base registry.
    pub fn base(&self) -> &Rc<Registry> {
        &self.base
    }

    /// Install the invalidation sink fired when an awaited label lands.
    pub fn set_invalidate(&self, f: Rc<dyn Fn()>) {
        self.state.borrow_mut().invalidate = Some(f);
    }

    /// Drop the invalidation sink (instance disposal).
    pub fn clear_invalidate(&self) {
        let mut state = self.state.borrow_mut();
        state.invalidate = None;
        state.awaited.clear();
    }

    fn ordered(&self) -> [&Rc<Registry>; 2] {
        match self.precedence {
            Precedence::LocalFirst => [&self.local, &self.base],
            Precedence::BaseFirst => [&self.base, &self.local],
        }
    }

    /// Look up a definition; on a miss, track the label for invalidation.
    pub fn get(&self, label: &RegistryLabel) -> Option<WidgetDef> {
        for reg in self.ordered() {
            if let Some(def) = reg.get(label) {
                return Some(def);
            }
        }
        self.await_label(label);
        None
    }

    /// True when either registry can satisfy the label.
    pub fn has(&self, label: &RegistryLabel) -> bool {
        self.local.has(label) || self.base.has(label)
    }

    /// Look up an injected value; on a miss, track the label.
    pub fn get_injector(&self, label: &RegistryLabel) -> Option<Injector> {
        for reg in self.ordered() {
            if let Some(item) = reg.get_injector(label) {
                return Some(item);
            }
        }
        self.await_label(label);
        None
    }

    /// True when either registry holds an injected value for the label.
    pub fn has_injector(&self, label: &RegistryLabel) -> bool {
        self.local.has_injector(label) || self.base.has_injector(label)
    }

    fn await_label(&self, label: &RegistryLabel) {
        let mut state = self.state.borrow_mut();
        state.awaited.insert(label.clone());
        if !state.subscribed.insert(label.clone()) {
            return;
        }
        drop(state);

        for reg in [&self.local, &self.base] {
            let weak = self.self_weak.clone();
            reg.on_loaded(
                label.clone(),
                Rc::new(move |loaded| {
                    if let Some(handler) = weak.upgrade() {
                        handler.label_loaded(loaded);
                    }
                }),
            );
        }
    }

    /// Emit the handler's own invalidation, at most once per awaited label.
    fn label_loaded(&self, label: &RegistryLabel) {
        let invalidate = {
            let mut state = self.state.borrow_mut();
            if !state.awaited.remove(label) {
                return;
            }
            // The one-shot listener on the other registry is now stale;
            // allow a fresh subscription if this label is awaited again.
            state.subscribed.remove(label);
            state.invalidate.clone()
        };
        if let Some(invalidate) = invalidate {
            invalidate();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use crate::widget::WidgetType;

    fn def(name: &str) -> WidgetDef {
        WidgetType::stateless(name, |_| Vec::new())
    }

    #[test]
    fn test_precedence() {
        let base = Registry::shared();
        base.define("w", def("base"));

        let handler = RegistryHandler::new(base.clone(), Precedence::LocalFirst);
        handler.local().define("w", def("local"));

        let label = RegistryLabel::from("w");
        assert_eq!(handler.get(&label).unwrap().name(), "local");

        let base_first = RegistryHandler::with_local(
            handler.local().clone(),
            base,
            Precedence::BaseFirst,
        );
        assert_eq!(base_first.get(&label).unwrap().name(), "base");
    }

    #[test]
    fn test_miss_then_define_invalidates_once() {
        let base = Registry::shared();
        let handler = RegistryHandler::new(base.clone(), Precedence::LocalFirst);

        let fired = Rc::new(Cell::new(0));
        let probe = fired.clone();
        handler.set_invalidate(Rc::new(move || probe.set(probe.get() + 1)));

        let label = RegistryLabel::from("late");
        assert!(handler.get(&label).is_none());
        assert!(handler.get(&label).is_none()); // repeated miss, one subscription

        base.define("late", def("late"));
        assert_eq!(fired.get(), 1);
        assert!(handler.get(&label).is_some());

        // Defining again without a new miss does not re-fire.
        base.define("late", def("late2"));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_local_define_satisfies_awaited_label() {
        let base = Registry::shared();
        let handler = RegistryHandler::new(base, Precedence::LocalFirst);

        let fired = Rc::new(Cell::new(0));
        let probe = fired.clone();
        handler.set_invalidate(Rc::new(move || probe.set(probe.get() + 1)));

        let label = RegistryLabel::from("scoped");
        assert!(handler.get(&label).is_none());
        handler.local().define("scoped", def("scoped"));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_injector_lookup_through_handler() {
        let base = Registry::shared();
        base.define_injector("size", Rc::new(7u16));
        let handler = RegistryHandler::new(base, Precedence::LocalFirst);

        let label = RegistryLabel::from("size");
        assert!(handler.has_injector(&label));
        let item = handler.get_injector(&label).unwrap();
        assert_eq!(*item.downcast::<u16>().unwrap(), 7);
    }
}
