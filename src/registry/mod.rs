//! Component Registry - label-keyed lookup with deferred availability.
//!
//! The registry maps labels to component definitions and to injected
//! shared values ("injectors"). Entries may arrive after consumers ask
//! for them: a lookup miss is a definite "not present", never a block,
//! and consumers that registered interest are notified exactly once when
//! the label becomes available.

mod handler;

pub use handler::{Precedence, RegistryHandler};

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::types::RegistryLabel;
use crate::widget::WidgetDef;

/// Shared value stored under an injector label.
pub type Injector = Rc<dyn Any>;

/// Listener fired when a label becomes available.
pub type LoadedListener = Rc<dyn Fn(&RegistryLabel)>;

/// Loader for a lazily constructed definition.
pub type LazyLoader = Box<dyn FnOnce() -> WidgetDef>;

enum Entry {
    Ready(WidgetDef),
    /// Loader forced on first lookup. `None` only transiently while the
    /// loader runs.
    Lazy(Option<LazyLoader>),
}

#[derive(Default)]
struct Inner {
    items: HashMap<RegistryLabel, Entry>,
    injectors: HashMap<RegistryLabel, Injector>,
    listeners: HashMap<RegistryLabel, Vec<LoadedListener>>,
}

/// Label→definition lookup service.
///
/// Interior mutability keeps the public surface `&self` so the registry
/// can be shared freely across instances; "loaded" listeners always run
/// with the registry unborrowed, so they may re-enter it.
#[derive(Default)]
pub struct Registry {
    inner: RefCell<Inner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty shared registry.
    pub fn shared() -> Rc<Registry> {
        Rc::new(Registry::new())
    }

    /// Register a definition. Waiting consumers are notified; a
    /// replacement is never silent.
    pub fn define(&self, label: impl Into<RegistryLabel>, item: WidgetDef) {
        let label = label.into();
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            inner.items.insert(label.clone(), Entry::Ready(item));
            inner.listeners.remove(&label).unwrap_or_default()
        };
        for listener in listeners {
            listener(&label);
        }
    }

    /// Register a definition built on first lookup.
    pub fn define_lazy(
        &self,
        label: impl Into<RegistryLabel>,
        loader: impl FnOnce() -> WidgetDef + 'static,
    ) {
        let label = label.into();
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            inner
                .items
                .insert(label.clone(), Entry::Lazy(Some(Box::new(loader))));
            inner.listeners.remove(&label).unwrap_or_default()
        };
        for listener in listeners {
            listener(&label);
        }
    }

    /// Synchronous lookup. Forces lazy entries; returns `None` when the
    /// label has not been defined.
    pub fn get(&self, label: &RegistryLabel) -> Option<WidgetDef> {
        let loader = {
            let mut inner = self.inner.borrow_mut();
            match inner.items.get_mut(label) {
                Some(Entry::Ready(def)) => return Some(def.clone()),
                Some(Entry::Lazy(loader)) => loader.take()?,
                None => return None,
            }
        };
        // The loader runs with the registry unborrowed so it may re-enter.
        let def = loader();
        self.inner
            .borrow_mut()
            .items
            .insert(label.clone(), Entry::Ready(def.clone()));
        Some(def)
    }

    /// True when the label is defined (ready or lazily resolvable).
    pub fn has(&self, label: &RegistryLabel) -> bool {
        self.inner.borrow().items.contains_key(label)
    }

    /// Register an injected shared value. Waiting consumers are notified.
    pub fn define_injector(&self, label: impl Into<RegistryLabel>, item: Injector) {
        let label = label.into();
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            inner.injectors.insert(label.clone(), item);
            inner.listeners.remove(&label).unwrap_or_default()
        };
        for listener in listeners {
            listener(&label);
        }
    }

    /// Look up an injected value.
    pub fn get_injector(&self, label: &RegistryLabel) -> Option<Injector> {
        self.inner.borrow().injectors.get(label).cloned()
    }

    /// True when an injected value is present under the label.
    pub fn has_injector(&self, label: &RegistryLabel) -> bool {
        self.inner.borrow().injectors.contains_key(label)
    }

    /// Register interest in a label. The listener fires at most once, the
    /// next time the label is defined.
    pub fn on_loaded(&self, label: impl Into<RegistryLabel>, listener: LoadedListener) {
        self.inner
            .borrow_mut()
            .listeners
            .entry(label.into())
            .or_default()
            .push(listener);
    }
}

// =============================================================================
// Tests
// =============================================================================
