//! Core types - property values, property bags, events, labels.
//!
//! Properties flowing through the engine are dynamic: a component does not
//! know at compile time which keys a consumer will supply, and the
//! change-detection strategies in [`crate::diff`] operate over pairs of
//! values generically. `Value` is the closed set of things a property can
//! hold; `Props` is an ordered bag of them.
//!
//! Reference-counted payloads (strings, maps, lists, handlers, component
//! definitions) make identity comparison cheap and well defined, which is
//! what the `reference` strategy relies on.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use crate::widget::WidgetDef;

new_key_type! {
    /// Stable handle to a backing resource in the presentation arena.
    pub struct ResourceId;

    /// Stable handle to a live component instance.
    pub struct InstanceId;
}

// =============================================================================
// Events and Handlers
// =============================================================================

/// An event delivered to a backing resource.
#[derive(Clone)]
pub struct Event {
    /// Event name (e.g. "click", "submit").
    pub name: Rc<str>,
    /// Arbitrary payload supplied by the dispatcher.
    pub payload: Value,
    /// The resource the event targets, when known.
    pub target: Option<ResourceId>,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
            target: None,
        }
    }

    /// Create an event carrying a payload value.
    pub fn with_payload(name: impl Into<Rc<str>>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            target: None,
        }
    }
}

/// Event callback type (Rc for shared ownership in closures).
///
/// Using Rc<dyn Fn> instead of Box<dyn Fn> allows cloning callbacks into
/// closures without ownership issues, and gives every handler a stable
/// identity for change detection.
pub type EventCallback = Rc<dyn Fn(&Event)>;

// =============================================================================
// Registry Labels
// =============================================================================

thread_local! {
    static SYMBOL_COUNTER: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// A key into the registry: a human-readable name or an opaque symbol.
///
/// Symbols are minted process-locally and never collide with names, so a
/// library can publish entries without claiming part of the name space.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryLabel {
    /// Named label, compared by content.
    Name(Rc<str>),
    /// Opaque symbolic label, compared by mint order.
    Symbol(u64),
}

impl RegistryLabel {
    /// Mint a fresh symbolic label, distinct from every previous one.
    pub fn unique() -> Self {
        SYMBOL_COUNTER.with(|c| {
            let n = c.get();
            c.set(n + 1);
            RegistryLabel::Symbol(n)
        })
    }
}

impl fmt::Debug for RegistryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryLabel::Name(n) => write!(f, "{n:?}"),
            RegistryLabel::Symbol(n) => write!(f, "#{n}"),
        }
    }
}

impl From<&str> for RegistryLabel {
    fn from(name: &str) -> Self {
        RegistryLabel::Name(Rc::from(name))
    }
}

impl From<String> for RegistryLabel {
    fn from(name: String) -> Self {
        RegistryLabel::Name(Rc::from(name.as_str()))
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamic property value.
///
/// Primitives compare by content; containers, handlers and component
/// definitions compare by identity (see [`Value::identical`]).
#[derive(Clone)]
pub enum Value {
    /// Absent / nothing.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point (compared by bit pattern).
    Float(f64),
    /// String (compared by content, like a primitive).
    Str(Rc<str>),
    /// Ordered list (compared by identity).
    List(Rc<Vec<Value>>),
    /// String-keyed map (compared by identity).
    Map(Rc<BTreeMap<String, Value>>),
    /// Event handler (compared by identity).
    Handler(EventCallback),
    /// Component definition (compared by identity).
    Definition(WidgetDef),
}

impl Value {
    /// Wrap a closure as a handler value.
    pub fn handler(f: impl Fn(&Event) + 'static) -> Self {
        Value::Handler(Rc::new(f))
    }

    /// Build a list value from an iterator.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Rc::new(items.into_iter().collect()))
    }

    /// Build a map value from key/value pairs.
    pub fn map(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Map(Rc::new(entries.into_iter().collect()))
    }

    /// Identity comparison: primitives by content, containers / handlers /
    /// definitions by pointer. This is the `reference` notion of equality
    /// used throughout change detection and key matching.
    pub fn identical(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
            (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
            (Value::Handler(x), Value::Handler(y)) => Rc::ptr_eq(x, y),
            (Value::Definition(x), Value::Definition(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// True for handler values.
    pub fn is_handler(&self) -> bool {
        matches!(self, Value::Handler(_))
    }

    /// True for component-definition values.
    pub fn is_definition(&self) -> bool {
        matches!(self, Value::Definition(_))
    }

    /// Read as &str when this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Read as i64 when this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Read as bool when this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::identical(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Map(entries) => f.debug_map().entries(entries.iter()).finish(),
            Value::Handler(_) => write!(f, "<handler>"),
            Value::Definition(def) => write!(f, "<definition {}>", def.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

impl From<WidgetDef> for Value {
    fn from(def: WidgetDef) -> Self {
        Value::Definition(def)
    }
}

// =============================================================================
// Props
// =============================================================================

/// An ordered property bag.
///
/// Keys iterate in sorted order so diagnostics and diffs are deterministic.
#[derive(Clone, Default)]
pub struct Props {
    entries: BTreeMap<String, Value>,
}

impl Props {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// True if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate entries mutably in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Sorted union of this bag's keys and another's.
    pub fn keys_union<'a>(&'a self, other: &'a Props) -> Vec<&'a str> {
        let mut keys: Vec<&str> = self.keys().chain(other.keys()).collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Merge `overlay` on top of `self`: overlay values win on conflict.
    pub fn merged_over(mut self, overlay: &Props) -> Props {
        for (k, v) in overlay.iter() {
            self.entries.insert(k.to_string(), v.clone());
        }
        self
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl FromIterator<(String, Value)> for Props {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Props {
            entries: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_primitives() {
        assert!(Value::identical(&Value::Int(5), &Value::Int(5)));
        assert!(!Value::identical(&Value::Int(5), &Value::Int(6)));
        assert!(Value::identical(&Value::from("a"), &Value::from("a")));
        assert!(!Value::identical(&Value::from("a"), &Value::from("b")));
        assert!(Value::identical(&Value::Null, &Value::Null));
        assert!(!Value::identical(&Value::Null, &Value::Int(0)));
    }

    #[test]
    fn test_identical_containers_by_pointer() {
        let m = Value::map([("a".to_string(), Value::Int(1))]);
        assert!(Value::identical(&m, &m.clone()));

        let m2 = Value::map([("a".to_string(), Value::Int(1))]);
        assert!(!Value::identical(&m, &m2));
    }

    #[test]
    fn test_identical_handlers_by_pointer() {
        let h = Value::handler(|_| {});
        assert!(Value::identical(&h, &h.clone()));
        let h2 = Value::handler(|_| {});
        assert!(!Value::identical(&h, &h2));
    }

    #[test]
    fn test_eq_follows_identity() {
        assert_eq!(Value::Int(5), Value::Int(5));
        assert_ne!(Value::from("a"), Value::from("b"));

        let list = Value::list([Value::Int(1)]);
        assert_eq!(list, list.clone());
        assert_ne!(list, Value::list([Value::Int(1)]));
    }

    #[test]
    fn test_props_union_and_merge() {
        let a = Props::new().with("x", 1).with("y", 2);
        let b = Props::new().with("y", 3).with("z", 4);

        assert_eq!(a.keys_union(&b), vec!["x", "y", "z"]);

        let merged = a.clone().merged_over(&b);
        assert_eq!(merged.get("x").and_then(Value::as_int), Some(1));
        assert_eq!(merged.get("y").and_then(Value::as_int), Some(3));
        assert_eq!(merged.get("z").and_then(Value::as_int), Some(4));
    }

    #[test]
    fn test_unique_labels_distinct() {
        let a = RegistryLabel::unique();
        let b = RegistryLabel::unique();
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }
}
