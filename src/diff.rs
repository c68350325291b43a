//! Property change-detection strategies.
//!
//! A strategy decides whether a property update is observable: given the
//! previous and next value of one key, is the change something a component
//! must re-render for? Strategies are pure functions over value pairs.
//!
//! # Strategies
//!
//! - `Reference`: changed iff the identities differ (primitives by content).
//! - `Shallow`: one level deep over maps and lists; anything else always
//!   counts as changed, forcing the caller back to full replacement.
//! - `Ignore`: never changed (the value is still threaded through).
//! - `Always`: always changed.
//! - `Auto`: component definitions diff by reference, other handlers are
//!   ignored (stable across renders by assumption), maps and lists diff
//!   shallowly, everything else by reference.

use crate::types::Value;

/// Change-detection strategy for one property.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiffMode {
    /// Identity comparison.
    Reference,
    /// One-level structural comparison for maps and lists.
    Shallow,
    /// Never report a change.
    Ignore,
    /// Always report a change.
    Always,
    /// Pick a strategy from the value shape.
    #[default]
    Auto,
}

/// Apply a strategy to a previous/next value pair.
///
/// Absent keys are modeled as `None`; a key appearing or disappearing is a
/// reference-level change.
pub fn value_changed(mode: DiffMode, previous: Option<&Value>, next: Option<&Value>) -> bool {
    match mode {
        DiffMode::Ignore => false,
        DiffMode::Always => true,
        DiffMode::Reference => reference_changed(previous, next),
        DiffMode::Shallow => shallow_changed(previous, next),
        DiffMode::Auto => auto_changed(previous, next),
    }
}

fn reference_changed(previous: Option<&Value>, next: Option<&Value>) -> bool {
    match (previous, next) {
        (None, None) => false,
        (Some(a), Some(b)) => !Value::identical(a, b),
        _ => true,
    }
}

fn shallow_changed(previous: Option<&Value>, next: Option<&Value>) -> bool {
    match (previous, next) {
        (None, None) => false,
        (Some(Value::Map(a)), Some(Value::Map(b))) => {
            a.len() != b.len()
                || a.iter().any(|(k, av)| {
                    b.get(k).is_none_or(|bv| !Value::identical(av, bv))
                })
        }
        (Some(Value::List(a)), Some(Value::List(b))) => {
            a.len() != b.len()
                || a.iter()
                    .zip(b.iter())
                    .any(|(av, bv)| !Value::identical(av, bv))
        }
        // Not comparable one level deep: force full replacement.
        _ => true,
    }
}

fn auto_changed(previous: Option<&Value>, next: Option<&Value>) -> bool {
    // The next value decides the shape; fall back to the previous one for
    // removals so a departing handler stays ignored.
    let probe = next.or(previous);
    match probe {
        Some(Value::Definition(_)) => reference_changed(previous, next),
        Some(Value::Handler(_)) => false,
        Some(Value::Map(_)) | Some(Value::List(_)) => shallow_changed(previous, next),
        _ => reference_changed(previous, next),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn map_ab() -> Value {
        Value::map([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ])
    }

    #[test]
    fn test_shallow_equal_maps_unchanged() {
        assert!(!value_changed(
            DiffMode::Shallow,
            Some(&map_ab()),
            Some(&map_ab())
        ));
    }

    #[test]
    fn test_shallow_key_count_differs() {
        let a = Value::map([("a".to_string(), Value::Int(1))]);
        assert!(value_changed(DiffMode::Shallow, Some(&a), Some(&map_ab())));
    }

    #[test]
    fn test_shallow_inner_identity() {
        // Same key set, one inner value replaced by a different allocation.
        let inner = Value::map([("x".to_string(), Value::Int(9))]);
        let a = Value::map([("a".to_string(), inner.clone())]);
        let b = Value::map([("a".to_string(), inner)]);
        assert!(!value_changed(DiffMode::Shallow, Some(&a), Some(&b)));

        let c = Value::map([(
            "a".to_string(),
            Value::map([("x".to_string(), Value::Int(9))]),
        )]);
        assert!(value_changed(DiffMode::Shallow, Some(&a), Some(&c)));
    }

    #[test]
    fn test_shallow_non_container_always_changed() {
        assert!(value_changed(
            DiffMode::Shallow,
            Some(&Value::Int(1)),
            Some(&Value::Int(1))
        ));
    }

    #[test]
    fn test_reference_primitives_and_maps() {
        assert!(!value_changed(
            DiffMode::Reference,
            Some(&Value::Int(5)),
            Some(&Value::Int(5))
        ));
        // Two fresh empty maps are different identities.
        let a = Value::map([]);
        let b = Value::map([]);
        assert!(value_changed(DiffMode::Reference, Some(&a), Some(&b)));
        assert!(!value_changed(DiffMode::Reference, Some(&a), Some(&a.clone())));
    }

    #[test]
    fn test_ignore_and_always() {
        assert!(!value_changed(
            DiffMode::Ignore,
            Some(&Value::Int(1)),
            Some(&Value::Int(2))
        ));
        assert!(value_changed(
            DiffMode::Always,
            Some(&Value::Int(1)),
            Some(&Value::Int(1))
        ));
    }

    #[test]
    fn test_auto_handler_ignored() {
        let h = Value::handler(|_| {});
        // Identical handler identity across renders: no change.
        assert!(!value_changed(DiffMode::Auto, Some(&h), Some(&h.clone())));
        // Even a different handler is ignored under auto.
        let h2 = Value::handler(|_| {});
        assert!(!value_changed(DiffMode::Auto, Some(&h), Some(&h2)));
    }

    #[test]
    fn test_auto_containers_shallow() {
        assert!(!value_changed(DiffMode::Auto, Some(&map_ab()), Some(&map_ab())));
        let a = Value::map([("a".to_string(), Value::Int(1))]);
        assert!(value_changed(DiffMode::Auto, Some(&a), Some(&map_ab())));
    }

    #[test]
    fn test_key_appearing_is_a_change() {
        assert!(value_changed(DiffMode::Reference, None, Some(&Value::Int(1))));
        assert!(value_changed(DiffMode::Auto, Some(&Value::Int(1)), None));
        assert!(!value_changed(DiffMode::Auto, None, None));
    }
}
