//! Write policy - when a field or relation edge may be written
//!
//! Policies are always evaluated against the state of storage before the
//! write phase started, so the outcome does not depend on write order.

use crate::item::class::Norewrite;
use crate::value::Value;

/// Pre-write state of one end of a relation edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndState {
    /// Row was created by the current persist
    pub created: bool,
    /// Relation already holds something on this row
    pub occupied: bool,
}

impl EndState {
    /// End of a row that will be created
    pub const NEW: EndState = EndState {
        created: true,
        occupied: false,
    };
}

/// Whether the policy of one end lets the edge be written
pub fn side_allows(policy: Option<Norewrite>, this: EndState, other: EndState) -> bool {
    match policy {
        None => true,
        Some(Norewrite::Protect) => !this.occupied && !other.occupied,
        Some(Norewrite::RequireNew) => this.created && other.created,
    }
}

/// An edge is writable when the policies of both ends allow it
pub fn edge_allowed(
    this_policy: Option<Norewrite>,
    this: EndState,
    other_policy: Option<Norewrite>,
    other: EndState,
) -> bool {
    side_allows(this_policy, this, other) && side_allows(other_policy, other, this)
}

/// Whether a plain field of an existing row gets `value`
pub fn field_writable(policy: Option<Norewrite>, current: &Value, value: &Value) -> bool {
    if current == value {
        return false;
    }
    match policy {
        None => true,
        Some(Norewrite::Protect) => current.is_null(),
        Some(Norewrite::RequireNew) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: EndState = EndState {
        created: false,
        occupied: false,
    };
    const OCCUPIED: EndState = EndState {
        created: false,
        occupied: true,
    };

    #[test]
    fn test_side_allows() {
        assert!(side_allows(None, OCCUPIED, OCCUPIED));
        assert!(side_allows(Some(Norewrite::Protect), OLD, EndState::NEW));
        assert!(!side_allows(Some(Norewrite::Protect), OLD, OCCUPIED));
        assert!(!side_allows(Some(Norewrite::Protect), OCCUPIED, OLD));
        assert!(side_allows(Some(Norewrite::RequireNew), EndState::NEW, EndState::NEW));
        assert!(!side_allows(Some(Norewrite::RequireNew), EndState::NEW, OLD));
    }

    #[test]
    fn test_edge_needs_both_ends() {
        assert!(!edge_allowed(None, OLD, Some(Norewrite::RequireNew), EndState::NEW));
        assert!(edge_allowed(None, EndState::NEW, Some(Norewrite::RequireNew), EndState::NEW));
        assert!(!edge_allowed(None, OCCUPIED, Some(Norewrite::Protect), OLD));
    }

    #[test]
    fn test_field_writable() {
        let text = Value::from("a");
        assert!(field_writable(None, &Value::Null, &text));
        assert!(!field_writable(None, &text, &text));
        assert!(field_writable(Some(Norewrite::Protect), &Value::Null, &text));
        assert!(!field_writable(Some(Norewrite::Protect), &Value::from(""), &text));
        assert!(!field_writable(Some(Norewrite::Protect), &Value::from("b"), &text));
        assert!(!field_writable(Some(Norewrite::RequireNew), &Value::Null, &text));
        assert!(field_writable(None, &text, &Value::Null));
    }
}
