//! Tri-state fields
//!
//! Every board and channel attribute is either unset, learned from the
//! board, or fixed by static configuration. An override always wins over a
//! discovered value, and a discovered value over nothing.

use serde::Serialize;

/// Where a field's current value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    Unset,
    Discovered,
    Overridden,
}

/// A field with separate discovered and overridden values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovered<T> {
    discovered: Option<T>,
    overridden: Option<T>,
}

impl<T> Default for Discovered<T> {
    fn default() -> Self {
        Self {
            discovered: None,
            overridden: None,
        }
    }
}

impl<T> Discovered<T> {
    /// A field with no value yet
    pub fn unset() -> Self {
        Self::default()
    }

    /// A field learned from the board
    pub fn from_discovered(value: T) -> Self {
        Self {
            discovered: Some(value),
            overridden: None,
        }
    }

    /// A field fixed by configuration
    pub fn from_override(value: T) -> Self {
        Self {
            discovered: None,
            overridden: Some(value),
        }
    }

    /// Record a value read from the board; an override still wins
    pub fn set_discovered(&mut self, value: T) {
        self.discovered = Some(value);
    }

    /// Fix the value from configuration
    pub fn set_override(&mut self, value: T) {
        self.overridden = Some(value);
    }

    /// Effective value
    pub fn value(&self) -> Option<&T> {
        self.overridden.as_ref().or(self.discovered.as_ref())
    }

    /// Value read from the board, ignoring any override
    pub fn discovered_value(&self) -> Option<&T> {
        self.discovered.as_ref()
    }

    /// Value fixed by configuration
    pub fn override_value(&self) -> Option<&T> {
        self.overridden.as_ref()
    }

    /// Returns true if the board has reported this field
    pub fn is_discovered(&self) -> bool {
        self.discovered.is_some()
    }

    /// Returns true if any value is present
    pub fn is_set(&self) -> bool {
        self.value().is_some()
    }

    pub fn origin(&self) -> FieldOrigin {
        if self.overridden.is_some() {
            FieldOrigin::Overridden
        } else if self.discovered.is_some() {
            FieldOrigin::Discovered
        } else {
            FieldOrigin::Unset
        }
    }
}

impl<T: Clone> Discovered<T> {
    /// Effective value, cloned
    pub fn get(&self) -> Option<T> {
        self.value().cloned()
    }
}
