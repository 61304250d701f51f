//! Operator definitions and the pattern registry.

use std::collections::HashMap;
use std::fmt;

use crate::arena::{Arena, Handle};
use crate::error::IrError;

/// Classification of an operator for fusion analysis.
///
/// The ordering matters: the lattice runs from the most fusable kind to
/// the least, and combining two patterns takes the maximum. `Opaque` is
/// the absorbing top element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OpPattern {
    /// Element-wise map with 1:1 input-output correspondence.
    ElemWise = 0,
    /// Element-wise map with shape broadcast on some inputs.
    Broadcast = 1,
    /// One-to-one shape transform (reshape, transpose, concat).
    Injective = 2,
    /// Commutative reduction with N:1 mapping.
    CommReduce = 3,
    /// Complex operator whose consumers may still fuse into its output
    /// (convolution, matmul). Acts as the anchor of a fused group.
    OutEWiseFusable = 4,
    /// Tuple formation or destructuring.
    Tuple = 5,
    /// Cannot participate in fusion.
    Opaque = 6,
}

impl OpPattern {
    /// Combines two patterns into the one governing both.
    ///
    /// Associative, commutative, idempotent; `Opaque` absorbs everything.
    pub fn combine(self, other: OpPattern) -> OpPattern {
        self.max(other)
    }
}

impl fmt::Display for OpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ElemWise => "elemwise",
            Self::Broadcast => "broadcast",
            Self::Injective => "injective",
            Self::CommReduce => "comm-reduce",
            Self::OutEWiseFusable => "out-ewise-fusable",
            Self::Tuple => "tuple",
            Self::Opaque => "opaque",
        })
    }
}

/// An ordered key/value attribute bag attached to an operator.
///
/// Insertion-ordered so that dumps and group metadata are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpAttrs {
    entries: Vec<(String, String)>,
}

impl OpAttrs {
    /// Creates an empty attribute bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.into();
        } else {
            self.entries.push((key, value.into()));
        }
    }

    /// Looks up an attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `true` if the bag holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A registered tensor operator.
#[derive(Clone, Debug)]
pub struct OpDef {
    /// Unique operator name.
    pub name: String,
    /// Fusion pattern of this operator.
    pub pattern: OpPattern,
    /// Optional operator attributes.
    pub attrs: OpAttrs,
}

/// The operator registry: maps operator identity to its fusion pattern.
///
/// Operators interned without an explicit registration default to
/// [`OpPattern::Opaque`].
#[derive(Clone, Debug, Default)]
pub struct OpRegistry {
    ops: Arena<OpDef>,
    by_name: HashMap<String, Handle<OpDef>>,
}

impl OpRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operator with the given pattern.
    ///
    /// # Errors
    ///
    /// Returns [`IrError::DuplicateOp`] if the name is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        pattern: OpPattern,
    ) -> Result<Handle<OpDef>, IrError> {
        self.register_with_attrs(name, pattern, OpAttrs::new())
    }

    /// Registers an operator with a pattern and an attribute bag.
    pub fn register_with_attrs(
        &mut self,
        name: impl Into<String>,
        pattern: OpPattern,
        attrs: OpAttrs,
    ) -> Result<Handle<OpDef>, IrError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(IrError::DuplicateOp { name });
        }
        let handle = self.ops.alloc(OpDef {
            name: name.clone(),
            pattern,
            attrs,
        });
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    /// Interns an operator by name, creating an `Opaque` entry if absent.
    pub fn intern(&mut self, name: impl Into<String>) -> Handle<OpDef> {
        let name = name.into();
        if let Some(&handle) = self.by_name.get(&name) {
            return handle;
        }
        let handle = self.ops.alloc(OpDef {
            name: name.clone(),
            pattern: OpPattern::Opaque,
            attrs: OpAttrs::new(),
        });
        self.by_name.insert(name, handle);
        handle
    }

    /// Looks up a registered operator by name.
    pub fn find(&self, name: &str) -> Option<Handle<OpDef>> {
        self.by_name.get(name).copied()
    }

    /// Returns the definition behind a handle.
    pub fn get(&self, handle: Handle<OpDef>) -> &OpDef {
        &self.ops[handle]
    }

    /// Returns the fusion pattern of an operator.
    pub fn pattern(&self, handle: Handle<OpDef>) -> OpPattern {
        self.ops[handle].pattern
    }

    /// Number of interned operators.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no operators are interned.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_ordering() {
        assert!(OpPattern::ElemWise < OpPattern::Broadcast);
        assert!(OpPattern::Broadcast < OpPattern::Injective);
        assert!(OpPattern::Injective < OpPattern::CommReduce);
        assert!(OpPattern::CommReduce < OpPattern::OutEWiseFusable);
        assert!(OpPattern::OutEWiseFusable < OpPattern::Tuple);
        assert!(OpPattern::Tuple < OpPattern::Opaque);
    }

    #[test]
    fn pattern_combine() {
        assert_eq!(
            OpPattern::ElemWise.combine(OpPattern::ElemWise),
            OpPattern::ElemWise
        );
        assert_eq!(
            OpPattern::ElemWise.combine(OpPattern::Injective),
            OpPattern::Injective
        );
        assert_eq!(
            OpPattern::Opaque.combine(OpPattern::ElemWise),
            OpPattern::Opaque
        );
        // Commutative.
        assert_eq!(
            OpPattern::Broadcast.combine(OpPattern::CommReduce),
            OpPattern::CommReduce.combine(OpPattern::Broadcast)
        );
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut reg = OpRegistry::new();
        let add = reg.register("add", OpPattern::Broadcast).unwrap();
        assert_eq!(reg.pattern(add), OpPattern::Broadcast);
        assert_eq!(reg.get(add).name, "add");
        assert_eq!(reg.find("add"), Some(add));
        assert_eq!(reg.find("mul"), None);
    }

    #[test]
    fn registry_duplicate_rejected() {
        let mut reg = OpRegistry::new();
        reg.register("relu", OpPattern::ElemWise).unwrap();
        let err = reg.register("relu", OpPattern::Opaque).unwrap_err();
        assert!(matches!(err, IrError::DuplicateOp { .. }));
    }

    #[test]
    fn intern_defaults_to_opaque() {
        let mut reg = OpRegistry::new();
        let custom = reg.intern("vendor.custom");
        assert_eq!(reg.pattern(custom), OpPattern::Opaque);
        // Interning again returns the same handle.
        assert_eq!(reg.intern("vendor.custom"), custom);
    }

    #[test]
    fn attrs_ordered_and_replaced() {
        let mut attrs = OpAttrs::new();
        attrs.set("kernel", "3x3");
        attrs.set("stride", "1");
        attrs.set("kernel", "5x5");
        let entries: Vec<_> = attrs.iter().collect();
        assert_eq!(entries, vec![("kernel", "5x5"), ("stride", "1")]);
        assert_eq!(attrs.get("stride"), Some("1"));
        assert_eq!(attrs.get("pad"), None);
    }
}
