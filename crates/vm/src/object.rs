//! Runtime value model.
//!
//! Every value lives in one of the collector's typed slab pools and is
//! addressed by a copyable [`ObjectRef`] carrying a type tag and a slot
//! index. The Null/True/False singletons use index zero and are not backed
//! by any pool.

use crate::big_int::MslInt;
use crate::types::{AttributeModifiers, ClassId, NamespaceId};
use hashbrown::HashMap;
use std::fmt;

/// Type tag driving dispatch throughout the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    ClassObject,
    Integer,
    Float,
    String,
    Null,
    True,
    False,
    Namespace,
    Class,
    Local,
    Attribute,
    Unknown,
    Array,
    Base,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::ClassObject => "Class Instance",
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::String => "String",
            TypeTag::Null => "Null",
            TypeTag::True => "True",
            TypeTag::False => "False",
            TypeTag::Namespace => "Namespace",
            TypeTag::Class => "Class",
            TypeTag::Local => "Local",
            TypeTag::Attribute => "Attribute",
            TypeTag::Unknown => "Unknown",
            TypeTag::Array => "Array",
            TypeTag::Base => "Base",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collector state of a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcState {
    Free,
    #[default]
    Unmarked,
    Marked,
}

/// Handle to a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub tag: TypeTag,
    pub index: u32,
}

impl ObjectRef {
    pub const NULL: ObjectRef = ObjectRef {
        tag: TypeTag::Null,
        index: 0,
    };
    pub const TRUE: ObjectRef = ObjectRef {
        tag: TypeTag::True,
        index: 0,
    };
    pub const FALSE: ObjectRef = ObjectRef {
        tag: TypeTag::False,
        index: 0,
    };

    pub fn new(tag: TypeTag, index: u32) -> Self {
        Self { tag, index }
    }

    /// The singleton for a host boolean.
    pub fn bool(value: bool) -> Self {
        if value {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    pub fn is_null(self) -> bool {
        self.tag == TypeTag::Null
    }
}

/// An assignable cell: value reference plus const flag. Frame locals and
/// array elements are made of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub value: ObjectRef,
    pub is_const: bool,
}

impl Local {
    pub fn new(value: ObjectRef) -> Self {
        Self {
            value,
            is_const: false,
        }
    }

    pub fn constant(value: ObjectRef) -> Self {
        Self {
            value,
            is_const: true,
        }
    }
}

/// The cell a [`LocalObject`] aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSlot {
    /// Named slot in the locals table of the frame with this id.
    Frame { frame: u64 },
    /// Element of an array object.
    ArrayElem { array: ObjectRef, index: usize },
}

/// Capabilities every pooled value exposes to the collector.
pub trait HeapObject {
    fn state(&self) -> GcState;
    fn set_state(&mut self, state: GcState);
    /// Heap-owned bytes beyond the slab cell itself.
    fn byte_size(&self) -> usize;
}

macro_rules! heap_object {
    ($type:ty) => {
        impl HeapObject for $type {
            fn state(&self) -> GcState {
                self.state
            }

            fn set_state(&mut self, state: GcState) {
                self.state = state;
            }

            fn byte_size(&self) -> usize {
                self.heap_bytes()
            }
        }
    };
}

/// INTEGER primitive.
#[derive(Debug, Clone)]
pub struct IntegerObject {
    pub state: GcState,
    pub value: MslInt,
}

impl IntegerObject {
    pub fn new(value: MslInt) -> Self {
        Self {
            state: GcState::Unmarked,
            value,
        }
    }

    fn heap_bytes(&self) -> usize {
        self.value.byte_size()
    }
}

heap_object!(IntegerObject);

/// FLOAT primitive.
#[derive(Debug, Clone)]
pub struct FloatObject {
    pub state: GcState,
    pub value: f64,
}

impl FloatObject {
    pub fn new(value: f64) -> Self {
        Self {
            state: GcState::Unmarked,
            value,
        }
    }

    /// Compact decimal rendering used by Print and string coercion.
    pub fn to_text(&self) -> String {
        if self.value == f64::INFINITY {
            "inf".to_string()
        } else if self.value == f64::NEG_INFINITY {
            "-inf".to_string()
        } else {
            format!("{}", self.value)
        }
    }

    fn heap_bytes(&self) -> usize {
        0
    }
}

heap_object!(FloatObject);

/// STRING primitive; opaque text.
#[derive(Debug, Clone)]
pub struct StringObject {
    pub state: GcState,
    pub value: String,
}

impl StringObject {
    pub fn new(value: String) -> Self {
        Self {
            state: GcState::Unmarked,
            value,
        }
    }

    fn heap_bytes(&self) -> usize {
        self.value.capacity()
    }
}

heap_object!(StringObject);

/// Ordered, growable sequence of assignable cells.
#[derive(Debug, Clone)]
pub struct ArrayObject {
    pub state: GcState,
    pub elements: Vec<Local>,
}

impl ArrayObject {
    pub fn new(size: usize) -> Self {
        Self {
            state: GcState::Unmarked,
            elements: vec![Local::new(ObjectRef::NULL); size],
        }
    }

    fn heap_bytes(&self) -> usize {
        self.elements.capacity() * std::mem::size_of::<Local>()
    }
}

heap_object!(ArrayObject);

/// Instance of a user class: attribute-name to AttributeObject handles plus
/// the class it was constructed from.
#[derive(Debug, Clone)]
pub struct ClassObject {
    pub state: GcState,
    pub class: ClassId,
    pub attributes: HashMap<String, ObjectRef>,
}

impl ClassObject {
    pub fn new(class: ClassId) -> Self {
        Self {
            state: GcState::Unmarked,
            class,
            attributes: HashMap::new(),
        }
    }

    fn heap_bytes(&self) -> usize {
        self.attributes.len() * (std::mem::size_of::<String>() + std::mem::size_of::<ObjectRef>())
    }
}

heap_object!(ClassObject);

/// Identity handle for a class used as a value.
#[derive(Debug, Clone)]
pub struct ClassWrapper {
    pub state: GcState,
    pub class: ClassId,
}

impl ClassWrapper {
    pub fn new(class: ClassId) -> Self {
        Self {
            state: GcState::Unmarked,
            class,
        }
    }

    fn heap_bytes(&self) -> usize {
        0
    }
}

heap_object!(ClassWrapper);

/// Identity handle for a namespace used as a value.
#[derive(Debug, Clone)]
pub struct NamespaceWrapper {
    pub state: GcState,
    pub namespace: NamespaceId,
}

impl NamespaceWrapper {
    pub fn new(namespace: NamespaceId) -> Self {
        Self {
            state: GcState::Unmarked,
            namespace,
        }
    }

    fn heap_bytes(&self) -> usize {
        0
    }
}

heap_object!(NamespaceWrapper);

/// Named slot inside a class instance or static scope; owns the current
/// value reference.
#[derive(Debug, Clone)]
pub struct AttributeObject {
    pub state: GcState,
    pub name: String,
    pub modifiers: AttributeModifiers,
    pub value: ObjectRef,
}

impl AttributeObject {
    pub fn new(name: String, modifiers: AttributeModifiers) -> Self {
        Self {
            state: GcState::Unmarked,
            name,
            modifiers,
            value: ObjectRef::NULL,
        }
    }

    pub fn is_const(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::CONST)
    }

    pub fn is_public(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::PUBLIC)
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::STATIC)
    }

    fn heap_bytes(&self) -> usize {
        self.name.capacity()
    }
}

heap_object!(AttributeObject);

/// Named reference bound to an assignable cell; distinct from the value the
/// cell currently holds.
#[derive(Debug, Clone)]
pub struct LocalObject {
    pub state: GcState,
    pub name: String,
    pub slot: LocalSlot,
}

impl LocalObject {
    pub fn new(name: String, slot: LocalSlot) -> Self {
        Self {
            state: GcState::Unmarked,
            name,
            slot,
        }
    }

    fn heap_bytes(&self) -> usize {
        self.name.capacity()
    }
}

heap_object!(LocalObject);

/// Name-only stand-in pushed by PUSH_OBJECT and resolved at first use.
#[derive(Debug, Clone)]
pub struct UnknownObject {
    pub state: GcState,
    pub name: String,
}

impl UnknownObject {
    pub fn new(name: String) -> Self {
        Self {
            state: GcState::Unmarked,
            name,
        }
    }

    fn heap_bytes(&self) -> usize {
        self.name.capacity()
    }
}

heap_object!(UnknownObject);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_refs() {
        assert!(ObjectRef::NULL.is_null());
        assert_eq!(ObjectRef::bool(true), ObjectRef::TRUE);
        assert_eq!(ObjectRef::bool(false), ObjectRef::FALSE);
        assert_eq!(ObjectRef::TRUE.index, 0);
    }

    #[test]
    fn byte_sizes() {
        let string = StringObject::new(String::from("hello world"));
        assert!(string.byte_size() >= 11);
        assert_eq!(FloatObject::new(1.5).byte_size(), 0);
        let array = ArrayObject::new(4);
        assert!(array.byte_size() >= 4 * std::mem::size_of::<Local>());
    }

    #[test]
    fn float_text() {
        assert_eq!(FloatObject::new(1.0).to_text(), "1");
        assert_eq!(FloatObject::new(0.5).to_text(), "0.5");
        assert_eq!(FloatObject::new(f64::INFINITY).to_text(), "inf");
    }
}
