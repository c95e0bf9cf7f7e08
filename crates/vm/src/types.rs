//! Static metadata of a loaded assembly.
//!
//! The loader materializes namespaces, classes, attributes and methods into
//! these types once; during execution they are immutable apart from the
//! per-class static-constructor flag and the runtime handles (wrapper and
//! static instance) installed at VM start-up.

use crate::object::ObjectRef;
use bitflags::bitflags;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

bitflags! {
    /// Method modifier bits as serialized in bytecode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodModifiers: u8 {
        const ABSTRACT           = 1;
        const STATIC             = 2;
        const PUBLIC             = 4;
        const CONSTRUCTOR        = 8;
        const STATIC_CONSTRUCTOR = 16;
        const ENTRY_POINT        = 128;
    }
}

bitflags! {
    /// Attribute modifier bits as serialized in bytecode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttributeModifiers: u8 {
        const STATIC = 1;
        const CONST  = 2;
        const PUBLIC = 4;
    }
}

bitflags! {
    /// Class modifier bits as serialized in bytecode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassModifiers: u8 {
        const STATIC                 = 1;
        const INTERFACE              = 2;
        const ABSTRACT               = 4;
        const CONST                  = 8;
        const INTERNAL               = 16;
        const HAS_STATIC_CONSTRUCTOR = 32;
        const SYSTEM                 = 128;
    }
}

/// Index of a namespace inside [`Assembly::namespaces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(pub u32);

/// Index of a class inside [`Assembly::classes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Declared attribute: name plus modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    pub name: String,
    pub modifiers: AttributeModifiers,
}

impl AttributeType {
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::STATIC)
    }

    pub fn is_const(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::CONST)
    }

    pub fn is_public(&self) -> bool {
        self.modifiers.contains(AttributeModifiers::PUBLIC)
    }
}

/// Declared method. `name` is the mangled form; `labels` maps label indices
/// to byte offsets inside `body`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodType {
    pub name: String,
    pub parameters: Vec<String>,
    pub dependencies: Vec<String>,
    pub labels: Vec<usize>,
    pub body: Vec<u8>,
    pub modifiers: MethodModifiers,
}

impl MethodType {
    pub fn is_public(&self) -> bool {
        self.modifiers.contains(MethodModifiers::PUBLIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(MethodModifiers::ABSTRACT)
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(MethodModifiers::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.modifiers.contains(MethodModifiers::CONSTRUCTOR)
    }

    pub fn is_static_constructor(&self) -> bool {
        self.modifiers.contains(MethodModifiers::STATIC_CONSTRUCTOR)
    }

    pub fn is_entry_point(&self) -> bool {
        self.modifiers.contains(MethodModifiers::ENTRY_POINT)
    }
}

/// Declared class with its attribute and method tables.
#[derive(Debug, Clone)]
pub struct ClassType {
    pub name: String,
    pub namespace: NamespaceId,
    pub static_attributes: HashMap<String, AttributeType>,
    pub object_attributes: HashMap<String, AttributeType>,
    pub methods: HashMap<String, Arc<MethodType>>,
    pub modifiers: ClassModifiers,
    /// Heap handle of the singleton ClassWrapper, installed at start-up.
    pub wrapper: Option<ObjectRef>,
    /// Heap handle of the singleton static-state instance.
    pub static_instance: Option<ObjectRef>,
    pub static_constructor_called: bool,
}

impl ClassType {
    pub fn new(name: String, namespace: NamespaceId, modifiers: ClassModifiers) -> Self {
        Self {
            name,
            namespace,
            static_attributes: HashMap::new(),
            object_attributes: HashMap::new(),
            methods: HashMap::new(),
            modifiers,
            wrapper: None,
            static_instance: None,
            static_constructor_called: false,
        }
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(ClassModifiers::STATIC)
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(ClassModifiers::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(ClassModifiers::ABSTRACT)
    }

    pub fn is_const(&self) -> bool {
        self.modifiers.contains(ClassModifiers::CONST)
    }

    pub fn is_internal(&self) -> bool {
        self.modifiers.contains(ClassModifiers::INTERNAL)
    }

    pub fn has_static_constructor(&self) -> bool {
        self.modifiers.contains(ClassModifiers::HAS_STATIC_CONSTRUCTOR)
    }

    pub fn is_system(&self) -> bool {
        self.modifiers.contains(ClassModifiers::SYSTEM)
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }
}

/// Declared namespace: class table plus friend namespaces.
#[derive(Debug, Clone, Default)]
pub struct NamespaceType {
    pub name: String,
    pub friends: HashSet<String>,
    pub classes: HashMap<String, ClassId>,
    /// Heap handle of the singleton NamespaceWrapper, installed at start-up.
    pub wrapper: Option<ObjectRef>,
}

/// A loaded program image: every namespace, class and method.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub namespaces: Vec<NamespaceType>,
    pub classes: Vec<ClassType>,
    namespace_index: HashMap<String, NamespaceId>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn namespace(&self, id: NamespaceId) -> &NamespaceType {
        &self.namespaces[id.0 as usize]
    }

    pub fn namespace_mut(&mut self, id: NamespaceId) -> &mut NamespaceType {
        &mut self.namespaces[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &ClassType {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassType {
        &mut self.classes[id.0 as usize]
    }

    pub fn namespace_by_name(&self, name: &str) -> Option<NamespaceId> {
        self.namespace_index.get(name).copied()
    }

    /// Adds an empty namespace and indexes it by name.
    pub fn add_namespace(&mut self, mut namespace: NamespaceType) -> NamespaceId {
        let id = NamespaceId(self.namespaces.len() as u32);
        namespace.classes = HashMap::new();
        self.namespace_index.insert(namespace.name.clone(), id);
        self.namespaces.push(namespace);
        id
    }

    /// Adds a class into its namespace's table.
    pub fn add_class(&mut self, class: ClassType) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let namespace = class.namespace;
        let name = class.name.clone();
        self.classes.push(class);
        self.namespaces[namespace.0 as usize].classes.insert(name, id);
        id
    }

    /// Removes a namespace and its classes by name; used to re-declare the
    /// built-in System namespace. Class storage is retained (ids are dense
    /// and stable), only the lookup entries disappear.
    pub fn remove_namespace(&mut self, name: &str) {
        if let Some(id) = self.namespace_index.remove(name) {
            self.namespaces[id.0 as usize].classes.clear();
            self.namespaces[id.0 as usize].name.clear();
        }
    }

    pub fn class_by_name(&self, namespace: NamespaceId, name: &str) -> Option<ClassId> {
        self.namespace(namespace).classes.get(name).copied()
    }

    pub fn method_by_path(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
    ) -> Option<Arc<MethodType>> {
        let namespace = self.namespace_by_name(namespace)?;
        let class = self.class_by_name(namespace, class)?;
        self.class(class).method(method)
    }

    /// Full `namespace.Class` rendering for diagnostics.
    pub fn full_class_name(&self, id: ClassId) -> String {
        let class = self.class(id);
        format!("{}.{}", self.namespace(class.namespace).name, class.name)
    }
}

/// Mangles a method name by arity: `Name_N`.
pub fn mangle_method(name: &str, arity: usize) -> String {
    format!("{name}_{arity}")
}

/// Mangled name of a class's static constructor.
pub fn mangle_static_constructor(name: &str) -> String {
    format!("{name}_0_static")
}

/// Strips the arity (and static-constructor) suffix from a mangled name.
pub fn actual_method_name(mangled: &str) -> &str {
    let base = mangled.strip_suffix("_static").unwrap_or(mangled);
    match base.rfind('_') {
        Some(position) => &base[..position],
        None => base,
    }
}

/// Human-readable `Name(params)` rendering of a method for diagnostics.
pub fn full_method_name(method: &MethodType) -> String {
    format!(
        "{}({})",
        actual_method_name(&method.name),
        method.parameters.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangling() {
        assert_eq!(mangle_method("Print", 1), "Print_1");
        assert_eq!(mangle_static_constructor("Config"), "Config_0_static");
        assert_eq!(actual_method_name("Print_1"), "Print");
        assert_eq!(actual_method_name("Config_0_static"), "Config");
        assert_eq!(actual_method_name("GetByIndex_2"), "GetByIndex");
    }

    #[test]
    fn assembly_indexing() {
        let mut assembly = Assembly::new();
        let ns = assembly.add_namespace(NamespaceType {
            name: "Main".into(),
            ..Default::default()
        });
        let class = assembly.add_class(ClassType::new("Program".into(), ns, ClassModifiers::STATIC));
        assert_eq!(assembly.namespace_by_name("Main"), Some(ns));
        assert_eq!(assembly.class_by_name(ns, "Program"), Some(class));
        assert_eq!(assembly.full_class_name(class), "Main.Program");
        assert!(assembly.class(class).is_static());
    }
}
