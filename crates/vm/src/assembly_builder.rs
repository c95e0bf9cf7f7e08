//! Programmatic emitter of the bytecode assembly grammar.
//!
//! Embedders and tests use the builders to produce well-formed byte streams
//! without a compiler: dependency literals are pooled automatically and
//! labels are allocated per method. [`serialize_assembly`] re-emits a loaded
//! assembly into the same grammar, which is also how the loader round-trip
//! property is exercised.

use crate::op_code::OpCode;
use crate::types::{
    actual_method_name, Assembly, AttributeModifiers, ClassModifiers, ClassType, MethodModifiers,
    MethodType,
};
use std::collections::HashMap;

/// Escapes a pooled literal for the wire format; the loader's escape-token
/// substitution is the exact inverse.
fn escape_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

fn write_opcode(buffer: &mut Vec<u8>, op: OpCode) {
    buffer.push(op as u8);
}

fn write_string(buffer: &mut Vec<u8>, text: &str) {
    write_opcode(buffer, OpCode::StringDecl);
    let escaped = escape_tokens(text);
    let bytes = escaped.as_bytes();
    debug_assert!(bytes.len() <= u8::MAX as usize, "pooled string too long");
    buffer.push(bytes.len() as u8);
    buffer.extend_from_slice(bytes);
}

fn write_size(buffer: &mut Vec<u8>, op: OpCode, count: usize) {
    write_opcode(buffer, op);
    buffer.extend_from_slice(&(count as u64).to_le_bytes());
}

fn write_modifiers(buffer: &mut Vec<u8>, bits: u8) {
    write_opcode(buffer, OpCode::ModifiersDecl);
    buffer.push(bits);
}

/// One body operation queued by a [`MethodBuilder`].
enum BodyOp {
    Simple(OpCode),
    WithOrdinal(OpCode, u64),
    WithLabel(OpCode, u16),
    Call { ordinal: u64, arity: u8 },
    PlaceLabel(u16),
}

/// Builds one method: parameters, pooled dependencies and body code.
pub struct MethodBuilder {
    name: String,
    modifiers: MethodModifiers,
    parameters: Vec<String>,
    dependencies: Vec<String>,
    dependency_index: HashMap<String, u64>,
    code: Vec<BodyOp>,
    next_label: u16,
}

impl MethodBuilder {
    pub fn new(name: &str, modifiers: MethodModifiers) -> Self {
        Self {
            name: name.to_string(),
            modifiers,
            parameters: Vec::new(),
            dependencies: Vec::new(),
            dependency_index: HashMap::new(),
            code: Vec::new(),
            next_label: 0,
        }
    }

    pub fn param(mut self, name: &str) -> Self {
        self.parameters.push(name.to_string());
        self
    }

    /// Ordinal of `literal` in the dependency pool, adding it on first use.
    pub fn dep(&mut self, literal: &str) -> u64 {
        if let Some(&ordinal) = self.dependency_index.get(literal) {
            return ordinal;
        }
        let ordinal = self.dependencies.len() as u64;
        self.dependencies.push(literal.to_string());
        self.dependency_index.insert(literal.to_string(), ordinal);
        ordinal
    }

    pub fn emit(&mut self, op: OpCode) -> &mut Self {
        self.code.push(BodyOp::Simple(op));
        self
    }

    pub fn push_string(&mut self, literal: &str) -> &mut Self {
        let ordinal = self.dep(literal);
        self.code.push(BodyOp::WithOrdinal(OpCode::PushString, ordinal));
        self
    }

    pub fn push_integer(&mut self, literal: &str) -> &mut Self {
        let ordinal = self.dep(literal);
        self.code.push(BodyOp::WithOrdinal(OpCode::PushInteger, ordinal));
        self
    }

    pub fn push_float(&mut self, literal: &str) -> &mut Self {
        let ordinal = self.dep(literal);
        self.code.push(BodyOp::WithOrdinal(OpCode::PushFloat, ordinal));
        self
    }

    pub fn push_object(&mut self, name: &str) -> &mut Self {
        let ordinal = self.dep(name);
        self.code.push(BodyOp::WithOrdinal(OpCode::PushObject, ordinal));
        self
    }

    pub fn alloc_var(&mut self, name: &str) -> &mut Self {
        let ordinal = self.dep(name);
        self.code.push(BodyOp::WithOrdinal(OpCode::AllocVar, ordinal));
        self
    }

    pub fn alloc_const_var(&mut self, name: &str) -> &mut Self {
        let ordinal = self.dep(name);
        self.code.push(BodyOp::WithOrdinal(OpCode::AllocConstVar, ordinal));
        self
    }

    /// Pushes the mangled method name and emits the call: the stack gains the
    /// name object and CALL_FUNCTION carries the matching ordinal.
    pub fn call(&mut self, mangled_name: &str, arity: u8) -> &mut Self {
        let ordinal = self.dep(mangled_name);
        self.code.push(BodyOp::WithOrdinal(OpCode::PushObject, ordinal));
        self.code.push(BodyOp::Call { ordinal, arity });
        self
    }

    /// Allocates a fresh jump label.
    pub fn new_label(&mut self) -> u16 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    pub fn jump(&mut self, label: u16) -> &mut Self {
        self.code.push(BodyOp::WithLabel(OpCode::Jump, label));
        self
    }

    pub fn jump_if_true(&mut self, label: u16) -> &mut Self {
        self.code.push(BodyOp::WithLabel(OpCode::JumpIfTrue, label));
        self
    }

    pub fn jump_if_false(&mut self, label: u16) -> &mut Self {
        self.code.push(BodyOp::WithLabel(OpCode::JumpIfFalse, label));
        self
    }

    /// Binds `label` to the current body position.
    pub fn place_label(&mut self, label: u16) -> &mut Self {
        self.code.push(BodyOp::PlaceLabel(label));
        self
    }

    fn serialize(&self, buffer: &mut Vec<u8>) {
        write_string(buffer, &self.name);
        write_modifiers(buffer, self.modifiers.bits());
        write_size(buffer, OpCode::MethodParamsDeclSize, self.parameters.len());
        for parameter in &self.parameters {
            write_string(buffer, parameter);
        }
        write_size(buffer, OpCode::DependencyPoolDeclSize, self.dependencies.len());
        for dependency in &self.dependencies {
            write_string(buffer, dependency);
        }
        write_opcode(buffer, OpCode::MethodBodyBeginDecl);
        write_opcode(buffer, OpCode::PushStackFrame);
        for op in &self.code {
            match op {
                BodyOp::Simple(op) => write_opcode(buffer, *op),
                BodyOp::WithOrdinal(op, ordinal) => {
                    write_opcode(buffer, *op);
                    buffer.extend_from_slice(&ordinal.to_le_bytes());
                }
                BodyOp::WithLabel(op, label) => {
                    write_opcode(buffer, *op);
                    buffer.extend_from_slice(&label.to_le_bytes());
                }
                BodyOp::Call { ordinal, arity } => {
                    write_opcode(buffer, OpCode::CallFunction);
                    buffer.extend_from_slice(&ordinal.to_le_bytes());
                    buffer.push(*arity);
                }
                BodyOp::PlaceLabel(label) => {
                    write_opcode(buffer, OpCode::SetLabel);
                    buffer.extend_from_slice(&label.to_le_bytes());
                }
            }
        }
        write_opcode(buffer, OpCode::MethodBodyEndDecl);
    }
}

/// Builds one class declaration.
pub struct ClassBuilder {
    name: String,
    modifiers: ClassModifiers,
    attributes: Vec<(String, AttributeModifiers)>,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    pub fn new(name: &str, modifiers: ClassModifiers) -> Self {
        Self {
            name: name.to_string(),
            modifiers,
            attributes: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn attribute(mut self, name: &str, modifiers: AttributeModifiers) -> Self {
        self.attributes.push((name.to_string(), modifiers));
        self
    }

    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    fn serialize(&self, buffer: &mut Vec<u8>) {
        write_string(buffer, &self.name);
        write_modifiers(buffer, self.modifiers.bits());
        write_size(buffer, OpCode::AttributePoolDeclSize, self.attributes.len());
        for (name, modifiers) in &self.attributes {
            write_string(buffer, name);
            write_modifiers(buffer, modifiers.bits());
        }
        write_size(buffer, OpCode::MethodPoolDeclSize, self.methods.len());
        for method in &self.methods {
            method.serialize(buffer);
        }
    }
}

/// Builds one namespace declaration.
pub struct NamespaceBuilder {
    name: String,
    friends: Vec<String>,
    classes: Vec<ClassBuilder>,
}

impl NamespaceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            friends: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn friend(mut self, name: &str) -> Self {
        self.friends.push(name.to_string());
        self
    }

    pub fn class(mut self, class: ClassBuilder) -> Self {
        self.classes.push(class);
        self
    }

    fn serialize(&self, buffer: &mut Vec<u8>) {
        write_string(buffer, &self.name);
        write_size(buffer, OpCode::FriendPoolDeclSize, self.friends.len());
        for friend in &self.friends {
            write_string(buffer, friend);
        }
        write_size(buffer, OpCode::ClassPoolDeclSize, self.classes.len());
        for class in &self.classes {
            class.serialize(buffer);
        }
    }
}

/// Builds a complete serialized assembly.
#[derive(Default)]
pub struct AssemblyBuilder {
    namespaces: Vec<NamespaceBuilder>,
}

impl AssemblyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: NamespaceBuilder) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_opcode(&mut buffer, OpCode::AssemblyBeginDecl);
        write_size(&mut buffer, OpCode::NamespacePoolDeclSize, self.namespaces.len());
        for namespace in &self.namespaces {
            namespace.serialize(&mut buffer);
        }
        write_opcode(&mut buffer, OpCode::AssemblyEndDecl);
        buffer
    }
}

/// Re-emits a loaded assembly into the declaration grammar. Label tables are
/// regenerated from offsets, so jump targets survive even when SET_LABEL
/// records move.
pub fn serialize_assembly(assembly: &Assembly) -> Vec<u8> {
    let mut buffer = Vec::new();
    let namespaces: Vec<&crate::types::NamespaceType> = assembly
        .namespaces
        .iter()
        .filter(|ns| !ns.name.is_empty())
        .collect();
    write_opcode(&mut buffer, OpCode::AssemblyBeginDecl);
    write_size(&mut buffer, OpCode::NamespacePoolDeclSize, namespaces.len());
    for namespace in namespaces {
        write_string(&mut buffer, &namespace.name);
        let mut friends: Vec<&String> = namespace.friends.iter().collect();
        friends.sort();
        write_size(&mut buffer, OpCode::FriendPoolDeclSize, friends.len());
        for friend in friends {
            write_string(&mut buffer, friend);
        }
        let mut class_ids: Vec<u32> = namespace.classes.values().map(|id| id.0).collect();
        class_ids.sort_unstable();
        write_size(&mut buffer, OpCode::ClassPoolDeclSize, class_ids.len());
        for id in class_ids {
            serialize_class(&mut buffer, assembly.class(crate::types::ClassId(id)));
        }
    }
    write_opcode(&mut buffer, OpCode::AssemblyEndDecl);
    buffer
}

fn serialize_class(buffer: &mut Vec<u8>, class: &ClassType) {
    write_string(buffer, &class.name);
    write_modifiers(buffer, class.modifiers.bits());

    let mut attributes: Vec<&crate::types::AttributeType> = class
        .static_attributes
        .values()
        .chain(class.object_attributes.values())
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));
    write_size(buffer, OpCode::AttributePoolDeclSize, attributes.len());
    for attribute in attributes {
        write_string(buffer, &attribute.name);
        write_modifiers(buffer, attribute.modifiers.bits());
    }

    let mut methods: Vec<&std::sync::Arc<MethodType>> = class.methods.values().collect();
    methods.sort_by(|a, b| a.name.cmp(&b.name));
    write_size(buffer, OpCode::MethodPoolDeclSize, methods.len());
    for method in methods {
        serialize_method(buffer, method);
    }
}

fn serialize_method(buffer: &mut Vec<u8>, method: &MethodType) {
    write_string(buffer, actual_method_name(&method.name));
    write_modifiers(buffer, method.modifiers.bits());
    write_size(buffer, OpCode::MethodParamsDeclSize, method.parameters.len());
    for parameter in &method.parameters {
        write_string(buffer, parameter);
    }
    write_size(buffer, OpCode::DependencyPoolDeclSize, method.dependencies.len());
    for dependency in &method.dependencies {
        write_string(buffer, dependency);
    }
    write_opcode(buffer, OpCode::MethodBodyBeginDecl);

    let mut offset = 0usize;
    while offset < method.body.len() {
        for (label, &target) in method.labels.iter().enumerate() {
            if target == offset {
                write_opcode(buffer, OpCode::SetLabel);
                buffer.extend_from_slice(&(label as u16).to_le_bytes());
            }
        }
        let byte = method.body[offset];
        let op = OpCode::from_byte(byte).expect("loaded body contains valid opcodes");
        buffer.push(byte);
        let operand = op.operand_size();
        buffer.extend_from_slice(&method.body[offset + 1..offset + 1 + operand]);
        offset += 1 + operand;
    }
    write_opcode(buffer, OpCode::MethodBodyEndDecl);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::AssemblyLoader;
    use crate::op_code::OpCode;

    #[test]
    fn builds_a_loadable_assembly() {
        let mut main = MethodBuilder::new(
            "Main",
            MethodModifiers::STATIC | MethodModifiers::PUBLIC | MethodModifiers::ENTRY_POINT,
        );
        main.push_integer("2");
        main.push_integer("3");
        main.emit(OpCode::SumOp);
        main.emit(OpCode::PopToReturn);

        let bytes = AssemblyBuilder::new()
            .namespace(
                NamespaceBuilder::new("Main")
                    .friend("System")
                    .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
            )
            .to_bytes();

        let loaded = AssemblyLoader::new(true, true).load(&bytes[..]).unwrap();
        let entry = loaded.entry_point.expect("entry point discovered");
        assert_eq!(entry.namespace.as_deref(), Some("Main"));
        assert_eq!(entry.class.as_deref(), Some("Program"));
        assert_eq!(entry.method.as_deref(), Some("Main_0"));

        let method = loaded
            .assembly
            .method_by_path("Main", "Program", "Main_0")
            .expect("method loaded");
        assert!(method.is_entry_point());
        assert_eq!(method.dependencies, vec!["2".to_string(), "3".to_string()]);
        assert_eq!(method.body[0], OpCode::PushStackFrame as u8);
    }

    #[test]
    fn labels_round_trip_through_the_loader() {
        let mut method = MethodBuilder::new("Loop", MethodModifiers::STATIC | MethodModifiers::PUBLIC);
        let top = method.new_label();
        method.place_label(top);
        method.emit(OpCode::PushTrue);
        method.jump_if_false(top);
        method.emit(OpCode::Return);

        let bytes = AssemblyBuilder::new()
            .namespace(
                NamespaceBuilder::new("N")
                    .class(ClassBuilder::new("C", ClassModifiers::STATIC).method(method)),
            )
            .to_bytes();
        let loaded = AssemblyLoader::new(true, false).load(&bytes[..]).unwrap();
        let method = loaded.assembly.method_by_path("N", "C", "Loop_0").unwrap();
        // Label 0 binds right after the mandatory PUSH_STACKFRAME byte.
        assert_eq!(method.labels, vec![1]);
    }

    #[test]
    fn escape_round_trip() {
        let mut method = MethodBuilder::new(
            "Main",
            MethodModifiers::STATIC | MethodModifiers::PUBLIC | MethodModifiers::ENTRY_POINT,
        );
        method.push_string("line\nbreak\t\"quoted\"");
        method.emit(OpCode::PopToReturn);

        let bytes = AssemblyBuilder::new()
            .namespace(
                NamespaceBuilder::new("N")
                    .class(ClassBuilder::new("C", ClassModifiers::STATIC).method(method)),
            )
            .to_bytes();
        let loaded = AssemblyLoader::new(true, false).load(&bytes[..]).unwrap();
        let method = loaded.assembly.method_by_path("N", "C", "Main_0").unwrap();
        assert_eq!(method.dependencies[0], "line\nbreak\t\"quoted\"");
    }
}
