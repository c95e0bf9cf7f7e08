//! Streaming deserializer from bytecode to the in-memory class tables.
//!
//! The loader walks the declaration grammar record by record, validating
//! every opcode against the expected position, rejecting duplicate
//! declarations and out-of-range labels, and discovering the entry point.
//! Any error discards the partially read assembly.

use crate::error::LoaderError;
use crate::frame::CallPath;
use crate::op_code::OpCode;
use crate::reader::BytecodeReader;
use crate::types::{
    mangle_method, mangle_static_constructor, Assembly, AttributeModifiers, AttributeType,
    ClassModifiers, ClassType, MethodModifiers, MethodType, NamespaceId, NamespaceType,
};
use std::io::Read;
use std::sync::Arc;

/// Upper bound on any declared pool size; counts beyond it can only come
/// from a corrupt stream.
const MAX_POOL_SIZE: u64 = 1 << 20;

/// A successfully deserialized assembly plus its entry point, if declared.
pub struct LoadedAssembly {
    pub assembly: Assembly,
    pub entry_point: Option<CallPath>,
}

/// Deserializes one assembly from a byte stream.
pub struct AssemblyLoader {
    verify: bool,
    preallocate: bool,
}

impl AssemblyLoader {
    pub fn new(verify_bytecode: bool, allow_memory_preallocation: bool) -> Self {
        Self {
            verify: verify_bytecode,
            preallocate: allow_memory_preallocation,
        }
    }

    pub fn load<R: Read>(&self, source: R) -> Result<LoadedAssembly, LoaderError> {
        let mut reader = BytecodeReader::new(source);
        let mut assembly = Assembly::new();
        let mut entry_point = None;

        self.expect(&mut reader, OpCode::AssemblyBeginDecl)?;
        self.expect(&mut reader, OpCode::NamespacePoolDeclSize)?;
        let namespace_count = self.read_count(&mut reader, "namespace pool")?;

        for _ in 0..namespace_count {
            self.read_namespace(&mut reader, &mut assembly, &mut entry_point)?;
        }
        self.expect(&mut reader, OpCode::AssemblyEndDecl)?;

        Ok(LoadedAssembly {
            assembly,
            entry_point,
        })
    }

    fn read_namespace<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
        assembly: &mut Assembly,
        entry_point: &mut Option<CallPath>,
    ) -> Result<(), LoaderError> {
        self.expect(reader, OpCode::StringDecl)?;
        let name = reader.read_string()?;
        if self.verify && assembly.namespace_by_name(&name).is_some() {
            return Err(LoaderError::duplicate("namespace", name));
        }

        self.expect(reader, OpCode::FriendPoolDeclSize)?;
        let friend_count = self.read_count(reader, "friend pool")?;
        let mut namespace = NamespaceType {
            name: name.clone(),
            ..Default::default()
        };
        for _ in 0..friend_count {
            self.expect(reader, OpCode::StringDecl)?;
            namespace.friends.insert(reader.read_string()?);
        }

        self.expect(reader, OpCode::ClassPoolDeclSize)?;
        let class_count = self.read_count(reader, "class pool")?;
        let namespace_id = assembly.add_namespace(namespace);

        for _ in 0..class_count {
            let class = self.read_class(reader, namespace_id, &name, entry_point)?;
            if self.verify && assembly.class_by_name(namespace_id, &class.name).is_some() {
                return Err(LoaderError::duplicate("class", class.name));
            }
            assembly.add_class(class);
        }
        Ok(())
    }

    fn read_class<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
        namespace_id: NamespaceId,
        namespace_name: &str,
        entry_point: &mut Option<CallPath>,
    ) -> Result<ClassType, LoaderError> {
        self.expect(reader, OpCode::StringDecl)?;
        let name = reader.read_string()?;
        self.expect(reader, OpCode::ModifiersDecl)?;
        let modifiers = ClassModifiers::from_bits_retain(reader.read_u8("class modifiers")?);
        let mut class = ClassType::new(name, namespace_id, modifiers);

        self.expect(reader, OpCode::AttributePoolDeclSize)?;
        let attribute_count = self.read_count(reader, "attribute pool")?;
        for _ in 0..attribute_count {
            self.expect(reader, OpCode::StringDecl)?;
            let attribute_name = reader.read_string()?;
            self.expect(reader, OpCode::ModifiersDecl)?;
            let modifiers =
                AttributeModifiers::from_bits_retain(reader.read_u8("attribute modifiers")?);
            if self.verify
                && (class.static_attributes.contains_key(&attribute_name)
                    || class.object_attributes.contains_key(&attribute_name))
            {
                return Err(LoaderError::duplicate("attribute", attribute_name));
            }
            let attribute = AttributeType {
                name: attribute_name.clone(),
                modifiers,
            };
            if attribute.is_static() {
                class.static_attributes.insert(attribute_name, attribute);
            } else {
                class.object_attributes.insert(attribute_name, attribute);
            }
        }

        self.expect(reader, OpCode::MethodPoolDeclSize)?;
        let method_count = self.read_count(reader, "method pool")?;
        if self.preallocate {
            class.methods.reserve(method_count);
        }
        for _ in 0..method_count {
            let method = self.read_method(reader)?;
            if self.verify && class.methods.contains_key(&method.name) {
                return Err(LoaderError::duplicate("method", method.name));
            }
            if method.is_entry_point() {
                if entry_point.is_some() {
                    return Err(LoaderError::EntryPointDuplicate {
                        name: method.name.clone(),
                    });
                }
                *entry_point = Some(CallPath::new(namespace_name, &class.name, &method.name));
            }
            class.methods.insert(method.name.clone(), Arc::new(method));
        }
        Ok(class)
    }

    fn read_method<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
    ) -> Result<MethodType, LoaderError> {
        self.expect(reader, OpCode::StringDecl)?;
        let source_name = reader.read_string()?;
        self.expect(reader, OpCode::ModifiersDecl)?;
        let modifiers = MethodModifiers::from_bits_retain(reader.read_u8("method modifiers")?);

        self.expect(reader, OpCode::MethodParamsDeclSize)?;
        let parameter_count = self.read_count(reader, "parameter pool")?;
        let mut parameters = Vec::with_capacity(parameter_count);
        for _ in 0..parameter_count {
            self.expect(reader, OpCode::StringDecl)?;
            parameters.push(reader.read_string()?);
        }

        self.expect(reader, OpCode::DependencyPoolDeclSize)?;
        let dependency_count = self.read_count(reader, "dependency pool")?;
        let mut dependencies = Vec::with_capacity(dependency_count);
        for _ in 0..dependency_count {
            self.expect(reader, OpCode::StringDecl)?;
            dependencies.push(replace_escape_tokens(&reader.read_string()?));
        }

        self.expect(reader, OpCode::MethodBodyBeginDecl)?;
        let (body, labels) = self.read_body(reader)?;

        if self.verify {
            for (label, &offset) in labels.iter().enumerate() {
                if offset >= body.len() {
                    return Err(LoaderError::InvalidMethodLabel {
                        label,
                        offset,
                        body_len: body.len(),
                    });
                }
            }
        }

        let name = if modifiers.contains(MethodModifiers::STATIC_CONSTRUCTOR) {
            mangle_static_constructor(&source_name)
        } else {
            mangle_method(&source_name, parameters.len())
        };

        Ok(MethodType {
            name,
            parameters,
            dependencies,
            labels,
            body,
            modifiers,
        })
    }

    /// Copies body opcodes and operands verbatim, consuming SET_LABEL records
    /// into the label table.
    fn read_body<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
    ) -> Result<(Vec<u8>, Vec<usize>), LoaderError> {
        let mut body = Vec::new();
        let mut labels: Vec<usize> = Vec::new();
        loop {
            let op = reader.read_opcode()?;
            match op {
                OpCode::MethodBodyEndDecl => break,
                OpCode::SetLabel => {
                    let label = reader.read_u16("label index")? as usize;
                    if label >= labels.len() {
                        labels.resize(label + 1, 0);
                    }
                    labels[label] = body.len();
                }
                OpCode::PushString
                | OpCode::PushInteger
                | OpCode::PushFloat
                | OpCode::PushObject
                | OpCode::AllocVar
                | OpCode::AllocConstVar => {
                    body.push(op as u8);
                    body.extend_from_slice(&reader.read_u64("dependency ordinal")?.to_le_bytes());
                }
                OpCode::Jump | OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
                    body.push(op as u8);
                    body.extend_from_slice(&reader.read_u16("jump label")?.to_le_bytes());
                }
                OpCode::CallFunction => {
                    body.push(op as u8);
                    body.extend_from_slice(&reader.read_u64("call name ordinal")?.to_le_bytes());
                    body.push(reader.read_u8("call arity")?);
                }
                OpCode::PushThis
                | OpCode::PushNull
                | OpCode::PushTrue
                | OpCode::PushFalse
                | OpCode::PopToReturn
                | OpCode::NegationOp
                | OpCode::NegativeOp
                | OpCode::PositiveOp
                | OpCode::SumOp
                | OpCode::SubOp
                | OpCode::MultOp
                | OpCode::DivOp
                | OpCode::ModOp
                | OpCode::PowerOp
                | OpCode::AssignOp
                | OpCode::GetMember
                | OpCode::SetAluIncr
                | OpCode::CmpEq
                | OpCode::CmpNeq
                | OpCode::CmpL
                | OpCode::CmpG
                | OpCode::CmpLe
                | OpCode::CmpGe
                | OpCode::CmpAnd
                | OpCode::CmpOr
                | OpCode::GetIndex
                | OpCode::Return
                | OpCode::PopStackTop
                | OpCode::PushStackFrame => {
                    body.push(op as u8);
                }
                other => {
                    return Err(LoaderError::expected(OpCode::MethodBodyEndDecl, other));
                }
            }
        }
        Ok((body, labels))
    }

    fn expect<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
        expected: OpCode,
    ) -> Result<(), LoaderError> {
        let found = reader.read_opcode()?;
        if self.verify && found != expected {
            return Err(LoaderError::expected(expected, found));
        }
        Ok(())
    }

    fn read_count<R: Read>(
        &self,
        reader: &mut BytecodeReader<R>,
        what: &'static str,
    ) -> Result<usize, LoaderError> {
        let count = reader.read_u64(what)?;
        if count > MAX_POOL_SIZE {
            return Err(LoaderError::InvalidDeclaration {
                reason: format!("{what} declares {count} entries"),
            });
        }
        Ok(count as usize)
    }
}

/// Merges `source` into `target`. Namespaces must be disjoint; nothing is
/// written unless the whole merge is valid.
pub fn merge_assemblies(target: &mut Assembly, source: Assembly) -> Result<(), LoaderError> {
    for namespace in &source.namespaces {
        if target.namespace_by_name(&namespace.name).is_some() {
            return Err(LoaderError::duplicate("namespace", namespace.name.clone()));
        }
    }
    let mut namespace_map = Vec::with_capacity(source.namespaces.len());
    for namespace in &source.namespaces {
        let id = target.add_namespace(NamespaceType {
            name: namespace.name.clone(),
            friends: namespace.friends.clone(),
            ..Default::default()
        });
        namespace_map.push(id);
    }
    for mut class in source.classes {
        class.namespace = namespace_map[class.namespace.0 as usize];
        target.add_class(class);
    }
    Ok(())
}

/// Substitutes source-level escape tokens inside a pooled literal.
pub fn replace_escape_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_tokens() {
        assert_eq!(replace_escape_tokens(r"a\nb"), "a\nb");
        assert_eq!(replace_escape_tokens(r"tab\there"), "tab\there");
        assert_eq!(replace_escape_tokens(r#"quote\""#), "quote\"");
        assert_eq!(replace_escape_tokens(r"back\\slash"), "back\\slash");
        assert_eq!(replace_escape_tokens(r"keep\qunknown"), r"keep\qunknown");
        assert_eq!(replace_escape_tokens("plain"), "plain");
    }

    #[test]
    fn rejects_garbage_streams() {
        let loader = AssemblyLoader::new(true, false);
        assert!(loader.load(&[][..]).is_err());
        assert!(loader.load(&[0xFFu8, 0x00][..]).is_err());
        // STRING_DECL where ASSEMBLY_BEGIN_DECL is required.
        let bytes = [OpCode::StringDecl as u8];
        assert!(matches!(
            loader.load(&bytes[..]),
            Err(LoaderError::InvalidOpcode { .. })
        ));
    }

    #[test]
    fn merge_rejects_namespace_duplicates() {
        let mut target = Assembly::new();
        target.add_namespace(NamespaceType {
            name: "Main".into(),
            ..Default::default()
        });
        let mut source = Assembly::new();
        source.add_namespace(NamespaceType {
            name: "Main".into(),
            ..Default::default()
        });
        assert!(merge_assemblies(&mut target, source).is_err());
    }

    #[test]
    fn merge_remaps_class_namespaces() {
        let mut target = Assembly::new();
        target.add_namespace(NamespaceType {
            name: "A".into(),
            ..Default::default()
        });
        let mut source = Assembly::new();
        let ns = source.add_namespace(NamespaceType {
            name: "B".into(),
            ..Default::default()
        });
        source.add_class(ClassType::new("D".into(), ns, ClassModifiers::empty()));

        merge_assemblies(&mut target, source).unwrap();
        let merged_ns = target.namespace_by_name("B").unwrap();
        let class = target.class_by_name(merged_ns, "D").unwrap();
        assert_eq!(target.class(class).namespace, merged_ns);
        assert_eq!(target.full_class_name(class), "B.D");
    }
}
