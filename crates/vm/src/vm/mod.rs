//! The MSL virtual machine: fetch-decode-execute loop, call stack, object
//! stack and dispatch.
//!
//! The interpreter is re-entrant by host recursion: invoking a method pushes
//! a frame and executes its body to completion, which is also how native
//! methods re-enter the interpreter (operator methods, ToString delegation,
//! Array.Sort comparisons). The configured recursion limit bounds the depth.

mod alu;

use crate::big_int::MslInt;
use crate::config::Configuration;
use crate::error::{ErrorFlags, LoaderError};
use crate::frame::{CallPath, Frame};
use crate::gc::GarbageCollector;
use crate::loader::{merge_assemblies, AssemblyLoader};
use crate::object::{Local, LocalSlot, ObjectRef, TypeTag};
use crate::op_code::OpCode;
use crate::system;
use crate::types::{
    actual_method_name, full_method_name, mangle_method, mangle_static_constructor, Assembly,
    ClassId, MethodType, NamespaceId,
};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

/// Final state handed back to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Accumulated error word; empty on a clean finish.
    pub errors: ErrorFlags,
    /// Exit code per the exit contract, when the contract was checked and
    /// satisfied.
    pub exit_code: Option<MslInt>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct VirtualMachine {
    pub(crate) config: Configuration,
    pub(crate) assembly: Assembly,
    pub(crate) gc: GarbageCollector,
    pub(crate) call_stack: Vec<Frame>,
    pub(crate) object_stack: Vec<ObjectRef>,
    pub(crate) errors: ErrorFlags,
    pub(crate) alu_increment: bool,
    next_frame_id: u64,
    entry_point: Option<CallPath>,
    system_installed: bool,
}

impl VirtualMachine {
    pub fn new(mut config: Configuration) -> Self {
        let gc = GarbageCollector::new(std::mem::take(&mut config.gc));
        Self {
            config,
            assembly: Assembly::new(),
            gc,
            call_stack: Vec::new(),
            object_stack: Vec::new(),
            errors: ErrorFlags::empty(),
            alu_increment: false,
            next_frame_id: 1,
            entry_point: None,
            system_installed: false,
        }
    }

    /// The accumulated error word.
    pub fn errors(&self) -> ErrorFlags {
        self.errors
    }

    /// The loaded program image.
    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    /// Overrides the entry point discovered by the loader.
    pub fn set_entry_point(&mut self, path: CallPath) {
        self.entry_point = Some(path);
    }

    /// Streams one serialized assembly into the VM, merging it with anything
    /// already loaded. The first discovered entry point becomes the run
    /// target.
    pub fn load_assembly<R: Read>(&mut self, source: R) -> Result<(), LoaderError> {
        if !self.assembly.is_empty() && !self.config.compilation.allow_assembly_merge {
            return Err(LoaderError::MergeDisabled);
        }
        let loader = AssemblyLoader::new(
            self.config.compilation.verify_bytecode,
            self.config.compilation.allow_memory_preallocation,
        );
        let loaded = loader.load(source)?;
        if loaded.entry_point.is_none()
            && self.entry_point.is_none()
            && !self.config.compilation.allow_assembly_merge
        {
            // Single-assembly mode has nowhere else to find an entry point.
            return Err(LoaderError::MissingEntryPoint);
        }
        merge_assemblies(&mut self.assembly, loaded.assembly)?;
        if self.entry_point.is_none() {
            self.entry_point = loaded.entry_point;
        }
        Ok(())
    }

    /// Executes the entry point and enforces the exit contract.
    pub fn run(&mut self) -> ExitStatus {
        self.prepare();

        let Some(path) = self.entry_point.clone() else {
            self.raise(
                ErrorFlags::CALLSTACK_EMPTY | ErrorFlags::TERMINATE_ON_LAUNCH,
                "call stack was empty on VM launch, terminating",
            );
            return self.exit_status(None);
        };
        if !path.is_complete() {
            self.raise(
                ErrorFlags::TERMINATE_ON_LAUNCH,
                "entry-point was not provided to the VM",
            );
            return self.exit_status(None);
        }
        let namespace = path.namespace.clone().unwrap_or_default();
        let class = path.class.clone().unwrap_or_default();
        let method_name = path.method.clone().unwrap_or_default();
        let Some(entry) = self
            .assembly
            .method_by_path(&namespace, &class, &method_name)
        else {
            self.raise(
                ErrorFlags::INVALID_CALL_ARGUMENT | ErrorFlags::TERMINATE_ON_LAUNCH,
                "entry-point method, provided in call stack was not found",
            );
            return self.exit_status(None);
        };

        // Synthetic receiver plus one Null per declared parameter.
        self.object_stack.push(ObjectRef::NULL);
        for _ in 0..entry.parameters.len() {
            self.object_stack.push(ObjectRef::NULL);
        }

        let start = Instant::now();
        self.invoke(&namespace, &class, &method_name, None);
        log::info!(
            "execution finished in {} ms with error word {:?}",
            start.elapsed().as_millis(),
            self.errors
        );

        let mut exit_code = None;
        if self.errors.is_empty() {
            if self.object_stack.len() > 1 {
                self.raise(
                    ErrorFlags::OBJECTSTACK_CORRUPTION,
                    "object stack is not in its initial position after execution",
                );
            } else if !self.call_stack.is_empty() {
                self.raise(
                    ErrorFlags::CALLSTACK_CORRUPTION,
                    "call stack was not empty after VM execution",
                );
            } else if self.config.execution.check_exit_code {
                match self.object_stack.last().copied() {
                    None => self.raise(
                        ErrorFlags::OBJECTSTACK_EMPTY,
                        "no return value from entry point function provided",
                    ),
                    Some(result) => match result.tag {
                        TypeTag::Integer => {
                            exit_code =
                                self.gc.integer(result).map(|object| object.value.clone());
                        }
                        TypeTag::Null => exit_code = Some(MslInt::zero()),
                        _ => self.raise(
                            ErrorFlags::INVALID_STACKOBJECT,
                            "return value from entry point function was neither integer nor null",
                        ),
                    },
                }
            }
        }
        self.exit_status(exit_code)
    }

    fn exit_status(&self, exit_code: Option<MslInt>) -> ExitStatus {
        ExitStatus {
            errors: self.errors,
            exit_code,
        }
    }

    /// Installs the System namespace and the per-entity runtime handles
    /// (namespace wrappers, class wrappers, static instances). Idempotent.
    fn prepare(&mut self) {
        if !self.system_installed {
            self.assembly.remove_namespace("System");
            system::install(&mut self.assembly);
            self.system_installed = true;
        }
        for index in 0..self.assembly.namespaces.len() {
            let id = NamespaceId(index as u32);
            if self.assembly.namespace(id).wrapper.is_none()
                && !self.assembly.namespace(id).name.is_empty()
            {
                let wrapper = self.gc.alloc_namespace_wrapper(id);
                self.assembly.namespace_mut(id).wrapper = Some(wrapper);
            }
        }
        for index in 0..self.assembly.classes.len() {
            let id = ClassId(index as u32);
            if self.assembly.class(id).wrapper.is_none() {
                let wrapper = self.gc.alloc_class_wrapper(id);
                self.assembly.class_mut(id).wrapper = Some(wrapper);
            }
            if self.assembly.class(id).static_instance.is_none() {
                let instance = self.gc.alloc_static_instance(id, &self.assembly);
                self.assembly.class_mut(id).static_instance = Some(instance);
            }
        }
    }

    // ----- diagnostics --------------------------------------------------

    pub(crate) fn raise(&mut self, flags: ErrorFlags, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.errors |= flags;
        log::error!("{message}");
        if let Some(stream) = self.config.streams.error.as_mut() {
            let _ = writeln!(stream, "\n[VM ERROR]: {message}");
        }
        self.print_object_stack();
    }

    pub(crate) fn note(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!("{message}");
        if let Some(stream) = self.config.streams.error.as_mut() {
            let _ = writeln!(stream, "            {message}");
        }
    }

    fn print_object_stack(&mut self) {
        let mut lines = Vec::with_capacity(self.object_stack.len());
        for (count, r) in self.object_stack.iter().rev().enumerate() {
            lines.push(format!(
                "[{count}] {:<30} {}",
                self.gc.to_text(*r, &self.assembly),
                self.gc.extra_info(*r, &self.assembly)
            ));
        }
        if let Some(stream) = self.config.streams.error.as_mut() {
            let _ = writeln!(stream, "---------------------------STACK---------------------------");
            for line in &lines {
                let _ = writeln!(stream, "{line}");
            }
            let _ = writeln!(stream, "------------------------------------------------------------");
        }
    }

    pub(crate) fn note_current_frame(&mut self) {
        if let Some(frame) = self.call_stack.last() {
            let message = format!(
                "current frame: {}.{}",
                self.assembly.full_class_name(frame.class),
                full_method_name(&frame.method)
            );
            self.note(message);
        }
    }

    // ----- frame initialization -----------------------------------------

    /// Resolves and runs one method call; the core of frame initialization.
    pub(crate) fn invoke(
        &mut self,
        namespace: &str,
        class_name: &str,
        method_name: &str,
        caller: Option<(NamespaceId, ClassId)>,
    ) {
        if self.call_stack.len() >= self.config.execution.recursion_limit {
            self.errors |= ErrorFlags::STACKOVERFLOW;
            return;
        }
        let namespace_id = self.assembly.namespace_by_name(namespace);
        let class_id =
            namespace_id.and_then(|ns| self.assembly.class_by_name(ns, class_name));
        let method = class_id.and_then(|class| self.assembly.class(class).method(method_name));

        let Some(method) = method else {
            self.method_not_found(namespace_id, namespace, class_name, method_name, caller);
            return;
        };
        let namespace_id = namespace_id.expect("method implies namespace");
        let class_id = class_id.expect("method implies class");

        // A non-public method may only be entered from its own class.
        if !method.is_public() {
            if let Some((caller_ns, caller_class)) = caller {
                if caller_ns != namespace_id || caller_class != class_id {
                    self.raise(
                        ErrorFlags::PRIVATE_MEMBER_ACCESS,
                        format!(
                            "trying to call private method: {}.{}",
                            self.assembly.full_class_name(class_id),
                            full_method_name(&method)
                        ),
                    );
                    return;
                }
            }
        }
        if method.is_abstract() {
            self.raise(
                ErrorFlags::ABSTRACT_MEMBER_CALL,
                format!(
                    "trying to call abstract method: {}.{}",
                    self.assembly.full_class_name(class_id),
                    full_method_name(&method)
                ),
            );
            return;
        }
        if method.is_static_constructor() {
            if self.assembly.class(class_id).static_constructor_called {
                self.raise(
                    ErrorFlags::INVALID_METHOD_CALL,
                    format!(
                        "static constructor of class cannot be called: {}.{}",
                        self.assembly.full_class_name(class_id),
                        full_method_name(&method)
                    ),
                );
                return;
            }
            self.assembly.class_mut(class_id).static_constructor_called = true;
        }

        // Static constructors run exactly once, before any other use of the
        // class; this hook covers instance methods and constructors alike.
        let needs_static_constructor = {
            let class = self.assembly.class(class_id);
            class.has_static_constructor() && !class.static_constructor_called
        };
        if needs_static_constructor {
            let constructor = mangle_static_constructor(class_name);
            let wrapper = self.class_wrapper_ref(class_id);
            self.object_stack.push(wrapper);
            self.invoke(namespace, class_name, &constructor, Some((namespace_id, class_id)));
            if !self.errors.is_empty() {
                self.note(format!(
                    "static constructor caused a fatal error: {}.{}()",
                    self.assembly.full_class_name(class_id),
                    class_name
                ));
                return;
            }
            self.object_stack.pop();
        }

        if self.assembly.class(class_id).is_system() {
            system::dispatch(self, class_id, &method);
            return;
        }

        self.enter_frame(namespace_id, class_id, method);
    }

    fn class_wrapper_ref(&self, class_id: ClassId) -> ObjectRef {
        self.assembly
            .class(class_id)
            .wrapper
            .unwrap_or(ObjectRef::NULL)
    }

    fn method_not_found(
        &mut self,
        namespace_id: Option<NamespaceId>,
        namespace: &str,
        class_name: &str,
        method_name: &str,
        caller: Option<(NamespaceId, ClassId)>,
    ) {
        if let Some(ns) = namespace_id {
            // The call may target a class: rewrite into its constructor.
            let constructed = actual_method_name(method_name).to_string();
            match self.search_for_class(&constructed, ns) {
                Err(()) => return,
                Ok(Some(class_id)) => {
                    let class = self.assembly.class(class_id);
                    if class.methods.contains_key(method_name) {
                        let target_ns = self.assembly.namespace(class.namespace).name.clone();
                        self.invoke(&target_ns, &constructed, method_name, caller);
                        return;
                    } else if class.is_abstract() {
                        let text = format!(
                            "cannot create instance of abstract class: {}",
                            self.assembly.full_class_name(class_id)
                        );
                        self.raise(ErrorFlags::ABSTRACT_MEMBER_CALL, text);
                        return;
                    } else if class.is_static() {
                        let text = format!(
                            "cannot create instance of static class: {}",
                            self.assembly.full_class_name(class_id)
                        );
                        self.raise(ErrorFlags::MEMBER_NOT_FOUND, text);
                        return;
                    } else {
                        let text = format!(
                            "could not call class {} constructor: {}",
                            self.assembly.full_class_name(class_id),
                            method_name
                        );
                        self.raise(ErrorFlags::INVALID_METHOD_CALL, text);
                        self.note("available constructors of this class:");
                        for arity in 0..17 {
                            let candidate = mangle_method(&constructed, arity);
                            if let Some(ctor) = self.assembly.class(class_id).method(&candidate) {
                                let text = format!(
                                    "\t{}.{}",
                                    self.assembly.full_class_name(class_id),
                                    full_method_name(&ctor)
                                );
                                self.note(text);
                            }
                        }
                        return;
                    }
                }
                Ok(None) => {}
            }
        }
        self.raise(
            ErrorFlags::MEMBER_NOT_FOUND,
            format!("method passed to frame was not found: {namespace}.{class_name}.{method_name}"),
        );
        self.note_current_frame();
    }

    /// Builds the frame for a resolved bytecode method and executes its body.
    fn enter_frame(&mut self, namespace_id: NamespaceId, class_id: ClassId, method: Arc<MethodType>) {
        if method.body.first() != Some(&(OpCode::PushStackFrame as u8)) {
            self.raise(
                ErrorFlags::INVALID_OPCODE,
                "PUSH_STACKFRAME opcode always expected in the beginning of method body",
            );
            return;
        }
        let mut frame = Frame::new(
            self.next_frame_id,
            namespace_id,
            class_id,
            method.clone(),
            ObjectRef::NULL,
        );
        self.next_frame_id += 1;
        frame.offset = 1;

        // Arguments arrive on the object stack in declaration order.
        for parameter in method.parameters.iter().rev() {
            let Some(value) = self.object_stack.pop() else {
                self.raise(
                    ErrorFlags::OBJECTSTACK_EMPTY,
                    "object stack does not contain enough parameters for method call",
                );
                return;
            };
            frame.locals.insert(parameter.clone(), Local::new(value));
        }

        if !method.is_static() && !method.is_constructor() {
            if method.parameters.first().map(String::as_str) != Some("this") {
                self.raise(
                    ErrorFlags::INVALID_METHOD_SIGNATURE,
                    "first parameter of non-static method must always be equal to `this`",
                );
                return;
            }
            frame.this_ref = frame
                .locals
                .get("this")
                .map(|local| local.value)
                .unwrap_or(ObjectRef::NULL);
        } else {
            // The receiver reference is popped regardless.
            if self.object_stack.pop().is_none() {
                self.raise(
                    ErrorFlags::OBJECTSTACK_EMPTY,
                    "object stack did not contain a receiver for method call",
                );
                return;
            }
            frame.this_ref = self.class_wrapper_ref(class_id);
        }

        if method.is_constructor() {
            if self.assembly.class(class_id).is_static() {
                self.raise(
                    ErrorFlags::INVALID_METHOD_CALL,
                    format!(
                        "can not create instance of static class: {}",
                        self.assembly.full_class_name(class_id)
                    ),
                );
                return;
            }
            let instance = self.gc.alloc_class_object(class_id, &self.assembly);
            frame.this_ref = instance;
            frame.locals.insert("this".to_string(), Local::new(instance));
        }

        self.call_stack.push(frame);
        self.execute_frame();
    }

    // ----- the interpreter loop -----------------------------------------

    fn execute_frame(&mut self) {
        let frame_index = self.call_stack.len() - 1;
        let frame_id = self.call_stack[frame_index].id;
        let method = self.call_stack[frame_index].method.clone();
        let mut offset = self.call_stack[frame_index].offset;

        loop {
            if !self.errors.is_empty() {
                return;
            }
            self.gc_safe_point();
            if offset >= method.body.len() {
                self.raise(
                    ErrorFlags::INVALID_STACKFRAME_OFFSET,
                    "execution of method went out of frame",
                );
                self.note_current_frame();
                return;
            }
            let Some(op) = OpCode::from_byte(method.body[offset]) else {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("unknown opcode byte {:#04x}", method.body[offset]),
                );
                return;
            };
            offset += 1;
            log::trace!("{op}");

            match op {
                OpCode::PushObject => {
                    let Some(name) = self.read_dependency(&method, &mut offset) else {
                        return;
                    };
                    let unknown = self.gc.alloc_unknown(name);
                    self.object_stack.push(unknown);
                }
                OpCode::PushString => {
                    let Some(literal) = self.read_dependency(&method, &mut offset) else {
                        return;
                    };
                    let value = self.gc.alloc_string(literal);
                    self.object_stack.push(value);
                }
                OpCode::PushInteger => {
                    let Some(literal) = self.read_dependency(&method, &mut offset) else {
                        return;
                    };
                    let value = self.gc.alloc_integer_from_str(&literal);
                    self.object_stack.push(value);
                }
                OpCode::PushFloat => {
                    let Some(literal) = self.read_dependency(&method, &mut offset) else {
                        return;
                    };
                    let value = self.gc.alloc_float_from_str(&literal);
                    self.object_stack.push(value);
                }
                OpCode::PushThis => {
                    let this_ref = self.call_stack[frame_index].this_ref;
                    self.object_stack.push(this_ref);
                }
                OpCode::PushNull => self.object_stack.push(ObjectRef::NULL),
                OpCode::PushTrue => self.object_stack.push(ObjectRef::TRUE),
                OpCode::PushFalse => self.object_stack.push(ObjectRef::FALSE),
                OpCode::SetAluIncr => self.alu_increment = true,

                OpCode::NegationOp | OpCode::NegativeOp | OpCode::PositiveOp => {
                    self.sync_offset(frame_index, offset);
                    self.perform_alu_call(op, 1);
                }
                OpCode::SumOp
                | OpCode::SubOp
                | OpCode::MultOp
                | OpCode::DivOp
                | OpCode::ModOp
                | OpCode::PowerOp
                | OpCode::AssignOp
                | OpCode::CmpEq
                | OpCode::CmpNeq
                | OpCode::CmpL
                | OpCode::CmpG
                | OpCode::CmpLe
                | OpCode::CmpGe
                | OpCode::CmpAnd
                | OpCode::CmpOr => {
                    self.sync_offset(frame_index, offset);
                    self.perform_alu_call(op, 2);
                }

                OpCode::AllocVar | OpCode::AllocConstVar => {
                    let Some(name) = self.read_dependency(&method, &mut offset) else {
                        return;
                    };
                    let is_const = op == OpCode::AllocConstVar;
                    let local = if is_const {
                        Local::constant(ObjectRef::NULL)
                    } else {
                        Local::new(ObjectRef::NULL)
                    };
                    self.call_stack[frame_index].locals.insert(name.clone(), local);
                    let local_object =
                        self.gc.alloc_local(name, LocalSlot::Frame { frame: frame_id });
                    self.object_stack.push(local_object);
                }

                OpCode::GetMember => {
                    self.sync_offset(frame_index, offset);
                    self.op_get_member(frame_index);
                }
                OpCode::GetIndex => {
                    self.sync_offset(frame_index, offset);
                    self.op_get_index(frame_index);
                }
                OpCode::CallFunction => {
                    let Some(ordinal) = read_u64_operand(&method.body, &mut offset) else {
                        self.raise(
                            ErrorFlags::INVALID_STACKFRAME_OFFSET,
                            "CALL_FUNCTION operand exceeds method body",
                        );
                        return;
                    };
                    let Some(arity) = read_u8_operand(&method.body, &mut offset) else {
                        self.raise(
                            ErrorFlags::INVALID_STACKFRAME_OFFSET,
                            "CALL_FUNCTION operand exceeds method body",
                        );
                        return;
                    };
                    self.sync_offset(frame_index, offset);
                    self.op_call_function(frame_index, &method, ordinal, arity as usize);
                }

                OpCode::Jump => {
                    let Some(label) = read_u16_operand(&method.body, &mut offset) else {
                        self.raise(
                            ErrorFlags::INVALID_STACKFRAME_OFFSET,
                            "JUMP operand exceeds method body",
                        );
                        return;
                    };
                    let Some(target) = self.label_target(&method, label) else {
                        return;
                    };
                    offset = target;
                }
                OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
                    let Some(label) = read_u16_operand(&method.body, &mut offset) else {
                        self.raise(
                            ErrorFlags::INVALID_STACKFRAME_OFFSET,
                            "jump operand exceeds method body",
                        );
                        return;
                    };
                    self.sync_offset(frame_index, offset);
                    match self.pop_condition(frame_index, op == OpCode::JumpIfTrue) {
                        ConditionOutcome::Jump => {
                            let Some(target) = self.label_target(&method, label) else {
                                return;
                            };
                            offset = target;
                        }
                        ConditionOutcome::FallThrough => {}
                        ConditionOutcome::Error => return,
                    }
                }

                OpCode::PopToReturn => {
                    if self.object_stack.is_empty() {
                        self.raise(
                            ErrorFlags::OBJECTSTACK_EMPTY,
                            "object stack is empty, but `return` instruction called",
                        );
                        self.note_current_frame();
                    } else {
                        let top = *self.object_stack.last().expect("stack checked above");
                        if top.tag == TypeTag::Unknown {
                            let Some(resolved) = self.resolve_if_unknown(top, frame_index, true)
                            else {
                                self.errors |= ErrorFlags::OBJECT_NOT_FOUND;
                                self.note_current_frame();
                                return;
                            };
                            *self.object_stack.last_mut().expect("stack checked above") = resolved;
                        }
                    }
                    self.call_stack.pop();
                    return;
                }
                OpCode::Return => {
                    let result = if method.is_constructor() {
                        self.call_stack[frame_index]
                            .locals
                            .get("this")
                            .map(|local| local.value)
                            .unwrap_or(ObjectRef::NULL)
                    } else {
                        ObjectRef::NULL
                    };
                    self.object_stack.push(result);
                    self.call_stack.pop();
                    return;
                }

                OpCode::PopStackTop => {
                    let Some(top) = self.object_stack.last().copied() else {
                        self.raise(
                            ErrorFlags::OBJECTSTACK_EMPTY,
                            "POP_STACK_TOP instruction called, but object stack was empty",
                        );
                        self.note_current_frame();
                        return;
                    };
                    if top.tag == TypeTag::Unknown {
                        // Resolving here surfaces dangling names even when the
                        // value is discarded.
                        let Some(_resolved) = self.resolve_if_unknown(top, frame_index, true)
                        else {
                            return;
                        };
                    }
                    self.object_stack.pop();
                }

                other => {
                    self.raise(
                        ErrorFlags::INVALID_OPCODE,
                        format!("opcode {other} was found, but not expected"),
                    );
                    return;
                }
            }
        }
    }

    fn sync_offset(&mut self, frame_index: usize, offset: usize) {
        if let Some(frame) = self.call_stack.get_mut(frame_index) {
            frame.offset = offset;
        }
    }

    fn label_target(&mut self, method: &MethodType, label: u16) -> Option<usize> {
        match method.labels.get(label as usize) {
            Some(&target) if target < method.body.len() => Some(target),
            _ => {
                self.raise(
                    ErrorFlags::INVALID_STACKFRAME_OFFSET,
                    format!("jump label #{label} does not point into the method body"),
                );
                None
            }
        }
    }

    fn read_dependency(&mut self, method: &MethodType, offset: &mut usize) -> Option<String> {
        let Some(ordinal) = read_u64_operand(&method.body, offset) else {
            self.raise(
                ErrorFlags::INVALID_STACKFRAME_OFFSET,
                "operand exceeds method body",
            );
            return None;
        };
        self.dependency_name(method, ordinal)
    }

    pub(crate) fn dependency_name(&mut self, method: &MethodType, ordinal: u64) -> Option<String> {
        match method.dependencies.get(ordinal as usize) {
            Some(name) => Some(name.clone()),
            None => {
                self.raise(
                    ErrorFlags::INVALID_HASH_VALUE,
                    "hash value of dependency object is invalid",
                );
                None
            }
        }
    }

    fn gc_safe_point(&mut self) {
        let error_stream = self
            .config
            .streams
            .error
            .as_mut()
            .map(|stream| stream.as_mut() as &mut dyn std::io::Write);
        let over_limit = self.gc.maybe_collect(
            &self.assembly,
            &self.call_stack,
            &self.object_stack,
            error_stream,
        );
        if over_limit && !self.errors.contains(ErrorFlags::OUT_OF_MEMORY) {
            self.raise(
                ErrorFlags::OUT_OF_MEMORY,
                "managed memory exceeds the configured maximum after collection",
            );
        }
    }

    // ----- name resolution ----------------------------------------------

    /// Resolves an Unknown reference to a live value; other references pass
    /// through unchanged.
    pub(crate) fn resolve_if_unknown(
        &mut self,
        r: ObjectRef,
        frame_index: usize,
        check_error: bool,
    ) -> Option<ObjectRef> {
        if r.tag != TypeTag::Unknown {
            return Some(r);
        }
        let name = self.gc.unknown(r)?.name.clone();
        self.search_for_object(&name, frame_index, check_error)
    }

    /// The six-step resolution chain: frame local, `this` attribute, static
    /// attribute, class in namespace, class in friend namespaces, namespace.
    pub(crate) fn search_for_object(
        &mut self,
        name: &str,
        frame_index: usize,
        check_error: bool,
    ) -> Option<ObjectRef> {
        let frame = &self.call_stack[frame_index];
        if let Some(local) = frame.locals.get(name) {
            return Some(local.value);
        }
        let is_static = frame.method.is_static();
        let this_ref = frame.this_ref;
        let frame_class = frame.class;
        let frame_namespace = frame.namespace;

        let actual_class = if !is_static {
            match self.gc.class_object(this_ref) {
                Some(object) => {
                    if let Some(&attribute) = object.attributes.get(name) {
                        return Some(attribute);
                    }
                    object.class
                }
                None => frame_class,
            }
        } else {
            frame_class
        };

        if let Some(instance) = self.assembly.class(actual_class).static_instance {
            if let Some(object) = self.gc.class_object(instance) {
                if let Some(&attribute) = object.attributes.get(name) {
                    return Some(attribute);
                }
            }
        }

        match self.search_for_class(name, frame_namespace) {
            Err(()) => return None,
            Ok(Some(class_id)) => return Some(self.class_wrapper_ref(class_id)),
            Ok(None) => {}
        }

        if let Some(namespace) = self.assembly.namespace_by_name(name) {
            if let Some(wrapper) = self.assembly.namespace(namespace).wrapper {
                return Some(wrapper);
            }
        }

        if check_error {
            self.raise(
                ErrorFlags::OBJECT_NOT_FOUND,
                format!("object with name: `{name}` was not found"),
            );
            self.note_current_frame();
        }
        None
    }

    /// Looks a class up in the current namespace, then in each friend
    /// namespace (public classes only). Two matches across friends are
    /// ambiguous and raise INVALID_CALL_ARGUMENT.
    pub(crate) fn search_for_class(
        &mut self,
        name: &str,
        namespace: NamespaceId,
    ) -> Result<Option<ClassId>, ()> {
        if let Some(class) = self.assembly.class_by_name(namespace, name) {
            return Ok(Some(class));
        }
        let friends: Vec<String> = self
            .assembly
            .namespace(namespace)
            .friends
            .iter()
            .cloned()
            .collect();
        let mut found: Option<ClassId> = None;
        for friend in friends {
            let Some(friend_id) = self.assembly.namespace_by_name(&friend) else {
                continue;
            };
            let Some(class_id) = self.assembly.class_by_name(friend_id, name) else {
                continue;
            };
            if self.assembly.class(class_id).is_internal() {
                continue;
            }
            if let Some(first) = found {
                let first_name = self.assembly.full_class_name(first);
                let second_name = self.assembly.full_class_name(class_id);
                self.raise(
                    ErrorFlags::INVALID_CALL_ARGUMENT,
                    format!("find two or more matching classes while resolving object type: {name}"),
                );
                self.note(format!("first match was: {first_name}"));
                self.note(format!("also found: {second_name}"));
                return Err(());
            }
            found = Some(class_id);
        }
        Ok(found)
    }

    /// Dereferences assignable cells (locals and attributes) to the value
    /// they currently hold.
    pub(crate) fn underlying(&self, r: ObjectRef) -> Option<ObjectRef> {
        match r.tag {
            TypeTag::Local => {
                let local = self.gc.local(r)?;
                match &local.slot {
                    LocalSlot::Frame { frame } => {
                        let frame = self.call_stack.iter().rev().find(|f| f.id == *frame)?;
                        Some(frame.locals.get(&local.name)?.value)
                    }
                    LocalSlot::ArrayElem { array, index } => {
                        Some(self.gc.array(*array)?.elements.get(*index)?.value)
                    }
                }
            }
            TypeTag::Attribute => Some(self.gc.attribute(r)?.value),
            TypeTag::Base => None,
            _ => Some(r),
        }
    }

    /// The display name a member reference carries, if any.
    pub(crate) fn object_name(&self, r: ObjectRef) -> Option<String> {
        match r.tag {
            TypeTag::Unknown => Some(self.gc.unknown(r)?.name.clone()),
            TypeTag::Local => Some(self.gc.local(r)?.name.clone()),
            TypeTag::Attribute => Some(self.gc.attribute(r)?.name.clone()),
            TypeTag::Class => {
                let class = self.gc.class_wrapper(r)?.class;
                Some(self.assembly.class(class).name.clone())
            }
            TypeTag::Namespace => {
                let namespace = self.gc.namespace_wrapper(r)?.namespace;
                Some(self.assembly.namespace(namespace).name.clone())
            }
            TypeTag::ClassObject => {
                let class = self.gc.class_object(r)?.class;
                Some(self.assembly.class(class).name.clone())
            }
            _ => None,
        }
    }

    /// Member lookup on namespace wrappers, class objects and class wrappers.
    pub(crate) fn get_member_object(&self, target: ObjectRef, name: &str) -> Option<ObjectRef> {
        match target.tag {
            TypeTag::Namespace => {
                let namespace = self.gc.namespace_wrapper(target)?.namespace;
                let class = self.assembly.class_by_name(namespace, name)?;
                self.assembly.class(class).wrapper
            }
            TypeTag::ClassObject => {
                let object = self.gc.class_object(target)?;
                if let Some(&attribute) = object.attributes.get(name) {
                    return Some(attribute);
                }
                let instance = self.assembly.class(object.class).static_instance?;
                self.gc.class_object(instance)?.attributes.get(name).copied()
            }
            TypeTag::Class => {
                let class = self.gc.class_wrapper(target)?.class;
                let instance = self.assembly.class(class).static_instance?;
                self.gc.class_object(instance)?.attributes.get(name).copied()
            }
            _ => None,
        }
    }

    /// Class of a value for member-access purposes, if it has one.
    fn target_class(&self, r: ObjectRef) -> Option<ClassId> {
        match r.tag {
            TypeTag::ClassObject => Some(self.gc.class_object(r)?.class),
            TypeTag::Class => Some(self.gc.class_wrapper(r)?.class),
            _ => None,
        }
    }

    /// System class wrapper backing a primitive value.
    pub(crate) fn primitive_class(&mut self, r: ObjectRef) -> Option<ClassId> {
        let class_name = match r.tag {
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::String => "String",
            TypeTag::True => "True",
            TypeTag::False => "False",
            TypeTag::Null => "Null",
            _ => {
                let text = format!(
                    "cannot get primitive class of object with type: {}",
                    r.tag
                );
                self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                return None;
            }
        };
        let system = self.assembly.namespace_by_name(system::SYSTEM_NAMESPACE)?;
        self.assembly.class_by_name(system, class_name)
    }

    // ----- member access, indexing, calls --------------------------------

    fn op_get_member(&mut self, frame_index: usize) {
        if self.object_stack.len() < 2 {
            self.raise(
                ErrorFlags::OBJECTSTACK_EMPTY,
                "not enough objects in stack to get member",
            );
            self.note_current_frame();
            return;
        }
        let member = self.object_stack.pop().expect("stack checked above");
        let target = self.object_stack.pop().expect("stack checked above");

        let target_name = self.object_name(target).unwrap_or_default();
        let Some(member_name) = self.object_name(member) else {
            let text = format!(
                "invalid member was called: {}",
                self.gc.to_text(member, &self.assembly)
            );
            self.raise(ErrorFlags::INVALID_CALL_ARGUMENT, text);
            self.note_current_frame();
            return;
        };

        let Some(resolved) = self.resolve_if_unknown(target, frame_index, true) else {
            return;
        };
        let Some(resolved) = self.underlying(resolved) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "member target was invalid");
            return;
        };

        let Some(member_object) = self.get_member_object(resolved, &member_name) else {
            self.raise(
                ErrorFlags::MEMBER_NOT_FOUND,
                format!("member was not found: {target_name}.{member_name}"),
            );
            self.note_current_frame();
            return;
        };

        if member_object.tag == TypeTag::Attribute {
            let is_public = self
                .gc
                .attribute(member_object)
                .map(|attribute| attribute.is_public())
                .unwrap_or(true);
            let owner = self.target_class(resolved);
            let frame_class = self.call_stack[frame_index].class;
            if !is_public && owner != Some(frame_class) {
                let owner_name = owner
                    .map(|class| self.assembly.full_class_name(class))
                    .unwrap_or_default();
                self.raise(
                    ErrorFlags::PRIVATE_MEMBER_ACCESS,
                    format!("trying to access class private member: {owner_name}.{member_name}"),
                );
                self.note_current_frame();
                return;
            }
        }
        self.object_stack.push(member_object);
    }

    fn op_get_index(&mut self, frame_index: usize) {
        if self.object_stack.len() < 2 {
            self.raise(
                ErrorFlags::OBJECTSTACK_EMPTY,
                "not enough parameters in stack for get_index call",
            );
            self.note_current_frame();
            return;
        }
        let receiver = self.object_stack.pop().expect("stack checked above");
        let Some(receiver) = self.resolve_if_unknown(receiver, frame_index, true) else {
            return;
        };
        let Some(receiver) = self.underlying(receiver) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid index receiver");
            return;
        };
        let index = self.object_stack.pop().expect("stack checked above");
        let Some(index) = self.resolve_if_unknown(index, frame_index, true) else {
            return;
        };
        let Some(index) = self.underlying(index) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid index value");
            return;
        };

        self.object_stack.push(receiver);
        self.object_stack.push(index);
        match receiver.tag {
            TypeTag::ClassObject => self.invoke_object_method("GetByIndex_2", receiver),
            TypeTag::Integer
            | TypeTag::Float
            | TypeTag::String
            | TypeTag::True
            | TypeTag::False
            | TypeTag::Null => {
                let Some(class_id) = self.primitive_class(receiver) else {
                    return;
                };
                let class_name = self.assembly.class(class_id).name.clone();
                self.invoke(system::SYSTEM_NAMESPACE, &class_name, "GetByIndex_1", None);
            }
            other => {
                self.raise(
                    ErrorFlags::INVALID_STACKOBJECT,
                    format!("object with invalid type was passed to GET_INDEX call: {other}"),
                );
                self.note_current_frame();
            }
        }
    }

    fn op_call_function(
        &mut self,
        frame_index: usize,
        method: &MethodType,
        ordinal: u64,
        arity: usize,
    ) {
        let Some(operand_name) = self.dependency_name(method, ordinal) else {
            return;
        };
        if self.object_stack.len() < arity + 2 {
            self.raise(
                ErrorFlags::OBJECTSTACK_EMPTY,
                "not enough parameters in stack for function call",
            );
            self.note_current_frame();
            return;
        }
        let name_ref = *self.object_stack.last().expect("stack checked above");
        if name_ref.tag != TypeTag::Unknown {
            let text = format!(
                "expected method name, found object: {}",
                self.gc.to_text(name_ref, &self.assembly)
            );
            self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
            return;
        }

        // Arguments that are still names are resolved before dispatch.
        for position in 0..arity {
            let index = self.object_stack.len() - 2 - position;
            let argument = self.object_stack[index];
            if argument.tag == TypeTag::Unknown {
                let Some(resolved) = self.resolve_if_unknown(argument, frame_index, true) else {
                    return;
                };
                self.object_stack[index] = resolved;
            }
        }

        let receiver_index = self.object_stack.len() - arity - 2;
        let receiver = self.object_stack[receiver_index];
        let Some(receiver) = self.resolve_if_unknown(receiver, frame_index, true) else {
            return;
        };
        let Some(receiver) = self.underlying(receiver) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid call receiver");
            return;
        };

        let frame_namespace = self.call_stack[frame_index].namespace;
        let frame_class = self.call_stack[frame_index].class;

        let (namespace_name, class_name, target_method);
        match receiver.tag {
            TypeTag::ClassObject => {
                let class_id = self
                    .gc
                    .class_object(receiver)
                    .map(|object| object.class)
                    .expect("receiver tag checked");
                let with_this =
                    mangle_method(actual_method_name(&operand_name), arity + 1);
                if self.assembly.class(class_id).methods.contains_key(&with_this) {
                    self.object_stack[receiver_index] = receiver;
                    target_method = with_this;
                } else {
                    target_method = operand_name.clone();
                }
                let class = self.assembly.class(class_id);
                namespace_name = self.assembly.namespace(class.namespace).name.clone();
                class_name = class.name.clone();
            }
            TypeTag::Class => {
                let class_id = self
                    .gc
                    .class_wrapper(receiver)
                    .map(|wrapper| wrapper.class)
                    .expect("receiver tag checked");
                self.object_stack[receiver_index] = receiver;
                let class = self.assembly.class(class_id);
                namespace_name = self.assembly.namespace(class.namespace).name.clone();
                class_name = class.name.clone();
                target_method = operand_name.clone();
            }
            TypeTag::Namespace => {
                let namespace_id = self
                    .gc
                    .namespace_wrapper(receiver)
                    .map(|wrapper| wrapper.namespace)
                    .expect("receiver tag checked");
                let constructed = actual_method_name(&operand_name).to_string();
                let Some(class_id) = self.assembly.class_by_name(namespace_id, &constructed)
                else {
                    let text = format!(
                        "class `{constructed}` was not found in namespace: {}",
                        self.assembly.namespace(namespace_id).name
                    );
                    self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                    self.note_current_frame();
                    return;
                };
                if self.assembly.class(class_id).is_internal() && namespace_id != frame_namespace
                {
                    let text = format!(
                        "trying to access namespace internal member: {}",
                        self.assembly.full_class_name(class_id)
                    );
                    self.raise(ErrorFlags::PRIVATE_MEMBER_ACCESS, text);
                    self.note_current_frame();
                    return;
                }
                self.object_stack[receiver_index] = self.class_wrapper_ref(class_id);
                namespace_name = self.assembly.namespace(namespace_id).name.clone();
                class_name = constructed;
                target_method = operand_name.clone();
            }
            TypeTag::Integer
            | TypeTag::Float
            | TypeTag::String
            | TypeTag::True
            | TypeTag::False
            | TypeTag::Null => {
                let Some(class_id) = self.primitive_class(receiver) else {
                    return;
                };
                self.object_stack[receiver_index] = receiver;
                namespace_name = system::SYSTEM_NAMESPACE.to_string();
                class_name = self.assembly.class(class_id).name.clone();
                target_method = operand_name.clone();
            }
            _ => {
                self.raise(
                    ErrorFlags::INVALID_STACKOBJECT,
                    "caller of method was neither class object nor class type",
                );
                self.note(format!("called method name: {operand_name}"));
                let text = format!("caller was: {}", self.gc.to_text(receiver, &self.assembly));
                self.note(text);
                return;
            }
        }

        self.object_stack.pop();
        log::debug!("CALL_FUNCTION {namespace_name}.{class_name}.{target_method}");
        self.invoke(
            &namespace_name,
            &class_name,
            &target_method,
            Some((frame_namespace, frame_class)),
        );
    }

    /// Runs an instance method (operator, ToString, GetByIndex, ToBoolean)
    /// on a class object. Callers arrange the stack as `[this, args...]`.
    pub(crate) fn invoke_object_method(&mut self, method_name: &str, object: ObjectRef) {
        let Some(class_id) = self.gc.class_object(object).map(|o| o.class) else {
            self.raise(
                ErrorFlags::INVALID_STACKOBJECT,
                "class instance expected for object method invocation",
            );
            return;
        };
        let Some(method) = self.assembly.class(class_id).method(method_name) else {
            self.raise(
                ErrorFlags::MEMBER_NOT_FOUND,
                "method name provided to object method invocation not found",
            );
            let text = format!(
                "with {} object and method name: {method_name}",
                self.assembly.full_class_name(class_id)
            );
            self.note(text);
            return;
        };
        if method.is_abstract() || method.is_static() {
            self.raise(
                ErrorFlags::INVALID_METHOD_SIGNATURE,
                "trying to access abstract or static method in object method invocation",
            );
            return;
        }
        if !method.is_public() {
            self.raise(
                ErrorFlags::PRIVATE_MEMBER_ACCESS,
                "trying to access private method in object method invocation",
            );
            return;
        }
        let class = self.assembly.class(class_id);
        let namespace_name = self.assembly.namespace(class.namespace).name.clone();
        let class_name = class.name.clone();
        self.invoke(&namespace_name, &class_name, method_name, None);
    }

    fn pop_condition(&mut self, frame_index: usize, want_true: bool) -> ConditionOutcome {
        let Some(value) = self.object_stack.pop() else {
            self.raise(
                ErrorFlags::OBJECTSTACK_EMPTY,
                "object stack is empty, but conditional jump needs boolean",
            );
            self.note_current_frame();
            return ConditionOutcome::Error;
        };
        let Some(value) = self.resolve_if_unknown(value, frame_index, true) else {
            return ConditionOutcome::Error;
        };
        let Some(mut value) = self.underlying(value) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid jump condition");
            return ConditionOutcome::Error;
        };

        if value.tag == TypeTag::ClassObject {
            self.object_stack.push(value);
            self.invoke_object_method("ToBoolean_1", value);
            if !self.errors.is_empty() {
                self.note("could not convert class object into boolean");
                self.note_current_frame();
                return ConditionOutcome::Error;
            }
            let Some(converted) = self.object_stack.pop() else {
                self.raise(ErrorFlags::OBJECTSTACK_EMPTY, "ToBoolean produced no value");
                return ConditionOutcome::Error;
            };
            value = converted;
        }

        match (value.tag, want_true) {
            (TypeTag::True, true) => ConditionOutcome::Jump,
            (TypeTag::True, false) => ConditionOutcome::FallThrough,
            (TypeTag::False | TypeTag::Null, true) => ConditionOutcome::FallThrough,
            (TypeTag::False | TypeTag::Null, false) => ConditionOutcome::Jump,
            _ => {
                self.raise(
                    ErrorFlags::INVALID_METHOD_CALL,
                    "object cannot be implicitly converted to boolean",
                );
                self.note_current_frame();
                ConditionOutcome::Error
            }
        }
    }

    // ----- helpers shared with the native bridge -------------------------

    /// Pops the operand stack, raising OBJECTSTACK_EMPTY when drained.
    pub(crate) fn pop_stack(&mut self) -> Option<ObjectRef> {
        match self.object_stack.pop() {
            Some(value) => Some(value),
            None => {
                self.raise(
                    ErrorFlags::OBJECTSTACK_EMPTY,
                    "object stack was empty but a value was expected",
                );
                None
            }
        }
    }

    pub(crate) fn push_stack(&mut self, value: ObjectRef) {
        self.object_stack.push(value);
    }
}

enum ConditionOutcome {
    Jump,
    FallThrough,
    Error,
}

fn read_u64_operand(body: &[u8], offset: &mut usize) -> Option<u64> {
    let bytes = body.get(*offset..*offset + 8)?;
    *offset += 8;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u16_operand(body: &[u8], offset: &mut usize) -> Option<u16> {
    let bytes = body.get(*offset..*offset + 2)?;
    *offset += 2;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u8_operand(body: &[u8], offset: &mut usize) -> Option<u8> {
    let byte = *body.get(*offset)?;
    *offset += 1;
    Some(byte)
}
