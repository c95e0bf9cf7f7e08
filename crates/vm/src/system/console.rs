//! Console class: program input and output.

use crate::error::ErrorFlags;
use crate::object::{ObjectRef, TypeTag};
use crate::vm::VirtualMachine;
use std::io::{BufRead, Write};

pub(super) fn print(vm: &mut VirtualMachine) {
    print_value(vm, false);
}

pub(super) fn print_line(vm: &mut VirtualMachine) {
    print_value(vm, true);
}

/// Pops the value, renders it, then consumes the receiver and leaves True.
/// Class objects delegate to their ToString method, re-entering here with
/// the converted value.
fn print_value(vm: &mut VirtualMachine, newline: bool) {
    let Some(top) = vm.pop_stack() else { return };
    let Some(value) = vm.underlying(top) else {
        vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid Print argument");
        return;
    };

    let text = match value.tag {
        TypeTag::Namespace => format!("namespace {}", vm.gc.to_text(value, &vm.assembly)),
        TypeTag::Class => format!("class {}", vm.gc.to_text(value, &vm.assembly)),
        TypeTag::ClassObject => {
            let class_id = vm
                .gc
                .class_object(value)
                .map(|object| object.class)
                .expect("tag checked above");
            if vm.assembly.class(class_id).method("ToString_1").is_some() {
                vm.push_stack(value);
                vm.invoke_object_method("ToString_1", value);
                if vm.errors().is_empty() {
                    print_value(vm, newline);
                }
                return;
            }
            format!("{} instance", vm.assembly.full_class_name(class_id))
        }
        _ => vm.gc.to_text(value, &vm.assembly),
    };

    if let Some(output) = vm.config.streams.output.as_mut() {
        let _ = output.write_all(text.as_bytes());
        if newline {
            let _ = output.write_all(b"\n");
        }
        let _ = output.flush();
    }
    vm.pop_stack();
    vm.push_stack(ObjectRef::TRUE);
}

/// Reads one whitespace-delimited token; an absent stream yields "".
fn next_token(vm: &mut VirtualMachine) -> String {
    let Some(input) = vm.config.streams.input.as_mut() else {
        return String::new();
    };
    let mut token: Vec<u8> = Vec::new();
    loop {
        let buffer = match input.fill_buf() {
            Ok(buffer) => buffer,
            Err(_) => break,
        };
        if buffer.is_empty() {
            break;
        }
        let mut consumed = 0;
        let mut done = false;
        for &byte in buffer {
            if byte.is_ascii_whitespace() {
                if token.is_empty() {
                    consumed += 1;
                    continue;
                }
                done = true;
                break;
            }
            token.push(byte);
            consumed += 1;
        }
        input.consume(consumed);
        if done {
            break;
        }
    }
    String::from_utf8_lossy(&token).into_owned()
}

pub(super) fn read(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let token = next_token(vm);
    let value = vm.gc.alloc_string(token);
    vm.push_stack(value);
}

pub(super) fn read_int(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let token = next_token(vm);
    let value = vm.gc.alloc_integer_from_str(&token);
    vm.push_stack(value);
}

pub(super) fn read_float(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let token = next_token(vm);
    let value = vm.gc.alloc_float_from_str(&token);
    vm.push_stack(value);
}

pub(super) fn read_line(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let mut line = String::new();
    if let Some(input) = vm.config.streams.input.as_mut() {
        let _ = input.read_line(&mut line);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    let value = vm.gc.alloc_string(line);
    vm.push_stack(value);
}

pub(super) fn read_bool(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let token = next_token(vm);
    let value = matches!(token.as_str(), "1" | "True" | "true");
    vm.push_stack(ObjectRef::bool(value));
}
