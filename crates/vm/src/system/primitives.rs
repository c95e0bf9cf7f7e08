//! Primitive classes: Integer, Float, String, True, False, Null.
//!
//! These back GET_INDEX and CALL_FUNCTION on primitive receivers; each class
//! exposes a zero-argument constructor and ToString.

use crate::big_int::MslInt;
use crate::error::ErrorFlags;
use crate::object::{ObjectRef, TypeTag};
use crate::vm::VirtualMachine;

use super::expect_tag;

/// Pops the receiver value and dereferences assignable cells.
fn pop_receiver(vm: &mut VirtualMachine) -> Option<ObjectRef> {
    let value = vm.pop_stack()?;
    match vm.underlying(value) {
        Some(value) => Some(value),
        None => {
            vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid primitive receiver");
            None
        }
    }
}

fn to_string_of(vm: &mut VirtualMachine, tag: TypeTag, message: &str) {
    let Some(value) = pop_receiver(vm) else { return };
    if !expect_tag(vm, value, tag, message) {
        return;
    }
    let text = vm.gc.to_text(value, &vm.assembly);
    let result = vm.gc.alloc_string(text);
    vm.push_stack(result);
}

pub(super) fn integer_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let result = vm.gc.alloc_integer(MslInt::zero());
    vm.push_stack(result);
}

pub(super) fn integer_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::Integer, "Integer class received wrong type");
}

pub(super) fn float_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let result = vm.gc.alloc_float(0.0);
    vm.push_stack(result);
}

pub(super) fn float_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::Float, "Float class received wrong type");
}

pub(super) fn string_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let result = vm.gc.alloc_string("");
    vm.push_stack(result);
}

pub(super) fn string_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::String, "String class received wrong type");
}

pub(super) fn string_empty(vm: &mut VirtualMachine) {
    let Some(value) = pop_receiver(vm) else { return };
    if !expect_tag(vm, value, TypeTag::String, "String class received wrong type") {
        return;
    }
    let is_empty = vm
        .gc
        .string(value)
        .map(|object| object.value.is_empty())
        .unwrap_or(true);
    vm.push_stack(ObjectRef::bool(is_empty));
}

pub(super) fn string_size(vm: &mut VirtualMachine) {
    let Some(value) = pop_receiver(vm) else { return };
    if !expect_tag(vm, value, TypeTag::String, "String class received wrong type") {
        return;
    }
    let length = vm.gc.string(value).map(|object| object.value.len()).unwrap_or(0);
    let result = vm.gc.alloc_integer(length.into());
    vm.push_stack(result);
}

pub(super) fn string_get_by_index(vm: &mut VirtualMachine) {
    let Some(index) = pop_receiver(vm) else { return };
    let Some(value) = pop_receiver(vm) else { return };
    if !expect_tag(vm, value, TypeTag::String, "String class received wrong type") {
        return;
    }
    if !expect_tag(vm, index, TypeTag::Integer, "index must be an integer") {
        return;
    }
    let position = vm.gc.integer(index).and_then(|object| object.value.to_usize());
    let text = vm.gc.string(value).map(|object| object.value.clone()).unwrap_or_default();
    match position.filter(|&position| position < text.len()) {
        Some(position) => {
            let character = (text.as_bytes()[position] as char).to_string();
            let result = vm.gc.alloc_string(character);
            vm.push_stack(result);
        }
        None => {
            let shown = vm
                .gc
                .integer(index)
                .map(|object| object.value.to_string())
                .unwrap_or_default();
            let text = format!("cannot access String element with index = {shown}");
            vm.raise(ErrorFlags::INVALID_CALL_ARGUMENT, text);
        }
    }
}

pub(super) fn true_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    vm.push_stack(ObjectRef::TRUE);
}

pub(super) fn true_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::True, "True class received wrong type");
}

pub(super) fn false_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    vm.push_stack(ObjectRef::FALSE);
}

pub(super) fn false_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::False, "False class received wrong type");
}

pub(super) fn null_constructor(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn null_to_string(vm: &mut VirtualMachine) {
    to_string_of(vm, TypeTag::Null, "Null class received wrong type");
}
