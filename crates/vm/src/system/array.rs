//! Array class: the growable sequence of assignable cells.

use crate::error::ErrorFlags;
use crate::object::{Local, LocalSlot, ObjectRef, TypeTag};
use crate::op_code::OpCode;
use crate::vm::VirtualMachine;

use super::expect_tag;

/// Allocates a `System.Array` instance whose `array` attribute holds a fresh
/// backing store of `size` Null cells.
fn new_instance(vm: &mut VirtualMachine, size: usize) -> Option<ObjectRef> {
    let system = vm.assembly.namespace_by_name(super::SYSTEM_NAMESPACE)?;
    let class_id = vm.assembly.class_by_name(system, "Array")?;
    let instance = vm.gc.alloc_class_object(class_id, &vm.assembly);
    let storage = vm.gc.alloc_array(size);
    let attribute = *vm.gc.class_object(instance)?.attributes.get("array")?;
    vm.gc.attribute_mut(attribute)?.value = storage;
    Some(instance)
}

/// Backing ArrayObject of a `System.Array` instance.
fn payload(vm: &mut VirtualMachine, instance: ObjectRef) -> Option<ObjectRef> {
    let resolved = vm.underlying(instance)?;
    let attribute = *vm.gc.class_object(resolved)?.attributes.get("array")?;
    let storage = vm.gc.attribute(attribute)?.value;
    (storage.tag == TypeTag::Array).then_some(storage)
}

fn payload_or_raise(vm: &mut VirtualMachine, instance: ObjectRef) -> Option<ObjectRef> {
    match payload(vm, instance) {
        Some(storage) => Some(storage),
        None => {
            vm.raise(
                ErrorFlags::INVALID_STACKOBJECT,
                "Array instance expected as receiver",
            );
            None
        }
    }
}

pub(super) fn constructor_empty(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    if let Some(instance) = new_instance(vm, 0) {
        vm.push_stack(instance);
    }
}

pub(super) fn constructor_sized(vm: &mut VirtualMachine) {
    let Some(size) = vm.pop_stack() else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    let Some(size) = vm.underlying(size) else {
        vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid Array size");
        return;
    };
    if !expect_tag(vm, size, TypeTag::Integer, "Array size must be an integer") {
        return;
    }
    let value = vm.gc.integer(size).map(|object| object.value.clone());
    let Some(count) = value.as_ref().and_then(|value| value.to_usize()) else {
        let text = format!(
            "cannot create Array instance with size: {}",
            value.map(|v| v.to_string()).unwrap_or_default()
        );
        vm.raise(ErrorFlags::INVALID_CALL_ARGUMENT, text);
        return;
    };
    if let Some(instance) = new_instance(vm, count) {
        vm.push_stack(instance);
    }
}

pub(super) fn get_by_index(vm: &mut VirtualMachine) {
    let Some(index) = vm.pop_stack() else { return };
    let Some(instance) = vm.pop_stack() else { return };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let Some(index) = vm.underlying(index) else {
        vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid array index");
        return;
    };
    if !expect_tag(
        vm,
        index,
        TypeTag::Integer,
        "invalid argument was passed as array index",
    ) {
        return;
    }
    let value = vm.gc.integer(index).map(|object| object.value.clone());
    let length = vm.gc.array(storage).map(|array| array.elements.len()).unwrap_or(0);
    let position = value.as_ref().and_then(|value| value.to_usize());
    let Some(position) = position.filter(|&position| position < length) else {
        let text = format!(
            "cannot access Array member with index = {}",
            value.map(|v| v.to_string()).unwrap_or_default()
        );
        vm.raise(ErrorFlags::INVALID_CALL_ARGUMENT, text);
        return;
    };
    let name = format!("System.Array.array[{position}]");
    let reference = vm.gc.alloc_local(
        name,
        LocalSlot::ArrayElem {
            array: storage,
            index: position,
        },
    );
    vm.push_stack(reference);
}

pub(super) fn size(vm: &mut VirtualMachine) {
    let Some(instance) = vm.pop_stack() else { return };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let length = vm.gc.array(storage).map(|array| array.elements.len()).unwrap_or(0);
    let result = vm.gc.alloc_integer(length.into());
    vm.push_stack(result);
}

pub(super) fn empty(vm: &mut VirtualMachine) {
    let Some(instance) = vm.pop_stack() else { return };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let is_empty = vm
        .gc
        .array(storage)
        .map(|array| array.elements.is_empty())
        .unwrap_or(true);
    vm.push_stack(ObjectRef::bool(is_empty));
}

pub(super) fn begin(vm: &mut VirtualMachine) {
    let Some(_instance) = vm.pop_stack() else { return };
    let result = vm.gc.alloc_integer(0u64.into());
    vm.push_stack(result);
}

pub(super) fn end(vm: &mut VirtualMachine) {
    size(vm);
}

pub(super) fn next(vm: &mut VirtualMachine) {
    let Some(iterator) = vm.pop_stack() else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    let Some(iterator) = vm.underlying(iterator) else {
        vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid array iterator");
        return;
    };
    if !expect_tag(
        vm,
        iterator,
        TypeTag::Integer,
        "invalid iterator was passed to Array.Next(this, iter) method",
    ) {
        return;
    }
    let Some(value) = vm.gc.integer(iterator).map(|object| object.value.clone()) else {
        return;
    };
    let result = vm.gc.alloc_integer(&value + &1i64.into());
    vm.push_stack(result);
}

pub(super) fn pop(vm: &mut VirtualMachine) {
    let Some(instance) = vm.pop_stack() else { return };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let popped = vm
        .gc
        .array_mut(storage)
        .and_then(|array| array.elements.pop());
    match popped {
        Some(element) => vm.push_stack(element.value),
        None => vm.push_stack(ObjectRef::NULL),
    }
}

pub(super) fn append(vm: &mut VirtualMachine) {
    let Some(value) = vm.pop_stack() else { return };
    // The receiver stays on the stack: Append yields the array itself.
    let Some(&instance) = vm.object_stack.last() else {
        vm.raise(ErrorFlags::OBJECTSTACK_EMPTY, "Array.Append without receiver");
        return;
    };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    if let Some(array) = vm.gc.array_mut(storage) {
        array.elements.push(Local::new(value));
    }
}

pub(super) fn to_string(vm: &mut VirtualMachine) {
    // The receiver stays on the stack until the end: rendering an element can
    // re-enter the interpreter, and the array must stay rooted through it.
    let Some(&instance) = vm.object_stack.last() else {
        vm.raise(ErrorFlags::OBJECTSTACK_EMPTY, "Array.ToString without receiver");
        return;
    };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let length = vm.gc.array(storage).map(|array| array.elements.len()).unwrap_or(0);

    let accumulator = vm.gc.alloc_string("[");
    vm.push_stack(accumulator);
    for position in 0..length {
        let element = vm
            .gc
            .array(storage)
            .and_then(|array| array.elements.get(position).copied());
        let Some(element) = element else { break };
        let quoted = element.value.tag == TypeTag::String;
        if position != 0 {
            append_to_top(vm, ", ");
        }
        if quoted {
            append_to_top(vm, "\"");
        }
        vm.push_stack(element.value);
        vm.perform_alu_call(OpCode::SumOp, 2);
        if !vm.errors().is_empty() {
            return;
        }
        if quoted {
            append_to_top(vm, "\"");
        }
    }
    append_to_top(vm, "]");

    let result = vm.pop_stack();
    vm.pop_stack();
    if let Some(result) = result {
        vm.push_stack(result);
    }
}

fn append_to_top(vm: &mut VirtualMachine, suffix: &str) {
    if let Some(&top) = vm.object_stack.last() {
        if let Some(string) = vm.gc.string_mut(top) {
            string.value.push_str(suffix);
        }
    }
}

/// In-place insertion sort driven through the ALU's CMP_L, so user-defined
/// IsLess operators participate and comparison failures stop the pass.
pub(super) fn sort(vm: &mut VirtualMachine) {
    let Some(&instance) = vm.object_stack.last() else {
        vm.raise(ErrorFlags::OBJECTSTACK_EMPTY, "Array.Sort without receiver");
        return;
    };
    let Some(storage) = payload_or_raise(vm, instance) else {
        return;
    };
    let length = vm.gc.array(storage).map(|array| array.elements.len()).unwrap_or(0);

    for sorted in 1..length {
        let mut position = sorted;
        while position > 0 {
            let pair = vm.gc.array(storage).map(|array| {
                (
                    array.elements[position].value,
                    array.elements[position - 1].value,
                )
            });
            let Some((current, previous)) = pair else { return };
            vm.push_stack(current);
            vm.push_stack(previous);
            vm.perform_alu_call(OpCode::CmpL, 2);
            if !vm.errors().is_empty() {
                return;
            }
            let Some(outcome) = vm.pop_stack() else { return };
            match outcome.tag {
                TypeTag::True => {
                    if let Some(array) = vm.gc.array_mut(storage) {
                        array.elements.swap(position, position - 1);
                    }
                    position -= 1;
                }
                TypeTag::False => break,
                _ => {
                    vm.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "comparison result of Array.Sort was not a boolean",
                    );
                    return;
                }
            }
        }
    }
}
