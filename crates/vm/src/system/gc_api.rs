//! GC class: script-level control over the collector.

use crate::error::ErrorFlags;
use crate::object::{ObjectRef, TypeTag};
use crate::vm::VirtualMachine;

use super::expect_tag;

fn safe_mode_guard(vm: &mut VirtualMachine, method: &str) -> bool {
    if vm.config.execution.safe_mode {
        let text = format!("GC.{method}() function is disabled in VM safe mode");
        vm.raise(ErrorFlags::INVALID_METHOD_CALL, text);
        return false;
    }
    true
}

pub(super) fn collect(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    let error_stream = vm
        .config
        .streams
        .error
        .as_mut()
        .map(|stream| stream.as_mut() as &mut dyn std::io::Write);
    vm.gc
        .collect(&vm.assembly, &vm.call_stack, &vm.object_stack, error_stream);
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn enable(vm: &mut VirtualMachine) {
    if !safe_mode_guard(vm, "Enable") {
        return;
    }
    if vm.pop_stack().is_none() {
        return;
    }
    vm.gc.set_allow_collect(true);
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn disable(vm: &mut VirtualMachine) {
    if !safe_mode_guard(vm, "Disable") {
        return;
    }
    if vm.pop_stack().is_none() {
        return;
    }
    vm.gc.set_allow_collect(false);
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn release_memory(vm: &mut VirtualMachine) {
    if vm.pop_stack().is_none() {
        return;
    }
    vm.gc.release_memory();
    vm.push_stack(ObjectRef::NULL);
}

fn pop_memory_limit(vm: &mut VirtualMachine, method: &str) -> Option<u64> {
    let value = vm.pop_stack()?;
    vm.pop_stack()?;
    let value = match vm.underlying(value) {
        Some(value) => value,
        None => {
            vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid GC memory limit");
            return None;
        }
    };
    if !expect_tag(vm, value, TypeTag::Integer, "memory limit must be an integer") {
        return None;
    }
    let limit = vm.gc.integer(value).and_then(|object| object.value.to_u64());
    if limit.is_none() {
        let text = format!("value parameter was invalid in GC.{method}(value) method");
        vm.raise(ErrorFlags::INVALID_CALL_ARGUMENT, text);
    }
    limit
}

pub(super) fn set_minimal_memory(vm: &mut VirtualMachine) {
    if !safe_mode_guard(vm, "SetMinimalMemory") {
        return;
    }
    let Some(limit) = pop_memory_limit(vm, "SetMinimalMemory") else {
        return;
    };
    vm.gc.set_min_memory(limit);
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn set_maximal_memory(vm: &mut VirtualMachine) {
    if !safe_mode_guard(vm, "SetMaximalMemory") {
        return;
    }
    let Some(limit) = pop_memory_limit(vm, "SetMaximalMemory") else {
        return;
    };
    vm.gc.set_max_memory(limit);
    vm.push_stack(ObjectRef::NULL);
}

pub(super) fn set_log_permissions(vm: &mut VirtualMachine) {
    let Some(value) = vm.pop_stack() else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    let Some(value) = vm.underlying(value) else {
        vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid GC log permission");
        return;
    };
    match value.tag {
        TypeTag::True => vm.gc.set_log_to_error(true),
        TypeTag::False => vm.gc.set_log_to_error(false),
        _ => {
            vm.raise(
                ErrorFlags::INVALID_STACKOBJECT,
                "GC.SetLogPermissions(value) accepts only Boolean as parameter",
            );
            return;
        }
    }
    vm.push_stack(ObjectRef::NULL);
}
