//! Reflection class: runtime type inspection and dynamic invocation.

use crate::error::ErrorFlags;
use crate::object::{ObjectRef, TypeTag};
use crate::types::{mangle_method, ClassId};
use crate::vm::VirtualMachine;

use super::expect_tag;

/// Pops one argument and dereferences assignable cells.
fn pop_value(vm: &mut VirtualMachine) -> Option<ObjectRef> {
    let value = vm.pop_stack()?;
    match vm.underlying(value) {
        Some(value) => Some(value),
        None => {
            vm.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid reflection argument");
            None
        }
    }
}

pub(super) fn get_type(vm: &mut VirtualMachine) {
    let Some(value) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    let result = match value.tag {
        TypeTag::Class | TypeTag::Namespace => Some(value),
        TypeTag::ClassObject => {
            let class = vm.gc.class_object(value).map(|object| object.class);
            class.and_then(|class| vm.assembly.class(class).wrapper)
        }
        _ => vm
            .primitive_class(value)
            .and_then(|class| vm.assembly.class(class).wrapper),
    };
    match result {
        Some(wrapper) => vm.push_stack(wrapper),
        None => {
            vm.raise(
                ErrorFlags::INVALID_CALL_ARGUMENT,
                "class object expected as a parameter",
            );
        }
    }
}

pub(super) fn create_instance(vm: &mut VirtualMachine) {
    let Some(value) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, value, TypeTag::Class, "class type expected as a parameter") {
        return;
    }
    let Some(class_id) = vm.gc.class_wrapper(value).map(|wrapper| wrapper.class) else {
        return;
    };
    let class = vm.assembly.class(class_id);
    let constructor = mangle_method(&class.name, 0);
    if class.method(&constructor).is_none() {
        let text = format!(
            "class type provided does not have constructor with no parameters: {}",
            vm.assembly.full_class_name(class_id)
        );
        vm.raise(ErrorFlags::MEMBER_NOT_FOUND, text);
        if vm.assembly.class(class_id).is_static() {
            let text = format!(
                "{} is static class, so its instance cannot be created",
                vm.assembly.full_class_name(class_id)
            );
            vm.note(text);
        }
        return;
    }
    dispatch_on_class(vm, class_id, &constructor, None, &[]);
}

pub(super) fn invoke(vm: &mut VirtualMachine) {
    let Some(arguments) = pop_value(vm) else { return };
    let Some(method_name) = pop_value(vm) else { return };
    let Some(target) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, method_name, TypeTag::String, "method name must be a string") {
        return;
    }
    let Some(name) = vm.gc.string(method_name).map(|object| object.value.clone()) else {
        return;
    };

    // The argument pack is a System.Array; anything else is treated as a
    // single argument.
    let argument_values: Vec<ObjectRef> = match array_elements(vm, arguments) {
        Some(values) => values,
        None => vec![arguments],
    };

    let (class_id, instance) = match target.tag {
        TypeTag::Class => {
            let Some(class) = vm.gc.class_wrapper(target).map(|wrapper| wrapper.class) else {
                return;
            };
            (class, None)
        }
        TypeTag::ClassObject => {
            let Some(class) = vm.gc.class_object(target).map(|object| object.class) else {
                return;
            };
            (class, Some(target))
        }
        _ => {
            vm.raise(
                ErrorFlags::INVALID_STACKOBJECT,
                "class or class instance expected as invocation target",
            );
            return;
        }
    };

    let arity = argument_values.len() + usize::from(instance.is_some());
    let mangled = mangle_method(&name, arity);
    let Some(method) = vm.assembly.class(class_id).method(&mangled) else {
        let text = format!(
            "class provided does not have method `{name}` with {} arguments, class was: {}",
            argument_values.len(),
            vm.assembly.full_class_name(class_id)
        );
        vm.raise(ErrorFlags::MEMBER_NOT_FOUND, text);
        return;
    };
    if !method.is_static() && !method.is_constructor() && instance.is_none() {
        vm.raise(
            ErrorFlags::INVALID_METHOD_CALL,
            "tried to call non-static method using class type as argument",
        );
        return;
    }
    dispatch_on_class(vm, class_id, &mangled, instance, &argument_values);
}

fn dispatch_on_class(
    vm: &mut VirtualMachine,
    class_id: ClassId,
    method_name: &str,
    instance: Option<ObjectRef>,
    arguments: &[ObjectRef],
) {
    let receiver = match instance {
        Some(instance) => instance,
        None => vm
            .assembly
            .class(class_id)
            .wrapper
            .unwrap_or(ObjectRef::NULL),
    };
    vm.push_stack(receiver);
    for argument in arguments {
        vm.push_stack(*argument);
    }
    let class = vm.assembly.class(class_id);
    let namespace = vm.assembly.namespace(class.namespace).name.clone();
    let class_name = class.name.clone();
    vm.invoke(&namespace, &class_name, method_name, None);
}

/// Element values of a System.Array instance, if the value is one.
fn array_elements(vm: &VirtualMachine, value: ObjectRef) -> Option<Vec<ObjectRef>> {
    let object = vm.gc.class_object(value)?;
    let attribute = *object.attributes.get("array")?;
    let storage = vm.gc.attribute(attribute)?.value;
    let array = vm.gc.array(storage)?;
    Some(array.elements.iter().map(|element| element.value).collect())
}

pub(super) fn contains_member(vm: &mut VirtualMachine) {
    let Some(member) = pop_value(vm) else { return };
    let Some(target) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, member, TypeTag::String, "member name must be a string") {
        return;
    }
    let Some(name) = vm.gc.string(member).map(|object| object.value.clone()) else {
        return;
    };
    let result = vm.get_member_object(target, &name);
    let visible = match result {
        None => false,
        Some(found) => match found.tag {
            TypeTag::Attribute => vm
                .gc
                .attribute(found)
                .map(|attribute| attribute.is_public())
                .unwrap_or(false),
            TypeTag::Class => vm
                .gc
                .class_wrapper(found)
                .map(|wrapper| !vm.assembly.class(wrapper.class).is_internal())
                .unwrap_or(false),
            _ => true,
        },
    };
    vm.push_stack(ObjectRef::bool(visible));
}

pub(super) fn contains_method(vm: &mut VirtualMachine) {
    let Some(argument_count) = pop_value(vm) else { return };
    let Some(method_name) = pop_value(vm) else { return };
    let Some(target) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, method_name, TypeTag::String, "method name must be a string") {
        return;
    }
    if !expect_tag(
        vm,
        argument_count,
        TypeTag::Integer,
        "argument count must be an integer",
    ) {
        return;
    }
    let Some(name) = vm.gc.string(method_name).map(|object| object.value.clone()) else {
        return;
    };
    let count = vm
        .gc
        .integer(argument_count)
        .and_then(|object| object.value.to_usize());

    let (class_id, has_instance) = match target.tag {
        TypeTag::Class => match vm.gc.class_wrapper(target) {
            Some(wrapper) => (wrapper.class, false),
            None => {
                vm.push_stack(ObjectRef::FALSE);
                return;
            }
        },
        TypeTag::ClassObject => match vm.gc.class_object(target) {
            Some(object) => (object.class, true),
            None => {
                vm.push_stack(ObjectRef::FALSE);
                return;
            }
        },
        _ => {
            vm.push_stack(ObjectRef::FALSE);
            return;
        }
    };
    let Some(count) = count else {
        vm.push_stack(ObjectRef::FALSE);
        return;
    };

    let mangled = mangle_method(&name, count + usize::from(has_instance));
    let callable = match vm.assembly.class(class_id).method(&mangled) {
        None => false,
        Some(method) => {
            method.is_public()
                && (method.is_static() || method.is_constructor() || has_instance)
        }
    };
    vm.push_stack(ObjectRef::bool(callable));
}

pub(super) fn get_member(vm: &mut VirtualMachine) {
    let Some(member) = pop_value(vm) else { return };
    let Some(target) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, member, TypeTag::String, "member name must be a string") {
        return;
    }
    let Some(name) = vm.gc.string(member).map(|object| object.value.clone()) else {
        return;
    };
    match vm.get_member_object(target, &name) {
        Some(found) => vm.push_stack(found),
        None => {
            let text = format!(
                "member with name `{name}` was not found in {}",
                vm.gc.to_text(target, &vm.assembly)
            );
            vm.raise(ErrorFlags::MEMBER_NOT_FOUND, text);
        }
    }
}

pub(super) fn get_namespace(vm: &mut VirtualMachine) {
    let Some(name) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, name, TypeTag::String, "namespace name must be a string") {
        return;
    }
    let Some(name) = vm.gc.string(name).map(|object| object.value.clone()) else {
        return;
    };
    let wrapper = vm
        .assembly
        .namespace_by_name(&name)
        .and_then(|namespace| vm.assembly.namespace(namespace).wrapper);
    match wrapper {
        Some(wrapper) => vm.push_stack(wrapper),
        None => {
            let text =
                format!("current assembly does not contain namespace with name: {name}");
            vm.raise(ErrorFlags::MEMBER_NOT_FOUND, text);
        }
    }
}

pub(super) fn is_namespace_exists(vm: &mut VirtualMachine) {
    let Some(name) = pop_value(vm) else { return };
    if vm.pop_stack().is_none() {
        return;
    }
    if !expect_tag(vm, name, TypeTag::String, "namespace name must be a string") {
        return;
    }
    let Some(name) = vm.gc.string(name).map(|object| object.value.clone()) else {
        return;
    };
    let exists = vm.assembly.namespace_by_name(&name).is_some();
    vm.push_stack(ObjectRef::bool(exists));
}
