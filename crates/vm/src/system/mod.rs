//! The built-in System namespace: native classes and their dispatch.
//!
//! System classes are declared as ordinary metadata flagged SYSTEM; when
//! frame initialization reaches one, the call is routed here instead of into
//! bytecode. Handlers receive the VM explicitly, consume the receiver and
//! arguments from the object stack, and leave exactly one result.

mod array;
mod console;
mod gc_api;
mod math;
mod primitives;
mod reflection;

use crate::error::ErrorFlags;
use crate::object::{ObjectRef, TypeTag};
use crate::types::{
    full_method_name, mangle_method, Assembly, AttributeModifiers, AttributeType, ClassId,
    ClassModifiers, ClassType, MethodModifiers, MethodType, NamespaceType,
};
use crate::vm::VirtualMachine;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

pub const SYSTEM_NAMESPACE: &str = "System";

/// A native method implementation.
pub(crate) type SystemMethod = fn(&mut VirtualMachine);

static REGISTRY: Lazy<HashMap<(String, String), SystemMethod>> = Lazy::new(|| {
    let mut table: HashMap<(String, String), SystemMethod> = HashMap::new();
    let mut entry = |class: &str, method: &str, handler: SystemMethod| {
        table.insert((class.to_string(), method.to_string()), handler);
    };

    entry("Console", "Print_1", console::print);
    entry("Console", "PrintLine_1", console::print_line);
    entry("Console", "Read_0", console::read);
    entry("Console", "ReadInt_0", console::read_int);
    entry("Console", "ReadFloat_0", console::read_float);
    entry("Console", "ReadLine_0", console::read_line);
    entry("Console", "ReadBool_0", console::read_bool);

    entry("Reflection", "GetType_1", reflection::get_type);
    entry("Reflection", "CreateInstance_1", reflection::create_instance);
    entry("Reflection", "Invoke_3", reflection::invoke);
    entry("Reflection", "ContainsMember_2", reflection::contains_member);
    entry("Reflection", "ContainsMethod_3", reflection::contains_method);
    entry("Reflection", "GetMember_2", reflection::get_member);
    entry("Reflection", "GetNamespace_1", reflection::get_namespace);
    entry("Reflection", "IsNamespaceExists_1", reflection::is_namespace_exists);

    entry("Array", "Array_0", array::constructor_empty);
    entry("Array", "Array_1", array::constructor_sized);
    entry("Array", "GetByIndex_2", array::get_by_index);
    entry("Array", "GetByIter_2", array::get_by_index);
    entry("Array", "Next_2", array::next);
    entry("Array", "Append_2", array::append);
    entry("Array", "Pop_1", array::pop);
    entry("Array", "Size_1", array::size);
    entry("Array", "Empty_1", array::empty);
    entry("Array", "ToString_1", array::to_string);
    entry("Array", "Begin_1", array::begin);
    entry("Array", "End_1", array::end);
    entry("Array", "Sort_1", array::sort);

    entry("Math", "Sqrt_1", math::sqrt);
    entry("Math", "Abs_1", math::abs);
    entry("Math", "Sin_1", math::sin);
    entry("Math", "Cos_1", math::cos);
    entry("Math", "Tan_1", math::tan);
    entry("Math", "Exp_1", math::exp);
    entry("Math", "Atan_1", math::atan);
    entry("Math", "Acos_1", math::acos);
    entry("Math", "Asin_1", math::asin);
    entry("Math", "Log10_1", math::log10);
    entry("Math", "Log2_1", math::log2);
    entry("Math", "Log_1", math::log);

    entry("GC", "Collect_0", gc_api::collect);
    entry("GC", "Enable_0", gc_api::enable);
    entry("GC", "Disable_0", gc_api::disable);
    entry("GC", "ReleaseMemory_0", gc_api::release_memory);
    entry("GC", "SetMinimalMemory_1", gc_api::set_minimal_memory);
    entry("GC", "SetMaximalMemory_1", gc_api::set_maximal_memory);
    entry("GC", "SetLogPermissions_1", gc_api::set_log_permissions);

    entry("Integer", "Integer_0", primitives::integer_constructor);
    entry("Integer", "ToString_0", primitives::integer_to_string);
    entry("Float", "Float_0", primitives::float_constructor);
    entry("Float", "ToString_0", primitives::float_to_string);
    entry("String", "String_0", primitives::string_constructor);
    entry("String", "ToString_0", primitives::string_to_string);
    entry("String", "Empty_0", primitives::string_empty);
    entry("String", "Size_0", primitives::string_size);
    entry("String", "GetByIndex_1", primitives::string_get_by_index);
    entry("True", "True_0", primitives::true_constructor);
    entry("True", "ToString_0", primitives::true_to_string);
    entry("False", "False_0", primitives::false_constructor);
    entry("False", "ToString_0", primitives::false_to_string);
    entry("Null", "Null_0", primitives::null_constructor);
    entry("Null", "ToString_0", primitives::null_to_string);

    drop(entry);
    table
});

/// Routes a call on a SYSTEM class into its native implementation.
pub(crate) fn dispatch(vm: &mut VirtualMachine, class_id: ClassId, method: &MethodType) {
    let class_name = vm.assembly.class(class_id).name.clone();
    match REGISTRY.get(&(class_name.clone(), method.name.clone())) {
        Some(handler) => handler(vm),
        None => {
            let text = format!(
                "invalid method was passed to the system call bridge: {class_name}.{}",
                full_method_name(method)
            );
            vm.raise(ErrorFlags::INVALID_METHOD_CALL, text);
        }
    }
}

/// Declares the System namespace into the assembly. Called once at VM
/// start-up, replacing any previous declaration of the same name.
pub(crate) fn install(assembly: &mut Assembly) {
    let namespace = assembly.add_namespace(NamespaceType {
        name: SYSTEM_NAMESPACE.to_string(),
        ..Default::default()
    });
    let system_static = ClassModifiers::STATIC | ClassModifiers::SYSTEM;

    let mut console = ClassType::new("Console".to_string(), namespace, system_static);
    static_method(&mut console, "Print", &["value"]);
    static_method(&mut console, "PrintLine", &["value"]);
    static_method(&mut console, "Read", &[]);
    static_method(&mut console, "ReadInt", &[]);
    static_method(&mut console, "ReadFloat", &[]);
    static_method(&mut console, "ReadBool", &[]);
    static_method(&mut console, "ReadLine", &[]);
    assembly.add_class(console);

    let mut reflection = ClassType::new("Reflection".to_string(), namespace, system_static);
    static_method(&mut reflection, "GetType", &["object"]);
    static_method(&mut reflection, "CreateInstance", &["type"]);
    static_method(&mut reflection, "Invoke", &["type", "method", "args"]);
    static_method(&mut reflection, "ContainsMember", &["type", "member"]);
    static_method(&mut reflection, "ContainsMethod", &["type", "method", "argCount"]);
    static_method(&mut reflection, "GetMember", &["type", "member"]);
    static_method(&mut reflection, "GetNamespace", &["name"]);
    static_method(&mut reflection, "IsNamespaceExists", &["name"]);
    assembly.add_class(reflection);

    let mut math = ClassType::new("Math".to_string(), namespace, system_static);
    for name in [
        "Sqrt", "Abs", "Sin", "Cos", "Tan", "Exp", "Atan", "Acos", "Asin", "Log10", "Log2", "Log",
    ] {
        static_method(&mut math, name, &["value"]);
    }
    assembly.add_class(math);

    let mut gc = ClassType::new("GC".to_string(), namespace, system_static);
    static_method(&mut gc, "Collect", &[]);
    static_method(&mut gc, "Enable", &[]);
    static_method(&mut gc, "Disable", &[]);
    static_method(&mut gc, "ReleaseMemory", &[]);
    static_method(&mut gc, "SetMinimalMemory", &["value"]);
    static_method(&mut gc, "SetMaximalMemory", &["value"]);
    static_method(&mut gc, "SetLogPermissions", &["value"]);
    assembly.add_class(gc);

    for name in ["Integer", "Float", "True", "False", "Null"] {
        let mut class = ClassType::new(name.to_string(), namespace, system_static);
        static_method(&mut class, name, &[]);
        static_method(&mut class, "ToString", &[]);
        assembly.add_class(class);
    }

    let mut string = ClassType::new("String".to_string(), namespace, system_static);
    static_method(&mut string, "String", &[]);
    static_method(&mut string, "ToString", &[]);
    static_method(&mut string, "Empty", &[]);
    static_method(&mut string, "Size", &[]);
    static_method(&mut string, "GetByIndex", &["index"]);
    assembly.add_class(string);

    // Array is the one instantiable System class.
    let mut array = ClassType::new(
        "Array".to_string(),
        namespace,
        ClassModifiers::SYSTEM,
    );
    constructor(&mut array, "Array", &[]);
    constructor(&mut array, "Array", &["size"]);
    instance_method(&mut array, "Append", &["this", "object"]);
    instance_method(&mut array, "GetByIndex", &["this", "index"]);
    instance_method(&mut array, "GetByIter", &["this", "iter"]);
    instance_method(&mut array, "Next", &["this", "iter"]);
    instance_method(&mut array, "Pop", &["this"]);
    instance_method(&mut array, "Empty", &["this"]);
    instance_method(&mut array, "Size", &["this"]);
    instance_method(&mut array, "ToString", &["this"]);
    instance_method(&mut array, "Begin", &["this"]);
    instance_method(&mut array, "End", &["this"]);
    instance_method(&mut array, "Sort", &["this"]);
    array.object_attributes.insert(
        "array".to_string(),
        AttributeType {
            name: "array".to_string(),
            modifiers: AttributeModifiers::empty(),
        },
    );
    assembly.add_class(array);
}

fn declare(class: &mut ClassType, name: &str, parameters: &[&str], modifiers: MethodModifiers) {
    let method = MethodType {
        name: mangle_method(name, parameters.len()),
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
        modifiers,
        ..Default::default()
    };
    class.methods.insert(method.name.clone(), Arc::new(method));
}

fn static_method(class: &mut ClassType, name: &str, parameters: &[&str]) {
    declare(
        class,
        name,
        parameters,
        MethodModifiers::PUBLIC | MethodModifiers::STATIC,
    );
}

fn instance_method(class: &mut ClassType, name: &str, parameters: &[&str]) {
    declare(class, name, parameters, MethodModifiers::PUBLIC);
}

fn constructor(class: &mut ClassType, name: &str, parameters: &[&str]) {
    declare(
        class,
        name,
        parameters,
        MethodModifiers::PUBLIC | MethodModifiers::CONSTRUCTOR,
    );
}

/// Type assertion shared by the native handlers.
fn expect_tag(
    vm: &mut VirtualMachine,
    value: ObjectRef,
    tag: TypeTag,
    message: &str,
) -> bool {
    if value.tag == tag {
        return true;
    }
    vm.raise(ErrorFlags::INVALID_STACKOBJECT, message);
    vm.note(format!("expected object with type {tag}, found: {}", value.tag));
    false
}
