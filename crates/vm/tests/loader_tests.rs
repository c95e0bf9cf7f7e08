//! Loader-level tests: grammar validation, duplicate detection, label
//! ranges, entry-point rules, merge semantics and the serialize/reload
//! round trip.

use msl_vm::{
    serialize_assembly, AssemblyBuilder, AssemblyLoader, AttributeModifiers, ClassBuilder,
    ClassModifiers, Configuration, LoaderError, MethodBuilder, MethodModifiers, NamespaceBuilder,
    OpCode, VirtualMachine,
};

fn entry_modifiers() -> MethodModifiers {
    MethodModifiers::STATIC | MethodModifiers::PUBLIC | MethodModifiers::ENTRY_POINT
}

fn simple_entry() -> MethodBuilder {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);
    main
}

#[test]
fn duplicate_class_is_rejected() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("Twice", ClassModifiers::STATIC).method(simple_entry()))
                .class(ClassBuilder::new("Twice", ClassModifiers::STATIC)),
        )
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(
        result,
        Err(LoaderError::DeclarationDuplicate { kind: "class", .. })
    ));
}

#[test]
fn duplicate_attribute_is_rejected_across_static_and_object_tables() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main").class(
                ClassBuilder::new("Holder", ClassModifiers::empty())
                    .attribute("x", AttributeModifiers::STATIC)
                    .attribute("x", AttributeModifiers::PUBLIC),
            ),
        )
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(
        result,
        Err(LoaderError::DeclarationDuplicate {
            kind: "attribute",
            ..
        })
    ));
}

#[test]
fn duplicate_mangled_method_is_rejected() {
    let mut first = MethodBuilder::new("Same", MethodModifiers::PUBLIC | MethodModifiers::STATIC);
    first.emit(OpCode::Return);
    let mut second = MethodBuilder::new("Same", MethodModifiers::PUBLIC | MethodModifiers::STATIC);
    second.emit(OpCode::Return);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main").class(
                ClassBuilder::new("C", ClassModifiers::STATIC)
                    .method(first)
                    .method(second),
            ),
        )
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(
        result,
        Err(LoaderError::DeclarationDuplicate { kind: "method", .. })
    ));
}

#[test]
fn duplicate_namespace_is_rejected() {
    let bytes = AssemblyBuilder::new()
        .namespace(NamespaceBuilder::new("Main"))
        .namespace(NamespaceBuilder::new("Main"))
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(
        result,
        Err(LoaderError::DeclarationDuplicate {
            kind: "namespace",
            ..
        })
    ));
}

#[test]
fn second_entry_point_is_rejected() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("A", ClassModifiers::STATIC).method(simple_entry()))
                .class(ClassBuilder::new("B", ClassModifiers::STATIC).method(simple_entry())),
        )
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(result, Err(LoaderError::EntryPointDuplicate { .. })));
}

#[test]
fn label_past_body_end_is_rejected() {
    let mut method = MethodBuilder::new("Main", entry_modifiers());
    method.push_integer("0");
    method.emit(OpCode::PopToReturn);
    // A label bound after the final opcode has no byte to point at.
    let dangling = method.new_label();
    method.place_label(dangling);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(method)),
        )
        .to_bytes();
    let result = AssemblyLoader::new(true, false).load(&bytes[..]);
    assert!(matches!(result, Err(LoaderError::InvalidMethodLabel { .. })));
}

#[test]
fn merge_rejects_duplicate_namespaces() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(simple_entry())),
        )
        .to_bytes();

    let mut vm = VirtualMachine::new(Configuration::default());
    vm.load_assembly(&bytes[..]).expect("first load succeeds");
    let result = vm.load_assembly(&bytes[..]);
    assert!(matches!(
        result,
        Err(LoaderError::DeclarationDuplicate {
            kind: "namespace",
            ..
        })
    ));
}

#[test]
fn merge_disabled_rejects_second_assembly() {
    let first = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(simple_entry())),
        )
        .to_bytes();
    let second = AssemblyBuilder::new()
        .namespace(NamespaceBuilder::new("Extra"))
        .to_bytes();

    let mut config = Configuration::default();
    config.compilation.allow_assembly_merge = false;
    let mut vm = VirtualMachine::new(config);
    vm.load_assembly(&first[..]).expect("first load succeeds");
    assert!(matches!(
        vm.load_assembly(&second[..]),
        Err(LoaderError::MergeDisabled)
    ));
}

#[test]
fn missing_entry_point_rejected_without_merge() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Lib").class(ClassBuilder::new("C", ClassModifiers::STATIC)),
        )
        .to_bytes();

    let mut config = Configuration::default();
    config.compilation.allow_assembly_merge = false;
    let mut vm = VirtualMachine::new(config);
    assert!(matches!(
        vm.load_assembly(&bytes[..]),
        Err(LoaderError::MissingEntryPoint)
    ));
}

#[test]
fn entry_point_survives_merge_order() {
    // Library first, program second: the entry point is found on merge.
    let library = AssemblyBuilder::new()
        .namespace(NamespaceBuilder::new("Lib").class(ClassBuilder::new(
            "Util",
            ClassModifiers::STATIC,
        )))
        .to_bytes();
    let program = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("Lib")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(simple_entry())),
        )
        .to_bytes();

    let mut vm = VirtualMachine::new(Configuration::default());
    vm.load_assembly(&library[..]).expect("library loads");
    vm.load_assembly(&program[..]).expect("program loads");
    let status = vm.run();
    assert!(status.success(), "error word: {:?}", status.errors);
}

#[test]
fn serialize_reload_round_trip() {
    let mut helper = MethodBuilder::new("Helper", MethodModifiers::PUBLIC | MethodModifiers::STATIC)
        .param("x")
        .param("y");
    let top = helper.new_label();
    helper.place_label(top);
    helper.push_object("x");
    helper.push_object("y");
    helper.emit(OpCode::CmpL);
    helper.jump_if_true(top);
    helper.push_string("done\n");
    helper.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(
                    ClassBuilder::new("Program", ClassModifiers::STATIC)
                        .attribute("count", AttributeModifiers::STATIC | AttributeModifiers::PUBLIC)
                        .attribute("tag", AttributeModifiers::CONST)
                        .method(simple_entry())
                        .method(helper),
                ),
        )
        .to_bytes();

    let loader = AssemblyLoader::new(true, false);
    let first = loader.load(&bytes[..]).expect("first load succeeds");
    let reserialized = serialize_assembly(&first.assembly);
    let second = loader.load(&reserialized[..]).expect("reload succeeds");

    for (namespace_name, class_name, method_name) in [
        ("Main", "Program", "Main_0"),
        ("Main", "Program", "Helper_2"),
    ] {
        let original = first
            .assembly
            .method_by_path(namespace_name, class_name, method_name)
            .expect("method in original");
        let reloaded = second
            .assembly
            .method_by_path(namespace_name, class_name, method_name)
            .expect("method in reload");
        assert_eq!(original.name, reloaded.name);
        assert_eq!(original.parameters, reloaded.parameters);
        assert_eq!(original.dependencies, reloaded.dependencies);
        assert_eq!(original.body, reloaded.body);
        assert_eq!(original.labels, reloaded.labels);
        assert_eq!(original.modifiers, reloaded.modifiers);
    }

    let ns_first = first.assembly.namespace_by_name("Main").expect("namespace");
    let ns_second = second.assembly.namespace_by_name("Main").expect("namespace");
    assert_eq!(
        first.assembly.namespace(ns_first).friends,
        second.assembly.namespace(ns_second).friends
    );
    let class_first = first
        .assembly
        .class_by_name(ns_first, "Program")
        .expect("class");
    let class_second = second
        .assembly
        .class_by_name(ns_second, "Program")
        .expect("class");
    assert_eq!(
        first.assembly.class(class_first).modifiers,
        second.assembly.class(class_second).modifiers
    );
    assert_eq!(
        first.assembly.class(class_first).static_attributes,
        second.assembly.class(class_second).static_attributes
    );
    assert_eq!(
        first.assembly.class(class_first).object_attributes,
        second.assembly.class(class_second).object_attributes
    );

    assert_eq!(second.entry_point, first.entry_point);
}

#[test]
fn unverified_loading_skips_grammar_checks() {
    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(simple_entry())),
        )
        .to_bytes();
    // With verification off the well-formed stream still loads.
    let loaded = AssemblyLoader::new(false, false).load(&bytes[..]).expect("loads");
    assert!(loaded
        .assembly
        .method_by_path("Main", "Program", "Main_0")
        .is_some());
}
