//! End-to-end execution tests: assemblies are built in memory, run with
//! captured streams, and asserted on exit code, stdout and the error word.

mod common;

use common::{run_assembly, run_assembly_with_input};
use msl_vm::{
    AssemblyBuilder, AttributeModifiers, ClassBuilder, ClassModifiers, ErrorFlags, MethodBuilder,
    MethodModifiers, MslInt, NamespaceBuilder, OpCode,
};

fn entry_modifiers() -> MethodModifiers {
    MethodModifiers::STATIC | MethodModifiers::PUBLIC | MethodModifiers::ENTRY_POINT
}

fn static_public() -> MethodModifiers {
    MethodModifiers::STATIC | MethodModifiers::PUBLIC
}

/// Single-class program: wraps `main` into namespace `Main`, class `Program`.
fn program(main: MethodBuilder) -> Vec<u8> {
    AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes()
}

#[test]
fn arithmetic_precedence() {
    // return 2 + 3 * 4;
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_integer("2");
    main.push_integer("3");
    main.push_integer("4");
    main.emit(OpCode::MultOp);
    main.emit(OpCode::SumOp);
    main.emit(OpCode::PopToReturn);

    let (status, stdout, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(14i64)));
    assert_eq!(stdout, "");
}

#[test]
fn string_repeat_prints() {
    // Console.Print("ab" * 3); return 0;
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("Console");
    main.push_string("ab");
    main.push_integer("3");
    main.emit(OpCode::MultOp);
    main.call("Print_1", 1);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let (status, stdout, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(0i64)));
    assert_eq!(stdout, "ababab");
}

#[test]
fn recursive_factorial() {
    // static Fact(n) { if (n < 2) return 1; return n * Fact(n - 1); }
    let mut fact = MethodBuilder::new("Fact", static_public()).param("n");
    let recurse = fact.new_label();
    fact.push_object("n");
    fact.push_integer("2");
    fact.emit(OpCode::CmpL);
    fact.jump_if_false(recurse);
    fact.push_integer("1");
    fact.emit(OpCode::PopToReturn);
    fact.place_label(recurse);
    fact.push_object("n");
    fact.emit(OpCode::PushThis);
    fact.push_object("n");
    fact.push_integer("1");
    fact.emit(OpCode::SubOp);
    fact.call("Fact_1", 1);
    fact.emit(OpCode::MultOp);
    fact.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.emit(OpCode::PushThis);
    main.push_integer("5");
    main.call("Fact_1", 1);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main").friend("System").class(
                ClassBuilder::new("Program", ClassModifiers::STATIC)
                    .method(fact)
                    .method(main),
            ),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(120i64)));
}

#[test]
fn const_guard_rejects_reassignment() {
    // const var x = 1; x = 2; return 0;
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_const_var("x");
    main.push_integer("1");
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    main.push_object("x");
    main.push_integer("2");
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let (status, _, stderr) = run_assembly(&program(main));
    assert!(status.errors.contains(ErrorFlags::CONST_MEMBER_MODIFICATION));
    assert_eq!(status.exit_code, None);
    assert!(stderr.contains("const"));
}

#[test]
fn array_append_pop_size() {
    // var a = Array(); a.Append(10); a.Append(20); a.Pop(); return a.Size();
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_var("a");
    main.push_object("Array");
    main.call("Array_0", 0);
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);

    main.push_object("a");
    main.push_integer("10");
    main.call("Append_1", 1);
    main.emit(OpCode::PopStackTop);

    main.push_object("a");
    main.push_integer("20");
    main.call("Append_1", 1);
    main.emit(OpCode::PopStackTop);

    main.push_object("a");
    main.call("Pop_0", 0);
    main.emit(OpCode::PopStackTop);

    main.push_object("a");
    main.call("Size_0", 0);
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(1i64)));
}

#[test]
fn dispatch_across_namespaces() {
    // namespace A { class C { static Main() { return B.D.Val(); } } }
    // namespace B { class D { public static Val() { return 7; } } }
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("B");
    main.push_object("D");
    main.emit(OpCode::GetMember);
    main.call("Val_0", 0);
    main.emit(OpCode::PopToReturn);

    let mut val = MethodBuilder::new("Val", static_public());
    val.push_integer("7");
    val.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("A")
                .friend("B")
                .class(ClassBuilder::new("C", ClassModifiers::STATIC).method(main)),
        )
        .namespace(
            NamespaceBuilder::new("B")
                .class(ClassBuilder::new("D", ClassModifiers::STATIC).method(val)),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(7i64)));
}

#[test]
fn null_return_is_exit_code_zero() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.emit(OpCode::PushNull);
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success());
    assert_eq!(status.exit_code, Some(MslInt::from(0i64)));
}

#[test]
fn loop_with_alu_increment() {
    // var i = 1; var s = 0; while (i <= 5) { s += i; i += 1; } return s;
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_var("i");
    main.push_integer("1");
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    main.alloc_var("s");
    main.push_integer("0");
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);

    let top = main.new_label();
    let done = main.new_label();
    main.place_label(top);
    main.push_object("i");
    main.push_integer("5");
    main.emit(OpCode::CmpLe);
    main.jump_if_false(done);

    main.push_object("s");
    main.push_object("i");
    main.emit(OpCode::SetAluIncr);
    main.emit(OpCode::SumOp);
    main.emit(OpCode::PopStackTop);

    main.push_object("i");
    main.push_integer("1");
    main.emit(OpCode::SetAluIncr);
    main.emit(OpCode::SumOp);
    main.emit(OpCode::PopStackTop);

    main.jump(top);
    main.place_label(done);
    main.push_object("s");
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(15i64)));
}

#[test]
fn static_constructor_runs_once_before_use() {
    // class Counter { static var value; static Counter() { value = 41; }
    //                 public static Get() { return value + 1; } }
    let mut static_ctor = MethodBuilder::new(
        "Counter",
        MethodModifiers::STATIC | MethodModifiers::STATIC_CONSTRUCTOR | MethodModifiers::PUBLIC,
    );
    static_ctor.push_object("value");
    static_ctor.push_integer("41");
    static_ctor.emit(OpCode::AssignOp);
    static_ctor.emit(OpCode::PopStackTop);
    static_ctor.emit(OpCode::Return);

    let mut get = MethodBuilder::new("Get", static_public());
    get.push_object("value");
    get.push_integer("1");
    get.emit(OpCode::SumOp);
    get.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("Counter");
    main.call("Get_0", 0);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(
                    ClassBuilder::new(
                        "Counter",
                        ClassModifiers::STATIC | ClassModifiers::HAS_STATIC_CONSTRUCTOR,
                    )
                    .attribute(
                        "value",
                        AttributeModifiers::STATIC | AttributeModifiers::PUBLIC,
                    )
                    .method(static_ctor)
                    .method(get),
                )
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(42i64)));
}

#[test]
fn constructor_and_instance_method() {
    // class Point { Point() {} public Val(this) { return 9; } }
    let mut ctor = MethodBuilder::new(
        "Point",
        MethodModifiers::PUBLIC | MethodModifiers::CONSTRUCTOR,
    );
    ctor.emit(OpCode::Return);

    let mut val = MethodBuilder::new("Val", MethodModifiers::PUBLIC).param("this");
    val.push_integer("9");
    val.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_var("p");
    main.push_object("Point");
    main.call("Point_0", 0);
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    main.push_object("p");
    main.call("Val_0", 0);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(
                    ClassBuilder::new("Point", ClassModifiers::empty())
                        .method(ctor)
                        .method(val),
                )
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(9i64)));
}

#[test]
fn print_line_delegates_to_to_string() {
    // class Greeter { Greeter() {} public ToString(this) { return "hi"; } }
    let mut ctor = MethodBuilder::new(
        "Greeter",
        MethodModifiers::PUBLIC | MethodModifiers::CONSTRUCTOR,
    );
    ctor.emit(OpCode::Return);

    let mut to_string = MethodBuilder::new("ToString", MethodModifiers::PUBLIC).param("this");
    to_string.push_string("hi");
    to_string.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("Console");
    main.push_object("Greeter");
    main.call("Greeter_0", 0);
    main.call("PrintLine_1", 1);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(
                    ClassBuilder::new("Greeter", ClassModifiers::empty())
                        .method(ctor)
                        .method(to_string),
                )
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes();
    let (status, stdout, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(stdout, "hi\n");
}

#[test]
fn private_method_rejected_across_classes() {
    let mut secret = MethodBuilder::new("Secret", MethodModifiers::STATIC);
    secret.push_integer("1");
    secret.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("Vault");
    main.call("Secret_0", 0);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(ClassBuilder::new("Vault", ClassModifiers::STATIC).method(secret))
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.errors.contains(ErrorFlags::PRIVATE_MEMBER_ACCESS));
}

#[test]
fn unresolved_name_sets_object_not_found() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("nowhere");
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let (status, _, stderr) = run_assembly(&program(main));
    assert!(status.errors.contains(ErrorFlags::OBJECT_NOT_FOUND));
    assert!(stderr.contains("nowhere"));
}

#[test]
fn math_sqrt_on_floats() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    let bad = main.new_label();
    main.push_object("Math");
    main.push_float("9.0");
    main.call("Sqrt_1", 1);
    main.push_float("3.0");
    main.emit(OpCode::CmpEq);
    main.jump_if_false(bad);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);
    main.place_label(bad);
    main.push_integer("1");
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(0i64)));
}

#[test]
fn string_indexing_through_get_index() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    let bad = main.new_label();
    main.push_integer("1");
    main.push_string("abc");
    main.emit(OpCode::GetIndex);
    main.push_string("b");
    main.emit(OpCode::CmpEq);
    main.jump_if_false(bad);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);
    main.place_label(bad);
    main.push_integer("1");
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(0i64)));
}

#[test]
fn gc_collect_is_callable_from_script() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("GC");
    main.call("Collect_0", 0);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(0i64)));
}

#[test]
fn gc_reconfiguration_rejected_in_safe_mode() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("GC");
    main.call("Disable_0", 0);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.emit(OpCode::PopToReturn);

    let stdout = common::SharedBuffer::new();
    let stderr = common::SharedBuffer::new();
    let mut config = msl_vm::Configuration::default();
    config.execution.safe_mode = true;
    config.streams.output = Some(Box::new(stdout.clone()));
    config.streams.error = Some(Box::new(stderr.clone()));

    let mut vm = msl_vm::VirtualMachine::new(config);
    vm.load_assembly(&program(main)[..]).expect("assembly loads");
    let status = vm.run();
    assert!(status.errors.contains(ErrorFlags::INVALID_METHOD_CALL));
}

#[test]
fn console_read_int_round_trip() {
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.push_object("Console");
    main.call("ReadInt_0", 0);
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly_with_input(&program(main), "37\n");
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(37i64)));
}

#[test]
fn reflection_create_instance_and_invoke_path() {
    let mut ctor = MethodBuilder::new(
        "Point",
        MethodModifiers::PUBLIC | MethodModifiers::CONSTRUCTOR,
    );
    ctor.emit(OpCode::Return);

    let mut val = MethodBuilder::new("Val", MethodModifiers::PUBLIC).param("this");
    val.push_integer("9");
    val.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_var("p");
    main.push_object("Reflection");
    main.push_object("Point");
    main.call("CreateInstance_1", 1);
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    main.push_object("p");
    main.call("Val_0", 0);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main")
                .friend("System")
                .class(
                    ClassBuilder::new("Point", ClassModifiers::empty())
                        .method(ctor)
                        .method(val),
                )
                .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
        )
        .to_bytes();
    let (status, _, _) = run_assembly(&bytes);
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(9i64)));
}

#[test]
fn array_sort_orders_integers() {
    // var a = Array(); append 3, 1, 2; sort; return a[0];
    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.alloc_var("a");
    main.push_object("Array");
    main.call("Array_0", 0);
    main.emit(OpCode::AssignOp);
    main.emit(OpCode::PopStackTop);
    for literal in ["3", "1", "2"] {
        main.push_object("a");
        main.push_integer(literal);
        main.call("Append_1", 1);
        main.emit(OpCode::PopStackTop);
    }
    main.push_object("a");
    main.call("Sort_0", 0);
    main.emit(OpCode::PopStackTop);
    main.push_integer("0");
    main.push_object("a");
    main.emit(OpCode::GetIndex);
    // The subscript yields an assignable cell; add zero to read the value out.
    main.push_integer("0");
    main.emit(OpCode::SumOp);
    main.emit(OpCode::PopToReturn);

    let (status, _, _) = run_assembly(&program(main));
    assert!(status.success(), "error word: {:?}", status.errors);
    assert_eq!(status.exit_code, Some(MslInt::from(1i64)));
}

#[test]
fn stack_overflow_on_unbounded_recursion() {
    let mut forever = MethodBuilder::new("Forever", static_public());
    forever.emit(OpCode::PushThis);
    forever.call("Forever_0", 0);
    forever.emit(OpCode::PopToReturn);

    let mut main = MethodBuilder::new("Main", entry_modifiers());
    main.emit(OpCode::PushThis);
    main.call("Forever_0", 0);
    main.emit(OpCode::PopToReturn);

    let bytes = AssemblyBuilder::new()
        .namespace(
            NamespaceBuilder::new("Main").friend("System").class(
                ClassBuilder::new("Program", ClassModifiers::STATIC)
                    .method(forever)
                    .method(main),
            ),
        )
        .to_bytes();

    let mut config = msl_vm::Configuration::default();
    config.execution.recursion_limit = 64;
    let mut vm = msl_vm::VirtualMachine::new(config);
    vm.load_assembly(&bytes[..]).expect("assembly loads");
    let status = vm.run();
    assert!(status.errors.contains(ErrorFlags::STACKOVERFLOW));
}
