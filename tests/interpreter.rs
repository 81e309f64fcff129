mod common;

use common::*;
use minijvm::{
    ExecError, LoadError, RuntimeConfig, RuntimeError,
    class::{ClassWriter, MethodBody},
    consts::{
        FieldAccessFlag, MethodAccessFlag, OBJECT_CLASS, STRING_CLASS, T_BOOLEAN, T_INT, T_LONG,
    },
    runtime::{Variable, instructions as inst},
};

fn static_method(name: &str, descriptor: &str, max_stack: u16, code: Vec<u8>) -> ClassWriter {
    let mut writer = class("Program");
    writer.add_method(STATIC, name, descriptor, Some(MethodBody::new(max_stack, 4, code)));
    writer
}

fn call_int(writer: ClassWriter, name: &str, descriptor: &str) -> Result<i32, RuntimeError> {
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let result = runtime.invoke_static("Program", name, descriptor, &[])?;
    assert_eq!(result.len(), 1);
    Ok(result[0].as_int())
}

#[test]
fn test_add_and_return() {
    let writer = static_method(
        "add",
        "()I",
        2,
        vec![inst::ICONST_2, inst::ICONST_3, inst::IADD, inst::IRETURN],
    );
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let result = runtime.invoke_static("Program", "add", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(5)]);
    assert_eq!(runtime.thread().depth(), 0);
}

#[test]
fn test_long_result_takes_two_slots() {
    let mut writer = class("Program");
    let big = writer.add_long(1 << 40);
    let mut code = indexed(inst::LDC2_W, big).to_vec();
    code.extend([inst::LCONST_1, inst::LADD, inst::LRETURN]);
    writer.add_method(STATIC, "big", "()J", Some(MethodBody::new(4, 0, code)));

    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let result = runtime.invoke_static("Program", "big", "()J", &[]).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(Variable::get_long(result[0], result[1]), (1 << 40) + 1);
}

#[test]
fn test_wide_argument_shifts_following_locals() {
    // (IJI)I: the second int lives in local 3
    let writer = static_method(
        "skip",
        "(IJI)I",
        2,
        vec![inst::ILOAD_0, inst::ILOAD_3, inst::IADD, inst::IRETURN],
    );
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let (upper, lower) = Variable::put_long(-1);
    let args = [Variable::int(4), upper, lower, Variable::int(5)];
    let result = runtime.invoke_static("Program", "skip", "(IJI)I", &args).unwrap();
    assert_eq!(result, vec![Variable::int(9)]);
}

#[test]
fn test_counting_loop() {
    let mut code = vec![
        inst::ICONST_0,
        inst::ISTORE_0,
        inst::ICONST_1,
        inst::ISTORE_1,
        // 4: sum += i
        inst::ILOAD_0,
        inst::ILOAD_1,
        inst::IADD,
        inst::ISTORE_0,
        inst::IINC,
        1,
        1,
        inst::ILOAD_1,
        inst::BIPUSH,
        10,
    ];
    // 14: back to 4 while i <= 10
    code.extend(branch(inst::IF_ICMPLE, -10));
    code.extend([inst::ILOAD_0, inst::IRETURN]);
    assert_eq!(call_int(static_method("sum", "()I", 2, code), "sum", "()I").unwrap(), 55);
}

#[test]
fn test_tableswitch() {
    // tableswitch at pc 1, operands padded to pc 4, ends at 24
    let mut code = vec![inst::ILOAD_0, inst::TABLESWITCH, 0, 0];
    // default, low, high, then the jump offsets relative to pc 1
    for value in [29i32, 1, 2, 23, 26] {
        code.extend(value.to_be_bytes());
    }
    code.extend([inst::BIPUSH, 10, inst::IRETURN]);
    code.extend([inst::BIPUSH, 20, inst::IRETURN]);
    code.extend([inst::BIPUSH, 99, inst::IRETURN]);
    let writer = static_method("pick", "(I)I", 1, code);

    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let mut pick = |value: i32| {
        runtime
            .invoke_static("Program", "pick", "(I)I", &[Variable::int(value)])
            .unwrap()[0]
            .as_int()
    };
    assert_eq!(pick(0), 99);
    assert_eq!(pick(1), 10);
    assert_eq!(pick(2), 20);
    assert_eq!(pick(7), 99);
}

#[test]
fn test_nan_comparisons() {
    let nan = [inst::FCONST_0, inst::FCONST_0, inst::FDIV, inst::FCONST_1];
    let mut greater = nan.to_vec();
    greater.extend([inst::FCMPG, inst::IRETURN]);
    let mut less = nan.to_vec();
    less.extend([inst::FCMPL, inst::IRETURN]);
    assert_eq!(call_int(static_method("cmp", "()I", 3, greater), "cmp", "()I").unwrap(), 1);
    assert_eq!(call_int(static_method("cmp", "()I", 3, less), "cmp", "()I").unwrap(), -1);
}

#[test]
fn test_integer_division_by_zero_is_fatal() {
    let writer = static_method(
        "div",
        "()I",
        2,
        vec![inst::ICONST_1, inst::ICONST_0, inst::IDIV, inst::IRETURN],
    );
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let err = runtime.invoke_static("Program", "div", "()I", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Exec(ExecError::DivisionByZero)));
    assert_eq!(runtime.thread().depth(), 0);
}

#[test]
fn test_integer_overflow_wraps() {
    let mut writer = class("Program");
    let max = writer.add_integer(i32::MAX);
    let mut code = indexed(inst::LDC_W, max).to_vec();
    code.extend([inst::ICONST_1, inst::IADD, inst::IRETURN]);
    writer.add_method(STATIC, "wrap", "()I", Some(MethodBody::new(2, 0, code)));
    assert_eq!(call_int(writer, "wrap", "()I").unwrap(), i32::MIN);
}

/// `new ArithError` at pc 2 and `athrow` at pc 5 with two ints still on the
/// stack, covered by a handler for [2, 10) at 20 catching `catch_type`.
fn thrower(catch_type: &str) -> ClassWriter {
    let mut writer = class("Program");
    let error = writer.add_class("ArithError");
    let catch_index = writer.add_class(catch_type);
    let mut code = vec![inst::ICONST_1, inst::ICONST_2];
    code.extend(indexed(inst::NEW, error));
    code.push(inst::ATHROW);
    code.resize(20, inst::NOP);
    code.extend([inst::POP, inst::BIPUSH, 7, inst::IRETURN]);
    let body = MethodBody::new(3, 0, code).with_handler(2, 10, 20, catch_index);
    writer.add_method(STATIC, "inner", "()I", Some(body));

    // outer catches ArithError around its call to inner
    let inner = writer.add_method_ref("Program", "inner", "()I");
    let mut code = indexed(inst::INVOKESTATIC, inner).to_vec();
    code.push(inst::IRETURN);
    code.extend([inst::POP, inst::BIPUSH, 9, inst::IRETURN]);
    let body = MethodBody::new(1, 0, code).with_handler(0, 3, 4, error);
    writer.add_method(STATIC, "outer", "()I", Some(body));
    writer
}

fn arith_error() -> ClassWriter {
    ClassWriter::new("ArithError", Some("java/lang/RuntimeException"))
}

#[test]
fn test_handler_catches_within_range() {
    let (mut runtime, _) = runtime(vec![
        ("Program", thrower("ArithError")),
        ("ArithError", arith_error()),
    ]);
    let result = runtime.invoke_static("Program", "outer", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(7)]);
}

#[test]
fn test_handler_catches_superclass() {
    let (mut runtime, _) = runtime(vec![
        ("Program", thrower("java/lang/Exception")),
        ("ArithError", arith_error()),
    ]);
    let result = runtime.invoke_static("Program", "outer", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(7)]);
}

#[test]
fn test_unrelated_handler_propagates_to_caller() {
    let (mut runtime, _) = runtime(vec![
        ("Program", thrower("OtherError")),
        ("ArithError", arith_error()),
    ]);
    let result = runtime.invoke_static("Program", "outer", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(9)]);
}

#[test]
fn test_uncaught_exception_empties_the_stack() {
    let (mut runtime, _) = runtime(vec![
        ("Program", thrower("OtherError")),
        ("ArithError", arith_error()),
    ]);
    let err = runtime.invoke_static("Program", "inner", "()I", &[]).unwrap_err();
    match err {
        RuntimeError::Uncaught { class_name, .. } => assert_eq!(class_name, "ArithError"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(runtime.thread().depth(), 0);
}

fn hello() -> ClassWriter {
    let mut writer = class("Hello");
    let out = writer.add_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let println_string =
        writer.add_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
    let println_int = writer.add_method_ref("java/io/PrintStream", "println", "(I)V");
    let greeting = writer.add_string("hello");

    let mut code = indexed(inst::GETSTATIC, out).to_vec();
    code.extend([inst::LDC, greeting as u8]);
    code.extend(indexed(inst::INVOKEVIRTUAL, println_string));
    code.extend(indexed(inst::GETSTATIC, out));
    code.extend([inst::BIPUSH, 42]);
    code.extend(indexed(inst::INVOKEVIRTUAL, println_int));
    // println(args[0])
    code.extend(indexed(inst::GETSTATIC, out));
    code.extend([inst::ALOAD_0, inst::ICONST_0, inst::AALOAD]);
    code.extend(indexed(inst::INVOKEVIRTUAL, println_string));
    code.push(inst::RETURN);
    writer.add_method(
        STATIC,
        "main",
        "([Ljava/lang/String;)V",
        Some(MethodBody::new(3, 1, code)),
    );
    writer
}

#[test]
fn test_main_prints_through_system_out() {
    let (mut runtime, output) = runtime(vec![("Hello", hello())]);
    runtime.run_main("Hello", &["world".to_string()]).unwrap();
    assert_eq!(output.text(), "hello\n42\nworld\n");
}

#[test]
fn test_missing_main() {
    let (mut runtime, _) = runtime(vec![("Empty", class("Empty"))]);
    let err = runtime.run_main("Empty", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::MainNotFound(name) if name == "Empty"));
}

#[test]
fn test_string_natives() {
    let mut writer = class("Program");
    let text = writer.add_string("hello");
    let length = writer.add_method_ref(STRING_CLASS, "length", "()I");
    let char_at = writer.add_method_ref(STRING_CLASS, "charAt", "(I)C");

    let mut code = vec![inst::LDC, text as u8];
    code.extend(indexed(inst::INVOKEVIRTUAL, length));
    code.extend([inst::LDC, text as u8, inst::ICONST_1]);
    code.extend(indexed(inst::INVOKEVIRTUAL, char_at));
    code.extend([inst::IADD, inst::IRETURN]);
    writer.add_method(STATIC, "measure", "()I", Some(MethodBody::new(3, 0, code)));

    assert_eq!(call_int(writer, "measure", "()I").unwrap(), 5 + 'e' as i32);
}

#[test]
fn test_static_initializers_run_superclass_first() {
    let mut base = class("Base");
    base.add_field(FieldAccessFlag::STATIC, "log", "I");
    let log = base.add_field_ref("Base", "log", "I");
    let mut code = vec![inst::ICONST_1];
    code.extend(indexed(inst::PUTSTATIC, log));
    code.push(inst::RETURN);
    base.add_method(
        MethodAccessFlag::STATIC,
        "<clinit>",
        "()V",
        Some(MethodBody::new(1, 0, code)),
    );

    let mut derived = ClassWriter::new("Derived", Some("Base"));
    derived.add_field(FieldAccessFlag::STATIC, "x", "I");
    let log = derived.add_field_ref("Base", "log", "I");
    // log = log * 10 + 2
    let mut code = indexed(inst::GETSTATIC, log).to_vec();
    code.extend([inst::BIPUSH, 10, inst::IMUL, inst::ICONST_2, inst::IADD]);
    code.extend(indexed(inst::PUTSTATIC, log));
    code.push(inst::RETURN);
    derived.add_method(
        MethodAccessFlag::STATIC,
        "<clinit>",
        "()V",
        Some(MethodBody::new(2, 0, code)),
    );

    let mut program = class("Program");
    let x = program.add_field_ref("Derived", "x", "I");
    let log = program.add_field_ref("Base", "log", "I");
    let mut code = indexed(inst::GETSTATIC, x).to_vec();
    code.push(inst::POP);
    code.extend(indexed(inst::GETSTATIC, log));
    code.push(inst::IRETURN);
    program.add_method(STATIC, "order", "()I", Some(MethodBody::new(1, 0, code)));

    let (mut runtime, _) = runtime(vec![
        ("Program", program),
        ("Base", base),
        ("Derived", derived),
    ]);
    let result = runtime.invoke_static("Program", "order", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(12)]);
}

fn sound(value: u8) -> Option<MethodBody> {
    Some(MethodBody::new(1, 1, vec![inst::BIPUSH, value, inst::IRETURN]))
}

#[test]
fn test_invokevirtual_dispatches_on_receiver_class() {
    let mut animal = class("Animal");
    add_constructor(&mut animal, OBJECT_CLASS);
    animal.add_method(MethodAccessFlag::PUBLIC, "sound", "()I", sound(1));
    let mut dog = ClassWriter::new("Dog", Some("Animal"));
    add_constructor(&mut dog, "Animal");
    dog.add_method(MethodAccessFlag::PUBLIC, "sound", "()I", sound(2));

    let mut program = class("Program");
    let dog_class = program.add_class("Dog");
    let dog_init = program.add_method_ref("Dog", "<init>", "()V");
    let animal_sound = program.add_method_ref("Animal", "sound", "()I");
    let mut code = indexed(inst::NEW, dog_class).to_vec();
    code.push(inst::DUP);
    code.extend(indexed(inst::INVOKESPECIAL, dog_init));
    code.extend(indexed(inst::INVOKEVIRTUAL, animal_sound));
    code.push(inst::IRETURN);
    program.add_method(STATIC, "speak", "()I", Some(MethodBody::new(2, 0, code)));

    let (mut runtime, _) = runtime(vec![
        ("Program", program),
        ("Animal", animal),
        ("Dog", dog),
    ]);
    let result = runtime.invoke_static("Program", "speak", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(2)]);
}

#[test]
fn test_instance_fields_and_instanceof() {
    let mut point = class("Point");
    add_constructor(&mut point, OBJECT_CLASS);
    point.add_field(FieldAccessFlag::PUBLIC, "y", "J");

    let mut program = class("Program");
    let point_class = program.add_class("Point");
    let point_init = program.add_method_ref("Point", "<init>", "()V");
    let y = program.add_field_ref("Point", "y", "J");
    let string_class = program.add_class(STRING_CLASS);
    let mut code = indexed(inst::NEW, point_class).to_vec();
    code.push(inst::DUP);
    code.extend(indexed(inst::INVOKESPECIAL, point_init));
    code.push(inst::ASTORE_0);
    code.extend([inst::ALOAD_0, inst::LCONST_1]);
    code.extend(indexed(inst::PUTFIELD, y));
    code.push(inst::ALOAD_0);
    code.extend(indexed(inst::GETFIELD, y));
    code.push(inst::L2I);
    // + (point instanceof Point) + (point instanceof String)
    code.push(inst::ALOAD_0);
    code.extend(indexed(inst::INSTANCEOF, point_class));
    code.push(inst::IADD);
    code.push(inst::ALOAD_0);
    code.extend(indexed(inst::INSTANCEOF, string_class));
    code.extend([inst::IADD, inst::IRETURN]);
    program.add_method(STATIC, "fields", "()I", Some(MethodBody::new(4, 1, code)));

    let (mut runtime, _) = runtime(vec![("Program", program), ("Point", point)]);
    let result = runtime.invoke_static("Program", "fields", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(2)]);
}

#[test]
fn test_covariant_array_store() {
    let mut program = class("Program");
    let object = program.add_class(OBJECT_CLASS);
    let string = program.add_class(STRING_CLASS);
    let text = program.add_string("x");

    // Object[] accepts a String
    let mut code = vec![inst::ICONST_1];
    code.extend(indexed(inst::ANEWARRAY, object));
    code.extend([inst::DUP, inst::ICONST_0, inst::LDC, text as u8, inst::AASTORE]);
    code.extend([inst::ARRAYLENGTH, inst::IRETURN]);
    program.add_method(STATIC, "widen", "()I", Some(MethodBody::new(4, 0, code)));

    // String[] rejects an Object
    let mut code = vec![inst::ICONST_1];
    code.extend(indexed(inst::ANEWARRAY, string));
    code.push(inst::ICONST_0);
    code.extend(indexed(inst::NEW, object));
    code.extend([inst::AASTORE, inst::RETURN]);
    program.add_method(STATIC, "narrow", "()V", Some(MethodBody::new(3, 0, code)));

    let (mut runtime, _) = runtime(vec![("Program", program)]);
    let result = runtime.invoke_static("Program", "widen", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(1)]);
    let err = runtime.invoke_static("Program", "narrow", "()V", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Exec(ExecError::ArrayStore { .. })));
}

#[test]
fn test_array_index_out_of_bounds() {
    let code = vec![
        inst::ICONST_2,
        inst::NEWARRAY,
        T_INT,
        inst::ICONST_2,
        inst::IALOAD,
        inst::IRETURN,
    ];
    let err = call_int(static_method("index", "()I", 2, code), "index", "()I").unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Exec(ExecError::ArrayIndexOutOfBounds { index: 2, length: 2 })
    ));
}

#[test]
fn test_recursion_limit() {
    let mut writer = class("Program");
    let recurse = writer.add_method_ref("Program", "recurse", "()V");
    let mut code = indexed(inst::INVOKESTATIC, recurse).to_vec();
    code.push(inst::RETURN);
    writer.add_method(STATIC, "recurse", "()V", Some(MethodBody::new(0, 0, code)));

    let config = RuntimeConfig {
        max_call_depth: 64,
        ..RuntimeConfig::default()
    };
    let (mut runtime, _) = runtime_with_config(config, vec![("Program", writer)]);
    let err = runtime.invoke_static("Program", "recurse", "()V", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Exec(ExecError::StackOverflow(64))));
    assert_eq!(runtime.thread().depth(), 0);
}

#[test]
fn test_unknown_opcode() {
    let writer = static_method("bad", "()V", 0, vec![inst::NOP, inst::BREAKPOINT]);
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    let err = runtime.invoke_static("Program", "bad", "()V", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Exec(ExecError::UnknownOpcode { opcode: 0xca, pc: 1 })
    ));
}

#[test]
fn test_handler_starts_with_only_the_exception() {
    // the handler adds whatever sits below the exception to 7
    let mut writer = class("Program");
    let error = writer.add_class("ArithError");
    let mut code = vec![inst::ICONST_1, inst::ICONST_2];
    code.extend(indexed(inst::NEW, error));
    code.push(inst::ATHROW);
    code.extend([inst::POP, inst::BIPUSH, 7, inst::IADD, inst::IRETURN]);
    let body = MethodBody::new(3, 0, code).with_handler(2, 6, 6, error);
    writer.add_method(STATIC, "leftovers", "()I", Some(body));

    let (mut runtime, _) = runtime(vec![
        ("Program", writer),
        ("ArithError", arith_error()),
    ]);
    let err = runtime.invoke_static("Program", "leftovers", "()I", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Exec(ExecError::StackUnderflow)));
}

fn run_code(descriptor: &str, max_stack: u16, code: Vec<u8>) -> Result<Vec<Variable>, RuntimeError> {
    let writer = static_method("run", descriptor, max_stack, code);
    let (mut runtime, _) = runtime(vec![("Program", writer)]);
    runtime.invoke_static("Program", "run", descriptor, &[])
}

#[test]
fn test_array_opcode_must_match_element_type() {
    // iastore into a long[]
    let code = vec![
        inst::ICONST_1,
        inst::NEWARRAY,
        T_LONG,
        inst::ICONST_0,
        inst::ICONST_5,
        inst::IASTORE,
        inst::RETURN,
    ];
    let err = run_code("()V", 3, code).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Exec(ExecError::ArrayElementType { opcode: inst::IASTORE, .. })
    ));

    // lastore into an int[]
    let code = vec![
        inst::ICONST_1,
        inst::NEWARRAY,
        T_INT,
        inst::ICONST_0,
        inst::LCONST_1,
        inst::LASTORE,
        inst::RETURN,
    ];
    let err = run_code("()V", 4, code).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Exec(ExecError::ArrayElementType { opcode: inst::LASTORE, .. })
    ));

    // iaload from a long[]
    let code = vec![
        inst::ICONST_1,
        inst::NEWARRAY,
        T_LONG,
        inst::ICONST_0,
        inst::IALOAD,
        inst::IRETURN,
    ];
    let err = run_code("()I", 2, code).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Exec(ExecError::ArrayElementType { opcode: inst::IALOAD, .. })
    ));
}

#[test]
fn test_byte_opcodes_serve_boolean_arrays() {
    let code = vec![
        inst::ICONST_1,
        inst::NEWARRAY,
        T_BOOLEAN,
        inst::DUP,
        inst::ICONST_0,
        inst::ICONST_1,
        inst::BASTORE,
        inst::ICONST_0,
        inst::BALOAD,
        inst::IRETURN,
    ];
    assert_eq!(run_code("()I", 4, code).unwrap(), vec![Variable::int(1)]);
}

#[test]
fn test_failed_subclass_load_keeps_superclass_initializer() {
    let mut base = class("Base");
    base.add_field(FieldAccessFlag::STATIC, "x", "I");
    let x = base.add_field_ref("Base", "x", "I");
    let mut code = vec![inst::BIPUSH, 7];
    code.extend(indexed(inst::PUTSTATIC, x));
    code.push(inst::RETURN);
    base.add_method(
        MethodAccessFlag::STATIC,
        "<clinit>",
        "()V",
        Some(MethodBody::new(1, 0, code)),
    );
    let mut code = indexed(inst::GETSTATIC, x).to_vec();
    code.push(inst::IRETURN);
    base.add_method(STATIC, "get", "()I", Some(MethodBody::new(1, 0, code)));

    let mut derived = ClassWriter::new("Derived", Some("Base"));
    derived.add_field(FieldAccessFlag::empty(), "bad", "Q");

    let (mut runtime, _) = runtime(vec![("Base", base), ("Derived", derived)]);
    let err = runtime.load_class("Derived").unwrap_err();
    assert!(matches!(err, LoadError::InvalidDescriptor { .. }));
    assert!(runtime.method_area().contains("Base"));
    assert_eq!(runtime.thread().depth(), 0);

    let result = runtime.invoke_static("Base", "get", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(7)]);
}
