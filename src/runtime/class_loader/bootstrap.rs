//! The handful of `java/lang` classes a program needs before anything else
//! can run, assembled in memory. They are only consulted after the
//! configured class path, so a real runtime library takes precedence.

use crate::{
    class::{ClassWriter, MethodBody},
    consts::{
        CLINIT_DESCRIPTOR, CLINIT_NAME, FieldAccessFlag, INIT_NAME, MethodAccessFlag,
        OBJECT_CLASS, STRING_CLASS, T_BYTE,
    },
    runtime::{MemoryClassPath, instructions as inst},
};

pub const SYSTEM_CLASS: &str = "java/lang/System";
pub const PRINT_STREAM_CLASS: &str = "java/io/PrintStream";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";

/// Names of every class [`bootstrap_class_path`] provides.
pub const BOOTSTRAP_CLASSES: &[&str] = &[
    OBJECT_CLASS,
    STRING_CLASS,
    SYSTEM_CLASS,
    PRINT_STREAM_CLASS,
    THROWABLE_CLASS,
    "java/lang/Exception",
    "java/lang/RuntimeException",
    "java/lang/Error",
];

const PUBLIC: MethodAccessFlag = MethodAccessFlag::PUBLIC;

fn native() -> MethodAccessFlag {
    MethodAccessFlag::PUBLIC | MethodAccessFlag::NATIVE
}

fn static_native() -> MethodAccessFlag {
    MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC | MethodAccessFlag::NATIVE
}

fn with_index(op: u8, index: u16) -> [u8; 3] {
    let [high, low] = index.to_be_bytes();
    [op, high, low]
}

/// `aload_0; invokespecial <super>.<init>()V; return`
fn default_constructor(writer: &mut ClassWriter, super_name: &str) {
    let super_init = writer.add_method_ref(super_name, INIT_NAME, "()V");
    let mut code = vec![inst::ALOAD_0];
    code.extend(with_index(inst::INVOKESPECIAL, super_init));
    code.push(inst::RETURN);
    writer.add_method(PUBLIC, INIT_NAME, "()V", Some(MethodBody::new(1, 1, code)));
}

fn object() -> ClassWriter {
    let mut writer = ClassWriter::new(OBJECT_CLASS, None);
    writer.add_method(
        PUBLIC,
        INIT_NAME,
        "()V",
        Some(MethodBody::new(0, 1, vec![inst::RETURN])),
    );
    // this == other
    let equals = vec![
        inst::ALOAD_0,
        inst::ALOAD_1,
        inst::IF_ACMPNE,
        0x00,
        0x05,
        inst::ICONST_1,
        inst::IRETURN,
        inst::ICONST_0,
        inst::IRETURN,
    ];
    writer.add_method(
        PUBLIC,
        "equals",
        "(Ljava/lang/Object;)Z",
        Some(MethodBody::new(2, 2, equals)),
    );
    writer.add_method(native(), "hashCode", "()I", None);
    writer
}

fn string() -> ClassWriter {
    let mut writer = ClassWriter::new(STRING_CLASS, Some(OBJECT_CLASS));
    writer.add_field(FieldAccessFlag::PRIVATE | FieldAccessFlag::FINAL, "value", "[B");

    let super_init = writer.add_method_ref(OBJECT_CLASS, INIT_NAME, "()V");
    let value = writer.add_field_ref(STRING_CLASS, "value", "[B");
    let mut init = vec![inst::ALOAD_0];
    init.extend(with_index(inst::INVOKESPECIAL, super_init));
    init.extend([inst::ALOAD_0, inst::ICONST_0, inst::NEWARRAY, T_BYTE]);
    init.extend(with_index(inst::PUTFIELD, value));
    init.push(inst::RETURN);
    writer.add_method(PUBLIC, INIT_NAME, "()V", Some(MethodBody::new(3, 1, init)));

    writer.add_method(
        PUBLIC,
        "toString",
        "()Ljava/lang/String;",
        Some(MethodBody::new(1, 1, vec![inst::ALOAD_0, inst::ARETURN])),
    );
    writer.add_method(native(), "length", "()I", None);
    writer.add_method(native(), "charAt", "(I)C", None);
    writer.add_method(native(), "equals", "(Ljava/lang/Object;)Z", None);
    writer.add_method(native(), "hashCode", "()I", None);
    writer.add_method(native(), "getBytes", "()[B", None);
    writer
}

fn print_stream() -> ClassWriter {
    let mut writer = ClassWriter::new(PRINT_STREAM_CLASS, Some(OBJECT_CLASS));
    default_constructor(&mut writer, OBJECT_CLASS);
    writer.add_method(native(), "println", "()V", None);
    for argument in ["Ljava/lang/String;", "Ljava/lang/Object;", "I", "J", "Z", "C", "F", "D"] {
        let descriptor = format!("({argument})V");
        writer.add_method(native(), "println", &descriptor, None);
        writer.add_method(native(), "print", &descriptor, None);
    }
    writer
}

fn system() -> ClassWriter {
    let mut writer = ClassWriter::new(SYSTEM_CLASS, Some(OBJECT_CLASS));
    writer.add_field(
        FieldAccessFlag::PUBLIC | FieldAccessFlag::STATIC | FieldAccessFlag::FINAL,
        "out",
        "Ljava/io/PrintStream;",
    );

    // out = new PrintStream();
    let print_stream = writer.add_class(PRINT_STREAM_CLASS);
    let print_stream_init = writer.add_method_ref(PRINT_STREAM_CLASS, INIT_NAME, "()V");
    let out = writer.add_field_ref(SYSTEM_CLASS, "out", "Ljava/io/PrintStream;");
    let mut clinit = Vec::new();
    clinit.extend(with_index(inst::NEW, print_stream));
    clinit.push(inst::DUP);
    clinit.extend(with_index(inst::INVOKESPECIAL, print_stream_init));
    clinit.extend(with_index(inst::PUTSTATIC, out));
    clinit.push(inst::RETURN);
    writer.add_method(
        MethodAccessFlag::STATIC,
        CLINIT_NAME,
        CLINIT_DESCRIPTOR,
        Some(MethodBody::new(2, 0, clinit)),
    );

    writer.add_method(
        static_native(),
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        None,
    );
    writer.add_method(static_native(), "currentTimeMillis", "()J", None);
    writer.add_method(static_native(), "nanoTime", "()J", None);
    writer.add_method(
        static_native(),
        "identityHashCode",
        "(Ljava/lang/Object;)I",
        None,
    );
    writer
}

fn throwable() -> ClassWriter {
    let mut writer = ClassWriter::new(THROWABLE_CLASS, Some(OBJECT_CLASS));
    writer.add_field(FieldAccessFlag::PRIVATE, "message", "Ljava/lang/String;");
    default_constructor(&mut writer, OBJECT_CLASS);

    let super_init = writer.add_method_ref(OBJECT_CLASS, INIT_NAME, "()V");
    let message = writer.add_field_ref(THROWABLE_CLASS, "message", "Ljava/lang/String;");
    let mut init = vec![inst::ALOAD_0];
    init.extend(with_index(inst::INVOKESPECIAL, super_init));
    init.extend([inst::ALOAD_0, inst::ALOAD_1]);
    init.extend(with_index(inst::PUTFIELD, message));
    init.push(inst::RETURN);
    writer.add_method(
        PUBLIC,
        INIT_NAME,
        "(Ljava/lang/String;)V",
        Some(MethodBody::new(2, 2, init)),
    );

    let mut get_message = vec![inst::ALOAD_0];
    get_message.extend(with_index(inst::GETFIELD, message));
    get_message.push(inst::ARETURN);
    writer.add_method(
        PUBLIC,
        "getMessage",
        "()Ljava/lang/String;",
        Some(MethodBody::new(1, 1, get_message)),
    );
    writer
}

/// A throwable subclass with the two usual constructors delegating upwards.
fn throwable_subclass(name: &str, super_name: &str) -> ClassWriter {
    let mut writer = ClassWriter::new(name, Some(super_name));
    default_constructor(&mut writer, super_name);

    let super_init = writer.add_method_ref(super_name, INIT_NAME, "(Ljava/lang/String;)V");
    let mut init = vec![inst::ALOAD_0, inst::ALOAD_1];
    init.extend(with_index(inst::INVOKESPECIAL, super_init));
    init.push(inst::RETURN);
    writer.add_method(
        PUBLIC,
        INIT_NAME,
        "(Ljava/lang/String;)V",
        Some(MethodBody::new(2, 2, init)),
    );
    writer
}

pub fn bootstrap_class_path() -> MemoryClassPath {
    let mut class_path = MemoryClassPath::new();
    class_path
        .insert_class(OBJECT_CLASS, object())
        .insert_class(STRING_CLASS, string())
        .insert_class(SYSTEM_CLASS, system())
        .insert_class(PRINT_STREAM_CLASS, print_stream())
        .insert_class(THROWABLE_CLASS, throwable())
        .insert_class(
            "java/lang/Exception",
            throwable_subclass("java/lang/Exception", THROWABLE_CLASS),
        )
        .insert_class(
            "java/lang/RuntimeException",
            throwable_subclass("java/lang/RuntimeException", "java/lang/Exception"),
        )
        .insert_class(
            "java/lang/Error",
            throwable_subclass("java/lang/Error", THROWABLE_CLASS),
        );
    class_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::class_file;

    #[test]
    fn test_every_bootstrap_class_parses() {
        let class_path = bootstrap_class_path();
        assert_eq!(class_path.len(), BOOTSTRAP_CLASSES.len());
        for name in BOOTSTRAP_CLASSES {
            let bytes = crate::runtime::ClassPath::read_class(&class_path, name)
                .unwrap()
                .unwrap();
            let class = class_file(&bytes).unwrap();
            assert_eq!(&**class.name().unwrap(), *name);
        }
    }
}
