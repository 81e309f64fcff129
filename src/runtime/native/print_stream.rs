use std::io::Write;

use crate::{
    consts::STRING_CLASS,
    error::ExecError,
    runtime::{
        Heap, NativeEnv, NativeResult, NativeVariable, Reference,
        native::{NativeRegistry, java_float_string, java_number_string},
    },
};

const PRINT_STREAM_CLASS: &str = "java/io/PrintStream";

/// `String.valueOf` for the argument of a print call. Index 0 is the stream.
fn render(env: &NativeEnv) -> Result<String, ExecError> {
    let Some(value) = env.args.get(1) else {
        return Ok(String::new());
    };
    Ok(match *value {
        NativeVariable::Boolean(value) => value.to_string(),
        NativeVariable::Byte(value) => value.to_string(),
        NativeVariable::Short(value) => value.to_string(),
        NativeVariable::Int(value) => value.to_string(),
        NativeVariable::Long(value) => value.to_string(),
        NativeVariable::Char(value) => char::decode_utf16([value])
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
        NativeVariable::Float(value) => java_float_string(value),
        NativeVariable::Double(value) => java_number_string(value),
        NativeVariable::Reference(reference) => render_reference(&*env.heap, reference)?,
    })
}

fn render_reference(heap: &Heap, reference: Reference) -> Result<String, ExecError> {
    if reference.is_null() {
        return Ok("null".to_string());
    }
    let class_name = heap.class_name(reference)?;
    if class_name == STRING_CLASS {
        return heap.read_string(reference);
    }
    Ok(format!(
        "{}@{:x}",
        class_name.replace('/', "."),
        reference.id()
    ))
}

fn write_out(env: NativeEnv, newline: bool) -> NativeResult<Option<NativeVariable>> {
    let text = render(&env)?;
    if newline {
        writeln!(env.out, "{text}").map_err(ExecError::Output)?;
    } else {
        write!(env.out, "{text}").map_err(ExecError::Output)?;
    }
    Ok(None)
}

fn native_println(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    write_out(env, true)
}

fn native_print(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    write_out(env, false)
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(PRINT_STREAM_CLASS, "println", "()V", native_println);
    for argument in ["Ljava/lang/String;", "Ljava/lang/Object;", "I", "J", "Z", "C", "F", "D"] {
        let descriptor = format!("({argument})V");
        registry.register(PRINT_STREAM_CLASS, "println", &descriptor, native_println);
        registry.register(PRINT_STREAM_CLASS, "print", &descriptor, native_print);
    }
}
