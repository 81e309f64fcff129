use crate::{
    consts::STRING_CLASS,
    error::ExecError,
    runtime::{NativeEnv, NativeResult, NativeVariable, native::NativeRegistry},
};

fn utf16_units(env: &NativeEnv, index: usize) -> NativeResult<Vec<u16>> {
    let this = env.arg(index)?.get_ref()?;
    if this.is_null() {
        return Err(ExecError::NullReference("java/lang/String").into());
    }
    Ok(env.heap.read_string(this)?.encode_utf16().collect())
}

// public int length();
fn native_string_length(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let units = utf16_units(&env, 0)?;
    Ok(Some(NativeVariable::Int(units.len() as i32)))
}

// public char charAt(int index);
fn native_string_char_at(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let units = utf16_units(&env, 0)?;
    let index = env.arg(1)?.get_int()?;
    let unit = usize::try_from(index)
        .ok()
        .and_then(|i| units.get(i).copied())
        .ok_or(ExecError::ArrayIndexOutOfBounds {
            index,
            length: units.len(),
        })?;
    Ok(Some(NativeVariable::Char(unit)))
}

// public boolean equals(Object anObject);
fn native_string_equals(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let this = env.arg(0)?.get_ref()?;
    let other = env.arg(1)?.get_ref()?;
    if this == other {
        return Ok(Some(NativeVariable::Boolean(true)));
    }
    if other.is_null() || env.heap.class_name(other)? != STRING_CLASS {
        return Ok(Some(NativeVariable::Boolean(false)));
    }
    let equal = env.heap.string_bytes(this)? == env.heap.string_bytes(other)?;
    Ok(Some(NativeVariable::Boolean(equal)))
}

// public int hashCode();
fn native_string_hash_code(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let hash = utf16_units(&env, 0)?
        .into_iter()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(unit as i32)
        });
    Ok(Some(NativeVariable::Int(hash)))
}

// public byte[] getBytes();
fn native_string_get_bytes(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let this = env.arg(0)?.get_ref()?;
    let bytes = env.heap.string_bytes(this)?.to_vec();
    let array = env.heap.new_byte_array(&bytes)?;
    Ok(Some(NativeVariable::Reference(array)))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(STRING_CLASS, "length", "()I", native_string_length);
    registry.register(STRING_CLASS, "charAt", "(I)C", native_string_char_at);
    registry.register(
        STRING_CLASS,
        "equals",
        "(Ljava/lang/Object;)Z",
        native_string_equals,
    );
    registry.register(STRING_CLASS, "hashCode", "()I", native_string_hash_code);
    registry.register(STRING_CLASS, "getBytes", "()[B", native_string_get_bytes);
}
