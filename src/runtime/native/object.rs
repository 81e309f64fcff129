use crate::runtime::{NativeEnv, NativeResult, NativeVariable, native::NativeRegistry};

// public native int hashCode();
pub(super) fn native_object_hash_code(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let reference = env.arg(0)?.get_ref()?;
    Ok(Some(NativeVariable::Int(reference.id() as i32)))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(
        "java/lang/Object",
        "hashCode",
        "()I",
        native_object_hash_code,
    );
    registry.register(
        "java/lang/System",
        "identityHashCode",
        "(Ljava/lang/Object;)I",
        native_object_hash_code,
    );
}
