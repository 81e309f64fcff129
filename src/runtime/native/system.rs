use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::{
    error::ExecError,
    runtime::{NativeEnv, NativeResult, NativeVariable, native::NativeRegistry},
};

const SYSTEM_CLASS: &str = "java/lang/System";

//     public static native void arraycopy(Object src,  int  srcPos,
//                                         Object dest, int destPos,
//                                         int length);
fn native_system_arraycopy(env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let src_ref = env.arg(0)?.get_ref()?;
    let src_pos = env.arg(1)?.get_int()?;
    let dest_ref = env.arg(2)?.get_ref()?;
    let dest_pos = env.arg(3)?.get_int()?;
    let length = env.arg(4)?.get_int()?;

    if src_ref.is_null() || dest_ref.is_null() {
        return Err(ExecError::NullReference("System.arraycopy").into());
    }
    let src = env.heap.array(src_ref)?;
    let dest = env.heap.array(dest_ref)?;
    let compatible = if src.component().is_reference() {
        dest.component().is_reference()
    } else {
        src.component() == dest.component()
    };
    if !compatible {
        return Err(ExecError::ArrayStore {
            value: src.class_name.to_string(),
            component: dest.component().to_string(),
        }
        .into());
    }
    for (pos, array_len) in [(src_pos, src.len()), (dest_pos, dest.len())] {
        if pos < 0 || length < 0 || pos as usize + length as usize > array_len {
            return Err(ExecError::ArrayIndexOutOfBounds {
                index: pos.saturating_add(length),
                length: array_len,
            }
            .into());
        }
    }

    // copied through a buffer so overlapping ranges of one array behave like memmove
    let values = (src_pos..src_pos + length)
        .map(|index| src.load(index))
        .collect::<Result<Vec<_>, _>>()?;
    let dest = env.heap.array_mut(dest_ref)?;
    for (index, value) in (dest_pos..).zip(values) {
        dest.store(index, value)?;
    }
    Ok(None)
}

// public static native long currentTimeMillis();
fn current_time_millis(_env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default();
    Ok(Some(NativeVariable::Long(millis)))
}

// public static native long nanoTime();
fn nano_time(_env: NativeEnv) -> NativeResult<Option<NativeVariable>> {
    static INSTANT_BASE: Lazy<Instant> = Lazy::new(Instant::now);
    let nanos = INSTANT_BASE.elapsed().as_nanos() as i64;
    Ok(Some(NativeVariable::Long(nanos)))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(
        SYSTEM_CLASS,
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        native_system_arraycopy,
    );
    registry.register(
        SYSTEM_CLASS,
        "currentTimeMillis",
        "()J",
        current_time_millis,
    );
    registry.register(SYSTEM_CLASS, "nanoTime", "()J", nano_time);
}
