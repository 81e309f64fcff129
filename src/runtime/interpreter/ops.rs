//! Handlers that only touch the executing frame: constants, locals, stack
//! shuffling, arithmetic, conversions, comparisons and branches.

use std::cmp::Ordering;

use paste::paste;

use super::{HandlerResult, Next, instructions as inst};
use crate::{
    error::ExecError,
    runtime::{Frame, Runtime, Variable},
};

fn frame(runtime: &mut Runtime) -> Result<&mut Frame, ExecError> {
    runtime.thread.top_mut()
}

pub(super) fn nop(_runtime: &mut Runtime, _op: u8) -> HandlerResult {
    Ok(Next::Advance(1))
}

// constants

pub(super) fn aconst_null(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    frame(runtime)?.push(Variable::default());
    Ok(Next::Advance(1))
}

pub(super) fn iconst(runtime: &mut Runtime, op: u8) -> HandlerResult {
    frame(runtime)?.push_int(op as i32 - inst::ICONST_0 as i32);
    Ok(Next::Advance(1))
}

pub(super) fn lconst(runtime: &mut Runtime, op: u8) -> HandlerResult {
    frame(runtime)?.push_long((op - inst::LCONST_0) as i64);
    Ok(Next::Advance(1))
}

pub(super) fn fconst(runtime: &mut Runtime, op: u8) -> HandlerResult {
    frame(runtime)?.push_float((op - inst::FCONST_0) as f32);
    Ok(Next::Advance(1))
}

pub(super) fn dconst(runtime: &mut Runtime, op: u8) -> HandlerResult {
    frame(runtime)?.push_double((op - inst::DCONST_0) as f64);
    Ok(Next::Advance(1))
}

pub(super) fn bipush(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let value = frame.i8_at(1)?;
    frame.push_int(value as i32);
    Ok(Next::Advance(2))
}

pub(super) fn sipush(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let value = frame.i16_at(1)?;
    frame.push_int(value as i32);
    Ok(Next::Advance(3))
}

// locals

/// Slots moved by a typed load/store; `kind` counts i, l, f, d, a from 0.
fn kind_slots(kind: u8) -> usize {
    match kind {
        1 | 3 => 2,
        _ => 1,
    }
}

pub(super) fn load(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let index = frame.u8_at(1)? as usize;
    frame.load_slots(index, kind_slots(op - inst::ILOAD))?;
    Ok(Next::Advance(2))
}

/// `iload_0` through `aload_3`.
pub(super) fn load_n(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let offset = op - inst::ILOAD_0;
    frame(runtime)?.load_slots((offset % 4) as usize, kind_slots(offset / 4))?;
    Ok(Next::Advance(1))
}

pub(super) fn store(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let index = frame.u8_at(1)? as usize;
    frame.store_slots(index, kind_slots(op - inst::ISTORE))?;
    Ok(Next::Advance(2))
}

/// `istore_0` through `astore_3`.
pub(super) fn store_n(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let offset = op - inst::ISTORE_0;
    frame(runtime)?.store_slots((offset % 4) as usize, kind_slots(offset / 4))?;
    Ok(Next::Advance(1))
}

pub(super) fn iinc(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let index = frame.u8_at(1)? as usize;
    let delta = frame.i8_at(2)? as i32;
    let value = frame.load(index)?.as_int();
    frame.store(index, Variable::int(value.wrapping_add(delta)))?;
    Ok(Next::Advance(3))
}

/// `wide` widens the local index of the following load, store, `ret` or
/// `iinc` to 16 bits (and the `iinc` constant as well).
pub(super) fn wide(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let op = frame.u8_at(1)?;
    let index = frame.u16_at(2)? as usize;
    match op {
        inst::ILOAD..=inst::ALOAD => frame.load_slots(index, kind_slots(op - inst::ILOAD))?,
        inst::ISTORE..=inst::ASTORE => frame.store_slots(index, kind_slots(op - inst::ISTORE))?,
        inst::IINC => {
            let delta = frame.i16_at(4)? as i32;
            let value = frame.load(index)?.as_int();
            frame.store(index, Variable::int(value.wrapping_add(delta)))?;
            return Ok(Next::Advance(6));
        }
        inst::RET => return Ok(Next::Jump(frame.load(index)?.as_return_address())),
        _ => {
            return Err(ExecError::UnknownOpcode {
                opcode: op,
                pc: frame.pc() + 1,
            }
            .into());
        }
    }
    Ok(Next::Advance(4))
}

// stack

pub(super) fn pop(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let count = if op == inst::POP2 { 2 } else { 1 };
    frame(runtime)?.pop_slots(count)?;
    Ok(Next::Advance(1))
}

/// The dup family: copies the top `count` slots below the `depth` slots
/// under them.
pub(super) fn dup(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let (count, depth) = match op {
        inst::DUP => (1, 0),
        inst::DUP_X1 => (1, 1),
        inst::DUP_X2 => (1, 2),
        inst::DUP2 => (2, 0),
        inst::DUP2_X1 => (2, 1),
        _ => (2, 2),
    };
    let frame = frame(runtime)?;
    let values = frame.pop_slots(count + depth)?;
    frame.push_slots(&values[depth..]);
    frame.push_slots(&values);
    Ok(Next::Advance(1))
}

pub(super) fn swap(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let top = frame.pop()?;
    let below = frame.pop()?;
    frame.push(top);
    frame.push(below);
    Ok(Next::Advance(1))
}

// arithmetic

macro_rules! binary {
    ($($name:ident: $ty:ident, |$a:ident, $b:ident| $body:expr;)*) => {
        paste! {
            $(
                pub(super) fn $name(runtime: &mut Runtime, _op: u8) -> HandlerResult {
                    let frame = frame(runtime)?;
                    let $b = frame.[<pop_ $ty>]()?;
                    let $a = frame.[<pop_ $ty>]()?;
                    frame.[<push_ $ty>]($body);
                    Ok(Next::Advance(1))
                }
            )*
        }
    };
}

binary! {
    iadd: int, |a, b| a.wrapping_add(b);
    ladd: long, |a, b| a.wrapping_add(b);
    fadd: float, |a, b| a + b;
    dadd: double, |a, b| a + b;
    isub: int, |a, b| a.wrapping_sub(b);
    lsub: long, |a, b| a.wrapping_sub(b);
    fsub: float, |a, b| a - b;
    dsub: double, |a, b| a - b;
    imul: int, |a, b| a.wrapping_mul(b);
    lmul: long, |a, b| a.wrapping_mul(b);
    fmul: float, |a, b| a * b;
    dmul: double, |a, b| a * b;
    idiv: int, |a, b| {
        if b == 0 {
            return Err(ExecError::DivisionByZero.into());
        }
        a.wrapping_div(b)
    };
    ldiv: long, |a, b| {
        if b == 0 {
            return Err(ExecError::DivisionByZero.into());
        }
        a.wrapping_div(b)
    };
    fdiv: float, |a, b| a / b;
    ddiv: double, |a, b| a / b;
    irem: int, |a, b| {
        if b == 0 {
            return Err(ExecError::DivisionByZero.into());
        }
        a.wrapping_rem(b)
    };
    lrem: long, |a, b| {
        if b == 0 {
            return Err(ExecError::DivisionByZero.into());
        }
        a.wrapping_rem(b)
    };
    frem: float, |a, b| a % b;
    drem: double, |a, b| a % b;
    iand: int, |a, b| a & b;
    land: long, |a, b| a & b;
    ior: int, |a, b| a | b;
    lor: long, |a, b| a | b;
    ixor: int, |a, b| a ^ b;
    lxor: long, |a, b| a ^ b;
}

// the shift distance is always an int, masked to the operand width
macro_rules! shift {
    ($($name:ident: $ty:ident, |$value:ident, $distance:ident| $body:expr;)*) => {
        paste! {
            $(
                pub(super) fn $name(runtime: &mut Runtime, _op: u8) -> HandlerResult {
                    let frame = frame(runtime)?;
                    let $distance = frame.pop_int()? as u32;
                    let $value = frame.[<pop_ $ty>]()?;
                    frame.[<push_ $ty>]($body);
                    Ok(Next::Advance(1))
                }
            )*
        }
    };
}

shift! {
    ishl: int, |value, distance| value.wrapping_shl(distance);
    lshl: long, |value, distance| value.wrapping_shl(distance);
    ishr: int, |value, distance| value.wrapping_shr(distance);
    lshr: long, |value, distance| value.wrapping_shr(distance);
    iushr: int, |value, distance| (value as u32).wrapping_shr(distance) as i32;
    lushr: long, |value, distance| (value as u64).wrapping_shr(distance) as i64;
}

macro_rules! convert {
    ($($name:ident: $from:ident => $to:ident, |$value:ident| $body:expr;)*) => {
        paste! {
            $(
                pub(super) fn $name(runtime: &mut Runtime, _op: u8) -> HandlerResult {
                    let frame = frame(runtime)?;
                    let $value = frame.[<pop_ $from>]()?;
                    frame.[<push_ $to>]($body);
                    Ok(Next::Advance(1))
                }
            )*
        }
    };
}

// float to integer casts saturate and map NaN to 0
convert! {
    ineg: int => int, |value| value.wrapping_neg();
    lneg: long => long, |value| value.wrapping_neg();
    fneg: float => float, |value| -value;
    dneg: double => double, |value| -value;
    i2l: int => long, |value| value as i64;
    i2f: int => float, |value| value as f32;
    i2d: int => double, |value| value as f64;
    l2i: long => int, |value| value as i32;
    l2f: long => float, |value| value as f32;
    l2d: long => double, |value| value as f64;
    f2i: float => int, |value| value as i32;
    f2l: float => long, |value| value as i64;
    f2d: float => double, |value| value as f64;
    d2i: double => int, |value| value as i32;
    d2l: double => long, |value| value as i64;
    d2f: double => float, |value| value as f32;
    i2b: int => int, |value| value as i8 as i32;
    i2c: int => int, |value| value as u16 as i32;
    i2s: int => int, |value| value as i16 as i32;
}

// comparisons

fn ordering_value(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

macro_rules! compare {
    ($($name:ident: $ty:ident, $nan:expr;)*) => {
        paste! {
            $(
                pub(super) fn $name(runtime: &mut Runtime, _op: u8) -> HandlerResult {
                    let frame = frame(runtime)?;
                    let b = frame.[<pop_ $ty>]()?;
                    let a = frame.[<pop_ $ty>]()?;
                    frame.push_int(a.partial_cmp(&b).map_or($nan, ordering_value));
                    Ok(Next::Advance(1))
                }
            )*
        }
    };
}

compare! {
    lcmp: long, 0;
    fcmpl: float, -1;
    fcmpg: float, 1;
    dcmpl: double, -1;
    dcmpg: double, 1;
}

// branches

fn branch(frame: &Frame, taken: bool) -> HandlerResult {
    if taken {
        let offset = frame.i16_at(1)? as i32;
        Ok(Next::Jump(frame.branch_target(offset)?))
    } else {
        Ok(Next::Advance(3))
    }
}

/// `ifeq` through `ifle`: compares the popped int against zero.
pub(super) fn if_zero(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let value = frame.pop_int()?;
    let taken = match op {
        inst::IFEQ => value == 0,
        inst::IFNE => value != 0,
        inst::IFLT => value < 0,
        inst::IFGE => value >= 0,
        inst::IFGT => value > 0,
        _ => value <= 0,
    };
    branch(frame, taken)
}

pub(super) fn if_icmp(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    let taken = match op {
        inst::IF_ICMPEQ => a == b,
        inst::IF_ICMPNE => a != b,
        inst::IF_ICMPLT => a < b,
        inst::IF_ICMPGE => a >= b,
        inst::IF_ICMPGT => a > b,
        _ => a <= b,
    };
    branch(frame, taken)
}

pub(super) fn if_acmp(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let b = frame.pop_ref()?;
    let a = frame.pop_ref()?;
    branch(frame, (a == b) == (op == inst::IF_ACMPEQ))
}

pub(super) fn if_null(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let value = frame.pop_ref()?;
    branch(frame, value.is_null() == (op == inst::IFNULL))
}

pub(super) fn goto(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let offset = if op == inst::GOTO_W {
        frame.i32_at(1)?
    } else {
        frame.i16_at(1)? as i32
    };
    Ok(Next::Jump(frame.branch_target(offset)?))
}

pub(super) fn jsr(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let (offset, length) = if op == inst::JSR_W {
        (frame.i32_at(1)?, 5)
    } else {
        (frame.i16_at(1)? as i32, 3)
    };
    let target = frame.branch_target(offset)?;
    frame.push(Variable::return_address(frame.pc() + length));
    Ok(Next::Jump(target))
}

pub(super) fn ret(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let index = frame.u8_at(1)? as usize;
    Ok(Next::Jump(frame.load(index)?.as_return_address()))
}

/// Offset from pc to the first 4-byte aligned operand of a switch.
fn switch_operands(frame: &Frame) -> usize {
    let pc = frame.pc();
    ((pc + 4) & !3) - pc
}

pub(super) fn tableswitch(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let base = switch_operands(frame);
    let index = frame.pop_int()?;
    let default = frame.i32_at(base)?;
    let low = frame.i32_at(base + 4)?;
    let high = frame.i32_at(base + 8)?;
    let offset = if index < low || index > high {
        default
    } else {
        frame.i32_at(base + 12 + 4 * (index as i64 - low as i64) as usize)?
    };
    Ok(Next::Jump(frame.branch_target(offset)?))
}

pub(super) fn lookupswitch(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = frame(runtime)?;
    let base = switch_operands(frame);
    let key = frame.pop_int()?;
    let mut offset = frame.i32_at(base)?;
    let pairs = frame.i32_at(base + 4)?.max(0) as usize;
    for pair in 0..pairs {
        let at = base + 8 + pair * 8;
        if frame.i32_at(at)? == key {
            offset = frame.i32_at(at + 4)?;
            break;
        }
    }
    Ok(Next::Jump(frame.branch_target(offset)?))
}
