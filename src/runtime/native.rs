mod object;
mod print_stream;
mod string;
mod system;

use std::{io::Write, sync::Arc};

use dashmap::DashMap;

use crate::{
    descriptor::{FieldType, MethodDescriptor},
    error::ExecError,
    runtime::{Heap, NativeResult, Reference, RuntimeClass, Variable},
};

pub type NativeFunction = fn(NativeEnv<'_>) -> NativeResult<Option<NativeVariable>>;

/// What a native method gets to work with: its decoded arguments (receiver
/// first for instance methods), the heap, the program's stdout and the class
/// declaring the method.
pub struct NativeEnv<'a> {
    pub args: Vec<NativeVariable>,
    pub heap: &'a mut Heap,
    pub out: &'a mut dyn Write,
    pub class: Arc<RuntimeClass>,
}

impl NativeEnv<'_> {
    pub fn arg(&self, index: usize) -> Result<&NativeVariable, ExecError> {
        self.args
            .get(index)
            .ok_or_else(|| ExecError::Native(format!("missing argument {index}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeVariable {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Reference),
}

macro_rules! getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Result<$ty, ExecError> {
            match self {
                NativeVariable::$variant(value) => Ok(*value),
                other => Err(ExecError::Native(format!(
                    "{}: expected {}, got {other:?}",
                    stringify!($name),
                    stringify!($variant)
                ))),
            }
        }
    };
}

impl NativeVariable {
    getter!(get_boolean, Boolean, bool);
    getter!(get_byte, Byte, i8);
    getter!(get_char, Char, u16);
    getter!(get_short, Short, i16);
    getter!(get_int, Int, i32);
    getter!(get_long, Long, i64);
    getter!(get_float, Float, f32);
    getter!(get_double, Double, f64);
    getter!(get_ref, Reference, Reference);

    fn from_slots(field_type: &FieldType, slots: &[Variable]) -> NativeVariable {
        let value = slots[0];
        match field_type {
            FieldType::Boolean => NativeVariable::Boolean(value.as_int() != 0),
            FieldType::Byte => NativeVariable::Byte(value.as_int() as i8),
            FieldType::Char => NativeVariable::Char(value.as_int() as u16),
            FieldType::Short => NativeVariable::Short(value.as_int() as i16),
            FieldType::Int => NativeVariable::Int(value.as_int()),
            FieldType::Float => NativeVariable::Float(value.as_float()),
            FieldType::Long => NativeVariable::Long(Variable::get_long(value, slots[1])),
            FieldType::Double => NativeVariable::Double(Variable::get_double(value, slots[1])),
            FieldType::Object(_) | FieldType::Array(_) => {
                NativeVariable::Reference(value.as_reference())
            }
        }
    }

    /// The operand stack slots for a return value.
    pub(crate) fn into_slots(self) -> Vec<Variable> {
        match self {
            NativeVariable::Boolean(value) => vec![Variable::int(value as i32)],
            NativeVariable::Byte(value) => vec![Variable::int(value as i32)],
            NativeVariable::Char(value) => vec![Variable::int(value as i32)],
            NativeVariable::Short(value) => vec![Variable::int(value as i32)],
            NativeVariable::Int(value) => vec![Variable::int(value)],
            NativeVariable::Float(value) => vec![Variable::float(value)],
            NativeVariable::Long(value) => {
                let (upper, lower) = Variable::put_long(value);
                vec![upper, lower]
            }
            NativeVariable::Double(value) => {
                let (upper, lower) = Variable::put_double(value);
                vec![upper, lower]
            }
            NativeVariable::Reference(value) => vec![Variable::reference(value)],
        }
    }
}

/// Splits the argument slots popped for a call into typed values.
pub(crate) fn decode_args(
    descriptor: &MethodDescriptor,
    is_static: bool,
    slots: &[Variable],
) -> Vec<NativeVariable> {
    let mut args = Vec::with_capacity(descriptor.parameters().len() + 1);
    let mut index = 0;
    if !is_static {
        args.push(NativeVariable::Reference(slots[0].as_reference()));
        index = 1;
    }
    for parameter in descriptor.parameters() {
        args.push(NativeVariable::from_slots(parameter, &slots[index..]));
        index += parameter.slot_size();
    }
    args
}

/// Native implementations keyed by `"<descriptor> <class>.<name>"`.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    functions: DashMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the natives the bootstrap library declares.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        object::register_natives(&registry);
        print_stream::register_natives(&registry);
        string::register_natives(&registry);
        system::register_natives(&registry);
        registry
    }

    pub fn key(class: &str, name: &str, descriptor: &str) -> String {
        format!("{descriptor} {class}.{name}")
    }

    pub fn register(&self, class: &str, name: &str, descriptor: &str, function: NativeFunction) {
        self.functions
            .insert(Self::key(class, name, descriptor), function);
    }

    pub fn get(&self, key: &str) -> Option<NativeFunction> {
        self.functions.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Java's `Float.toString`/`Double.toString` shape for common values:
/// integral values keep a trailing `.0`.
pub(crate) fn java_number_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if value.fract() == 0.0 && value.abs() < 1e7 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub(crate) fn java_float_string(value: f32) -> String {
    if value.is_finite() && (value.fract() != 0.0 || value.abs() >= 1e7) {
        format!("{value}")
    } else {
        java_number_string(value as f64)
    }
}
