use std::io;

use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

use crate::runtime::{Reference, Value};

/// A constant pool slot that is missing or holds the wrong kind of entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("constant pool index {index} is not a valid {expected} entry")]
pub struct BadConstant {
    pub index: u16,
    pub expected: &'static str,
}

impl BadConstant {
    pub(crate) fn new(index: u16, expected: &'static str) -> Self {
        Self { index, expected }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unexpected end of class file")]
    Truncated,
    #[error("invalid constant pool tag {0}")]
    InvalidTag(u8),
    #[error("constant pool count {0} is invalid")]
    EmptyConstantPool(u16),
    #[error("a 64-bit constant overruns the declared constant pool size")]
    ConstantPoolOverrun,
    #[error(transparent)]
    BadConstant(#[from] BadConstant),
    #[error("constant pool entry {0} is not valid modified UTF-8")]
    InvalidUtf8(u16),
    #[error("attribute {name} declares {declared} bytes but its body has {consumed}")]
    AttributeLength {
        name: String,
        declared: u32,
        consumed: usize,
    },
    #[error("reserved stack map frame type {0}")]
    InvalidStackMapFrame(u8),
    #[error("invalid verification type tag {0}")]
    InvalidVerificationType(u8),
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
    #[error("malformed class file ({0:?})")]
    Malformed(ErrorKind),
}

impl<'a> ParseError<&'a [u8]> for DecodeError {
    fn from_error_kind(_input: &'a [u8], kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Eof => DecodeError::Truncated,
            kind => DecodeError::Malformed(kind),
        }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl From<nom::Err<DecodeError>> for DecodeError {
    fn from(err: nom::Err<DecodeError>) -> Self {
        match err {
            nom::Err::Incomplete(_) => DecodeError::Truncated,
            nom::Err::Error(err) | nom::Err::Failure(err) => err,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("class {0} not found on the class path")]
    NotFound(String),
    #[error("failed to read class {name}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read class {name} from archive")]
    Archive {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to decode class {name}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    BadConstant(#[from] BadConstant),
    #[error("invalid descriptor {descriptor:?} for {member}")]
    InvalidDescriptor { member: String, descriptor: String },
    #[error("class {requested} resolved to a descriptor naming {found}")]
    NameMismatch { requested: String, found: String },
    #[error("class circularity detected while loading {0}")]
    Circularity(String),
    #[error("failed to load superclass of {name}")]
    Super {
        name: String,
        #[source]
        source: Box<LoadError>,
    },
    #[error("cannot initialize constant field {field} of {class}")]
    ConstantValue {
        class: String,
        field: String,
        #[source]
        source: Box<ExecError>,
    },
}

impl LoadError {
    /// Strips the [`LoadError::Super`] layers added while walking a
    /// superclass chain.
    pub fn innermost(&self) -> &LoadError {
        match self {
            LoadError::Super { source, .. } => source.innermost(),
            other => other,
        }
    }
}

/// Engine-level conditions. These terminate the thread; only `athrow`
/// produces catchable objects.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    BadConstant(#[from] BadConstant),
    #[error("method {class}.{name}{descriptor} not found")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("field {class}.{name}:{descriptor} not found")]
    FieldNotFound {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("null reference in {0}")]
    NullReference(&'static str),
    #[error("dangling reference {0}")]
    InvalidReference(u32),
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("unknown opcode {opcode:#04x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },
    #[error("instruction stream ends inside the instruction at pc {0}")]
    TruncatedCode(usize),
    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: i32, length: usize },
    #[error("negative array size {0}")]
    NegativeArraySize(i32),
    #[error("reference does not point to an array")]
    NotAnArray,
    #[error("reference does not point to an object")]
    NotAnObject,
    #[error("cannot store {value} into an array of {component}")]
    ArrayStore { value: String, component: String },
    #[error("{opcode:#04x} does not operate on arrays of {component}")]
    ArrayElementType { opcode: u8, component: String },
    #[error("{value:?} does not fit a {width}-byte slot")]
    ValueWidth { value: Value, width: usize },
    #[error("{value} cannot be cast to {target}")]
    ClassCast { value: String, target: String },
    #[error("method {0} has no code and no native binding")]
    NoCode(String),
    #[error("class declaring {0} is no longer loaded")]
    ClassUnloaded(String),
    #[error("method {0} is abstract")]
    AbstractMethod(String),
    #[error("no native implementation registered for {0}")]
    NativeNotFound(String),
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("local variable {0} out of range")]
    LocalOutOfRange(usize),
    #[error("call stack exceeded {0} frames")]
    StackOverflow(usize),
    #[error("no frame on the call stack")]
    NoFrame,
    #[error("invalid newarray type {0}")]
    InvalidArrayType(u8),
    #[error("native method failed: {0}")]
    Native(String),
    #[error("failed to write program output")]
    Output(#[from] io::Error),
}

/// What the embedder sees when a run does not complete normally.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("uncaught exception {class_name}")]
    Uncaught {
        class_name: String,
        reference: Reference,
    },
    #[error("class {0} has no public static void main(String[])")]
    MainNotFound(String),
}
