use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;

pub use object::*;

use crate::{
    class::{ClassFile, CodeAttribute},
    consts::{
        CLINIT_DESCRIPTOR, CLINIT_NAME, ClassAccessFlag, FieldAccessFlag, MethodAccessFlag,
    },
    descriptor::{FieldType, MethodDescriptor},
    error::{BadConstant, ExecError, LoadError},
};

mod object;

/// Handle into the heap arena. `0` is `null`; live objects are numbered from 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Reference(pub(crate) u32);

impl Reference {
    pub const NULL: Reference = Reference(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "@{}", self.0)
        }
    }
}

/// One local-variable or operand-stack slot. 64-bit values take two slots,
/// high half first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Variable(u32);

impl Variable {
    pub fn int(value: i32) -> Self {
        Variable(value as u32)
    }

    pub fn float(value: f32) -> Self {
        Variable(value.to_bits())
    }

    pub fn reference(value: Reference) -> Self {
        Variable(value.0)
    }

    pub(crate) fn return_address(pc: usize) -> Self {
        Variable(pc as u32)
    }

    pub fn as_int(self) -> i32 {
        self.0 as i32
    }

    pub fn as_float(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub fn as_reference(self) -> Reference {
        Reference(self.0)
    }

    pub(crate) fn as_return_address(self) -> usize {
        self.0 as usize
    }

    pub fn put_long(value: i64) -> (Variable, Variable) {
        let upper = (value >> 32) as u32;
        let lower = value as u32;
        (Variable(upper), Variable(lower))
    }

    pub fn get_long(upper: Variable, lower: Variable) -> i64 {
        (((upper.0 as u64) << 32) | lower.0 as u64) as i64
    }

    pub fn put_double(value: f64) -> (Variable, Variable) {
        Self::put_long(value.to_bits() as i64)
    }

    pub fn get_double(upper: Variable, lower: Variable) -> f64 {
        f64::from_bits(Self::get_long(upper, lower) as u64)
    }
}

/// A typed value moving between slots and byte storage (fields, arrays).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Reference),
}

impl Value {
    pub fn zero(field_type: &FieldType) -> Value {
        match field_type {
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Reference(Reference::NULL),
            _ => Value::Int(0),
        }
    }

    /// Decodes `field_type.byte_width()` big-endian bytes. Sub-int types are
    /// sign- or zero-extended the way the corresponding load opcodes do.
    pub(crate) fn read(bytes: &[u8], field_type: &FieldType) -> Value {
        match field_type {
            FieldType::Byte => Value::Int(bytes[0] as i8 as i32),
            FieldType::Boolean => Value::Int(bytes[0] as i32),
            FieldType::Char => Value::Int(u16::from_be_bytes(fixed(bytes)) as i32),
            FieldType::Short => Value::Int(i16::from_be_bytes(fixed(bytes)) as i32),
            FieldType::Int => Value::Int(i32::from_be_bytes(fixed(bytes))),
            FieldType::Float => Value::Float(f32::from_be_bytes(fixed(bytes))),
            FieldType::Long => Value::Long(i64::from_be_bytes(fixed(bytes))),
            FieldType::Double => Value::Double(f64::from_be_bytes(fixed(bytes))),
            FieldType::Object(_) | FieldType::Array(_) => {
                Value::Reference(Reference(u32::from_be_bytes(fixed(bytes))))
            }
        }
    }

    /// Encodes into `bytes`, truncating ints to the slice width. The slice
    /// has to be as wide as the value's storage type.
    pub(crate) fn write(self, bytes: &mut [u8]) -> Result<(), ExecError> {
        let width = bytes.len();
        match (self, width) {
            (Value::Int(value), 1 | 2 | 4) => {
                bytes.copy_from_slice(&value.to_be_bytes()[4 - width..]);
            }
            (Value::Long(value), 8) => bytes.copy_from_slice(&value.to_be_bytes()),
            (Value::Float(value), 4) => bytes.copy_from_slice(&value.to_be_bytes()),
            (Value::Double(value), 8) => bytes.copy_from_slice(&value.to_be_bytes()),
            (Value::Reference(value), 4) => bytes.copy_from_slice(&value.0.to_be_bytes()),
            (value, width) => return Err(ExecError::ValueWidth { value, width }),
        }
        Ok(())
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_reference(self) -> Option<Reference> {
        match self {
            Value::Reference(value) => Some(value),
            _ => None,
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Key used by the field and method tables of a [`RuntimeClass`].
pub(crate) fn member_key(name: &str, descriptor: &str) -> String {
    format!("{name}:{descriptor}")
}

/// A loaded class: the parsed descriptor plus resolved layout.
#[derive(Debug)]
pub struct RuntimeClass {
    pub(crate) name: Arc<str>,
    pub(crate) super_name: Option<Arc<str>>,
    pub(crate) access_flags: ClassAccessFlag,
    pub(crate) class_file: ClassFile,
    pub(crate) super_class: Option<Arc<RuntimeClass>>,
    pub(crate) interfaces: Vec<Arc<RuntimeClass>>,
    pub(crate) fields: HashMap<String, Arc<RuntimeField>>,
    pub(crate) methods: HashMap<String, Arc<RuntimeMethod>>,
    // includes every superclass field
    pub(crate) instance_size: usize,
    pub(crate) static_storage: RwLock<Vec<u8>>,
    // set once `<clinit>` has been scheduled
    pub(crate) initialized: AtomicBool,
}

impl RuntimeClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    pub fn super_class(&self) -> Option<&Arc<RuntimeClass>> {
        self.super_class.as_ref()
    }

    pub fn access_flags(&self) -> ClassAccessFlag {
        self.access_flags
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class_file
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn static_size(&self) -> usize {
        self.static_storage.read().len()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::INTERFACE)
    }

    pub fn field(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeField>> {
        self.fields.get(&member_key(name, descriptor))
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        self.methods.get(&member_key(name, descriptor))
    }

    pub fn clinit(&self) -> Option<&Arc<RuntimeMethod>> {
        self.method(CLINIT_NAME, CLINIT_DESCRIPTOR)
    }

    /// Looks in this class, then its superclasses, then superinterfaces.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<RuntimeMethod>> {
        let key = member_key(name, descriptor);
        let mut class = Some(self);
        while let Some(current) = class {
            if let Some(method) = current.methods.get(&key) {
                return Some(Arc::clone(method));
            }
            class = current.super_class.as_deref();
        }
        self.find_interface_method(&key)
    }

    fn find_interface_method(&self, key: &str) -> Option<Arc<RuntimeMethod>> {
        let mut class = Some(self);
        while let Some(current) = class {
            for interface in &current.interfaces {
                if let Some(method) = interface.methods.get(key) {
                    if !method.is_abstract() {
                        return Some(Arc::clone(method));
                    }
                }
                if let Some(method) = interface.find_interface_method(key) {
                    return Some(method);
                }
            }
            class = current.super_class.as_deref();
        }
        None
    }

    /// Field lookup: declared fields, then superinterfaces, then the superclass.
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<Arc<RuntimeField>> {
        let key = member_key(name, descriptor);
        self.find_field_by_key(&key)
    }

    fn find_field_by_key(&self, key: &str) -> Option<Arc<RuntimeField>> {
        if let Some(field) = self.fields.get(key) {
            return Some(Arc::clone(field));
        }
        for interface in &self.interfaces {
            if let Some(field) = interface.find_field_by_key(key) {
                return Some(field);
            }
        }
        self.super_class.as_ref()?.find_field_by_key(key)
    }

    /// True when `name` is this class, one of its superclasses or one of the
    /// interfaces any of them implement.
    pub fn is_subclass_of(&self, name: &str) -> bool {
        if &*self.name == name {
            return true;
        }
        if self
            .interfaces
            .iter()
            .any(|interface| interface.is_subclass_of(name))
        {
            return true;
        }
        self.super_class
            .as_ref()
            .is_some_and(|super_class| super_class.is_subclass_of(name))
    }

    pub fn get_static(&self, field: &RuntimeField) -> Value {
        let storage = self.static_storage.read();
        Value::read(&storage[field.offset..field.offset + field.width], &field.field_type)
    }

    pub fn put_static(&self, field: &RuntimeField, value: Value) -> Result<(), ExecError> {
        let mut storage = self.static_storage.write();
        value.write(&mut storage[field.offset..field.offset + field.width])
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Marks the class initialized. True only for the first caller.
    pub(crate) fn begin_initialization(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }
}

#[derive(Debug)]
pub struct RuntimeField {
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: Arc<str>,
    pub(crate) field_type: FieldType,
    pub(crate) access_flags: FieldAccessFlag,
    /// Byte offset into the object body, or into the owner's static storage.
    pub(crate) offset: usize,
    pub(crate) width: usize,
    pub(crate) owner: Weak<RuntimeClass>,
}

impl RuntimeField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::STATIC)
    }

    /// Long and double fields occupy two stack slots.
    pub fn is_wide(&self) -> bool {
        self.field_type.is_long()
    }

    pub fn owner(&self) -> Option<Arc<RuntimeClass>> {
        self.owner.upgrade()
    }
}

#[derive(Debug)]
pub struct RuntimeMethod {
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: Arc<str>,
    pub(crate) parsed_descriptor: MethodDescriptor,
    pub(crate) access_flags: MethodAccessFlag,
    pub(crate) code: Option<Arc<CodeAttribute>>,
    pub(crate) arg_slots: usize,
    pub(crate) owner: Weak<RuntimeClass>,
}

impl RuntimeMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn parsed_descriptor(&self) -> &MethodDescriptor {
        &self.parsed_descriptor
    }

    pub fn access_flags(&self) -> MethodAccessFlag {
        self.access_flags
    }

    pub fn code(&self) -> Option<&Arc<CodeAttribute>> {
        self.code.as_ref()
    }

    /// Slots popped from the caller, `this` included.
    pub fn arg_slots(&self) -> usize {
        self.arg_slots
    }

    pub fn return_slots(&self) -> usize {
        self.parsed_descriptor.return_slots()
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::ABSTRACT)
    }

    pub fn owner(&self) -> Option<Arc<RuntimeClass>> {
        self.owner.upgrade()
    }

    pub fn owner_name(&self) -> String {
        self.owner()
            .map(|class| class.name.to_string())
            .unwrap_or_default()
    }

    /// `Owner.name(descriptor)`, for diagnostics.
    pub fn signature(&self) -> String {
        format!("{}.{}{}", self.owner_name(), self.name, self.descriptor)
    }
}

/// Why a handler or native did not complete.
#[derive(Debug)]
pub enum Exception {
    /// A guest object raised by `athrow` or a native; subject to exception
    /// table dispatch.
    Thrown(Reference),
    /// An engine-level condition that ends the thread.
    Fatal(ExecError),
}

impl From<ExecError> for Exception {
    fn from(err: ExecError) -> Self {
        Exception::Fatal(err)
    }
}

impl From<LoadError> for Exception {
    fn from(err: LoadError) -> Self {
        Exception::Fatal(ExecError::Load(err))
    }
}

impl From<BadConstant> for Exception {
    fn from(err: BadConstant) -> Self {
        Exception::Fatal(ExecError::BadConstant(err))
    }
}

pub type NativeResult<T> = ::std::result::Result<T, Exception>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_slots_are_high_then_low() {
        let (upper, lower) = Variable::put_long(0x1234_5678_9abc_def0);
        assert_eq!(upper.as_int() as u32, 0x1234_5678);
        assert_eq!(lower.as_int() as u32, 0x9abc_def0);
        assert_eq!(Variable::get_long(upper, lower), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_double_round_trips_through_slots() {
        let (upper, lower) = Variable::put_double(-2.5);
        assert_eq!(Variable::get_double(upper, lower), -2.5);
    }

    #[test]
    fn test_value_read_extends_sub_int_types() {
        let mut bytes = [0u8; 2];
        Value::Int(-1).write(&mut bytes[..1]).unwrap();
        assert_eq!(Value::read(&bytes[..1], &FieldType::Byte), Value::Int(-1));
        assert_eq!(Value::read(&bytes[..1], &FieldType::Boolean), Value::Int(255));

        Value::Int(0xffff).write(&mut bytes).unwrap();
        assert_eq!(Value::read(&bytes, &FieldType::Char), Value::Int(0xffff));
        assert_eq!(Value::read(&bytes, &FieldType::Short), Value::Int(-1));
    }

    #[test]
    fn test_value_write_rejects_other_widths() {
        let mut wide = [0u8; 8];
        assert!(matches!(
            Value::Int(5).write(&mut wide),
            Err(ExecError::ValueWidth { width: 8, .. })
        ));
        let mut narrow = [0u8; 4];
        assert!(matches!(
            Value::Long(5).write(&mut narrow),
            Err(ExecError::ValueWidth { width: 4, .. })
        ));
        assert!(Value::Double(1.0).write(&mut narrow).is_err());
        assert!(Value::Reference(Reference::NULL).write(&mut wide[..2]).is_err());
        assert_eq!(wide, [0; 8]);
        assert_eq!(narrow, [0; 4]);
    }
}
