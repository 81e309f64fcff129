use std::sync::Arc;

use crate::{
    descriptor::FieldType,
    error::ExecError,
    runtime::{HeapObject, Reference, RuntimeArray, RuntimeClass, RuntimeObject, Value},
};

pub use string_table::StringTable;

mod string_table;

/// Name and descriptor of the field backing `java/lang/String`.
pub const STRING_VALUE_FIELD: (&str, &str) = ("value", "[B");

/// Arena of every object and array allocated by the program. Nothing is
/// reclaimed: a [`Reference`] stays valid for the lifetime of the heap.
#[derive(Debug, Default)]
pub struct Heap {
    heap: Vec<HeapObject>,
    strings: StringTable,
}

impl Heap {
    const MAX_OBJECT_ID: usize = u32::MAX as usize;

    pub fn new() -> Heap {
        Heap {
            heap: vec![],
            strings: StringTable::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn allocate(&mut self, object: HeapObject) -> Result<Reference, ExecError> {
        if self.heap.len() >= Self::MAX_OBJECT_ID {
            return Err(ExecError::Native("heap exhausted".to_string()));
        }
        self.heap.push(object);
        Ok(Reference(self.heap.len() as u32))
    }

    pub fn allocate_object(&mut self, class: Arc<RuntimeClass>) -> Result<Reference, ExecError> {
        self.allocate(HeapObject::Object(RuntimeObject::new(class)))
    }

    pub fn allocate_array(
        &mut self,
        component: FieldType,
        length: usize,
    ) -> Result<Reference, ExecError> {
        self.allocate(HeapObject::Array(RuntimeArray::new(component, length)))
    }

    pub fn get(&self, reference: Reference) -> Result<&HeapObject, ExecError> {
        if reference.is_null() {
            return Err(ExecError::NullReference("dereference"));
        }
        self.heap
            .get(reference.0 as usize - 1)
            .ok_or(ExecError::InvalidReference(reference.0))
    }

    pub fn get_mut(&mut self, reference: Reference) -> Result<&mut HeapObject, ExecError> {
        if reference.is_null() {
            return Err(ExecError::NullReference("dereference"));
        }
        self.heap
            .get_mut(reference.0 as usize - 1)
            .ok_or(ExecError::InvalidReference(reference.0))
    }

    pub fn object(&self, reference: Reference) -> Result<&RuntimeObject, ExecError> {
        match self.get(reference)? {
            HeapObject::Object(object) => Ok(object),
            HeapObject::Array(_) => Err(ExecError::NotAnObject),
        }
    }

    pub fn object_mut(&mut self, reference: Reference) -> Result<&mut RuntimeObject, ExecError> {
        match self.get_mut(reference)? {
            HeapObject::Object(object) => Ok(object),
            HeapObject::Array(_) => Err(ExecError::NotAnObject),
        }
    }

    pub fn array(&self, reference: Reference) -> Result<&RuntimeArray, ExecError> {
        match self.get(reference)? {
            HeapObject::Array(array) => Ok(array),
            HeapObject::Object(_) => Err(ExecError::NotAnArray),
        }
    }

    pub fn array_mut(&mut self, reference: Reference) -> Result<&mut RuntimeArray, ExecError> {
        match self.get_mut(reference)? {
            HeapObject::Array(array) => Ok(array),
            HeapObject::Object(_) => Err(ExecError::NotAnArray),
        }
    }

    pub fn class_name(&self, reference: Reference) -> Result<String, ExecError> {
        Ok(self.get(reference)?.class_name().to_string())
    }

    /// Allocates a fresh `String` whose `value` is a byte array holding the
    /// UTF-8 encoding of `value`.
    pub fn new_string(
        &mut self,
        value: &str,
        string_class: &Arc<RuntimeClass>,
    ) -> Result<Reference, ExecError> {
        let (name, descriptor) = STRING_VALUE_FIELD;
        let field = string_class
            .find_field(name, descriptor)
            .ok_or_else(|| ExecError::FieldNotFound {
                class: string_class.name().to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;
        let bytes = self.new_byte_array(value.as_bytes())?;
        let string = self.allocate_object(Arc::clone(string_class))?;
        self.object_mut(string)?
            .put_field(&field, Value::Reference(bytes))?;
        Ok(string)
    }

    pub fn new_byte_array(&mut self, bytes: &[u8]) -> Result<Reference, ExecError> {
        let array = self.allocate_array(FieldType::Byte, bytes.len())?;
        if let Some(storage) = self.array_mut(array)?.bytes_mut() {
            storage.copy_from_slice(bytes);
        }
        Ok(array)
    }

    /// Like [`Heap::new_string`], but equal contents share one instance.
    pub fn intern(
        &mut self,
        value: &str,
        string_class: &Arc<RuntimeClass>,
    ) -> Result<Reference, ExecError> {
        if let Some(reference) = self.strings.get(value) {
            return Ok(reference);
        }
        let reference = self.new_string(value, string_class)?;
        self.strings.insert(value, reference);
        Ok(reference)
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// The raw bytes behind a `String` object.
    pub fn string_bytes(&self, reference: Reference) -> Result<&[u8], ExecError> {
        let object = self.object(reference)?;
        let (name, descriptor) = STRING_VALUE_FIELD;
        let field = object
            .class
            .find_field(name, descriptor)
            .ok_or_else(|| ExecError::FieldNotFound {
                class: object.class.name().to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;
        let bytes = object
            .get_field(&field)
            .as_reference()
            .unwrap_or(Reference::NULL);
        if bytes.is_null() {
            return Ok(&[]);
        }
        Ok(self.array(bytes)?.bytes().unwrap_or_default())
    }

    pub fn read_string(&self, reference: Reference) -> Result<String, ExecError> {
        Ok(String::from_utf8_lossy(self.string_bytes(reference)?).into_owned())
    }
}
