use std::sync::Arc;

use crate::{
    descriptor::FieldType,
    error::ExecError,
    runtime::{Reference, RuntimeClass, RuntimeField, Value},
};

#[derive(Debug)]
pub enum HeapObject {
    Object(RuntimeObject),
    Array(RuntimeArray),
}

impl HeapObject {
    /// The runtime class name: `java/lang/String`, `[I`, `[Ljava/lang/Object;`...
    pub fn class_name(&self) -> &str {
        match self {
            HeapObject::Object(object) => object.class.name(),
            HeapObject::Array(array) => &array.class_name,
        }
    }
}

/// An instance: its class plus a byte body laid out by the class's fields.
#[derive(Debug)]
pub struct RuntimeObject {
    pub(crate) class: Arc<RuntimeClass>,
    pub(crate) data: Vec<u8>,
}

impl RuntimeObject {
    pub(crate) fn new(class: Arc<RuntimeClass>) -> Self {
        let data = vec![0; class.instance_size];
        Self { class, data }
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn get_field(&self, field: &RuntimeField) -> Value {
        Value::read(
            &self.data[field.offset..field.offset + field.width],
            &field.field_type,
        )
    }

    pub fn put_field(&mut self, field: &RuntimeField, value: Value) -> Result<(), ExecError> {
        value.write(&mut self.data[field.offset..field.offset + field.width])
    }
}

#[derive(Debug)]
pub enum ArrayStorage {
    /// Big-endian elements of `component.byte_width()` bytes each.
    Primitive(Vec<u8>),
    Reference(Vec<Reference>),
}

#[derive(Debug)]
pub struct RuntimeArray {
    pub(crate) class_name: Arc<str>,
    pub(crate) component: FieldType,
    pub(crate) length: usize,
    pub(crate) storage: ArrayStorage,
}

impl RuntimeArray {
    pub(crate) fn new(component: FieldType, length: usize) -> Self {
        let class_name = Arc::from(component.array_class_name());
        let storage = if component.is_reference() {
            ArrayStorage::Reference(vec![Reference::NULL; length])
        } else {
            ArrayStorage::Primitive(vec![0; length * component.byte_width()])
        };
        Self {
            class_name,
            component,
            length,
            storage,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn component(&self) -> &FieldType {
        &self.component
    }

    pub fn element_width(&self) -> usize {
        self.component.byte_width()
    }

    /// Raw element bytes of a primitive array.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            ArrayStorage::Primitive(bytes) => Some(bytes),
            ArrayStorage::Reference(_) => None,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            ArrayStorage::Primitive(bytes) => Some(bytes),
            ArrayStorage::Reference(_) => None,
        }
    }

    pub fn references(&self) -> Option<&[Reference]> {
        match &self.storage {
            ArrayStorage::Reference(references) => Some(references),
            ArrayStorage::Primitive(_) => None,
        }
    }

    fn check_index(&self, index: i32) -> Result<usize, ExecError> {
        if index < 0 || index as usize >= self.length {
            return Err(ExecError::ArrayIndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        Ok(index as usize)
    }

    pub fn load(&self, index: i32) -> Result<Value, ExecError> {
        let index = self.check_index(index)?;
        Ok(match &self.storage {
            ArrayStorage::Primitive(bytes) => {
                let width = self.element_width();
                Value::read(&bytes[index * width..(index + 1) * width], &self.component)
            }
            ArrayStorage::Reference(references) => Value::Reference(references[index]),
        })
    }

    pub fn store(&mut self, index: i32, value: Value) -> Result<(), ExecError> {
        let index = self.check_index(index)?;
        let width = self.element_width();
        match (&mut self.storage, value) {
            (ArrayStorage::Reference(references), Value::Reference(reference)) => {
                references[index] = reference;
            }
            (ArrayStorage::Reference(_), _) => {
                return Err(ExecError::ArrayStore {
                    value: "a primitive".to_string(),
                    component: self.component.to_string(),
                });
            }
            (ArrayStorage::Primitive(bytes), value) => {
                value.write(&mut bytes[index * width..(index + 1) * width])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_array_bounds() {
        let mut array = RuntimeArray::new(FieldType::Short, 3);
        array.store(2, Value::Int(-7)).unwrap();
        assert_eq!(array.load(2).unwrap(), Value::Int(-7));
        assert_eq!(array.bytes().unwrap().len(), 6);
        assert!(matches!(
            array.load(3),
            Err(ExecError::ArrayIndexOutOfBounds {
                index: 3,
                length: 3
            })
        ));
        assert!(array.load(-1).is_err());
    }

    #[test]
    fn test_primitive_array_rejects_wrong_width() {
        let mut array = RuntimeArray::new(FieldType::Long, 1);
        assert!(matches!(
            array.store(0, Value::Int(5)),
            Err(ExecError::ValueWidth { width: 8, .. })
        ));
        assert_eq!(array.load(0).unwrap(), Value::Long(0));
    }

    #[test]
    fn test_reference_array_rejects_primitives() {
        let mut array = RuntimeArray::new(FieldType::Object("java/lang/Object".into()), 1);
        assert_eq!(&*array.class_name, "[Ljava/lang/Object;");
        assert!(array.store(0, Value::Int(1)).is_err());
        array.store(0, Value::Reference(Reference(4))).unwrap();
        assert_eq!(array.references().unwrap(), &[Reference(4)]);
    }
}
