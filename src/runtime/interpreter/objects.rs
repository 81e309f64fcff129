//! Handlers that reach past the frame: constant loading, the heap, fields
//! and type checks.

use std::sync::Arc;

use super::{HandlerResult, Next, instructions as inst};
use crate::{
    class::ConstantPoolInfo,
    consts::{OBJECT_CLASS, T_BOOLEAN, T_BYTE, T_CHAR, T_DOUBLE, T_FLOAT, T_INT, T_LONG, T_SHORT},
    descriptor::FieldType,
    error::{BadConstant, ExecError},
    runtime::{Exception, Heap, Reference, Runtime, RuntimeArray, RuntimeField, Value},
};

/// Internal class name of a value of `field_type`, arrays by descriptor.
fn type_class_name(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Object(name) => name.clone(),
        other => other.to_descriptor(),
    }
}

/// Whether the typed array instruction `op` works on arrays of `component`.
/// The byte variants serve both `byte[]` and `boolean[]`.
fn accepts_component(op: u8, component: &FieldType) -> bool {
    match op {
        inst::IALOAD | inst::IASTORE => matches!(component, FieldType::Int),
        inst::LALOAD | inst::LASTORE => matches!(component, FieldType::Long),
        inst::FALOAD | inst::FASTORE => matches!(component, FieldType::Float),
        inst::DALOAD | inst::DASTORE => matches!(component, FieldType::Double),
        inst::AALOAD | inst::AASTORE => component.is_reference(),
        inst::BALOAD | inst::BASTORE => matches!(component, FieldType::Byte | FieldType::Boolean),
        inst::CALOAD | inst::CASTORE => matches!(component, FieldType::Char),
        inst::SALOAD | inst::SASTORE => matches!(component, FieldType::Short),
        _ => false,
    }
}

/// The array at `reference`, checked against the element type `op` expects.
fn typed_array(heap: &Heap, reference: Reference, op: u8) -> Result<&RuntimeArray, ExecError> {
    let array = heap.array(reference)?;
    if !accepts_component(op, array.component()) {
        return Err(ExecError::ArrayElementType {
            opcode: op,
            component: array.component().to_string(),
        });
    }
    Ok(array)
}

/// The element type of `anewarray`'s operand: a class or an array class.
fn component_type(name: &str) -> Result<FieldType, ExecError> {
    if name.starts_with('[') {
        Ok(FieldType::parse(name)?)
    } else {
        Ok(FieldType::Object(name.to_string()))
    }
}

impl Runtime {
    /// Whether an instance of class `source` can be stored where `target`
    /// is expected. Arrays are covariant in reference components.
    pub(crate) fn is_assignable(&self, source: &str, target: &str) -> bool {
        if source == target || target == OBJECT_CLASS {
            return true;
        }
        if let Some(source_component) = FieldType::from_array_class(source) {
            let Some(target_component) = FieldType::from_array_class(target) else {
                return false;
            };
            return match (&source_component, &target_component) {
                (FieldType::Object(_) | FieldType::Array(_), FieldType::Object(_))
                | (FieldType::Array(_), FieldType::Array(_)) => self.is_assignable(
                    &type_class_name(&source_component),
                    &type_class_name(&target_component),
                ),
                _ => false,
            };
        }
        self.method_area
            .get(source)
            .is_some_and(|class| class.is_subclass_of(target))
    }

    /// `instanceof` for a non-null reference.
    pub(crate) fn is_instance_of(
        &self,
        reference: Reference,
        target: &str,
    ) -> Result<bool, ExecError> {
        let class_name = self.heap.class_name(reference)?;
        Ok(self.is_assignable(&class_name, target))
    }

    /// The field named by the `Fieldref` at `index` of the current class.
    /// `None` when resolving scheduled static initializers.
    fn resolve_field(&mut self, index: u16) -> Result<Option<Arc<RuntimeField>>, Exception> {
        let class = Arc::clone(self.thread.top()?.class());
        let member = class.class_file().constant_pool().field_ref(index)?;
        let Some(target) = self.resolve_class(member.class_name)? else {
            return Ok(None);
        };
        let field = target
            .find_field(member.name, member.descriptor)
            .ok_or_else(|| ExecError::FieldNotFound {
                class: member.class_name.to_string(),
                name: member.name.to_string(),
                descriptor: member.descriptor.to_string(),
            })?;
        Ok(Some(field))
    }

    fn new_multi_array(
        &mut self,
        component: &FieldType,
        counts: &[i32],
    ) -> Result<Reference, ExecError> {
        let length = counts[0];
        if length < 0 {
            return Err(ExecError::NegativeArraySize(length));
        }
        let array = self.heap.allocate_array(component.clone(), length as usize)?;
        if let (FieldType::Array(inner), [_, rest @ ..]) = (component, counts) {
            if !rest.is_empty() {
                for index in 0..length {
                    let sub_array = self.new_multi_array(inner, rest)?;
                    self.heap
                        .array_mut(array)?
                        .store(index, Value::Reference(sub_array))?;
                }
            }
        }
        Ok(array)
    }
}

pub(super) fn ldc(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = runtime.thread.top()?;
    let (index, length) = match op {
        inst::LDC => (frame.u8_at(1)? as u16, 2),
        _ => (frame.u16_at(1)?, 3),
    };
    let class = Arc::clone(frame.class());
    let pool = class.class_file().constant_pool();
    let value = match pool.get(index) {
        Some(ConstantPoolInfo::Integer(value)) => Value::Int(*value),
        Some(ConstantPoolInfo::Float(value)) => Value::Float(*value),
        Some(ConstantPoolInfo::Long(value)) => Value::Long(*value),
        Some(ConstantPoolInfo::Double(value)) => Value::Double(*value),
        Some(ConstantPoolInfo::String { .. }) => {
            let string = pool.string(index)?;
            let depth = runtime.thread.depth();
            let string_class = runtime.string_class()?;
            if runtime.thread.depth() != depth {
                return Ok(Next::Stay);
            }
            Value::Reference(runtime.heap.intern(string, &string_class)?)
        }
        _ => return Err(BadConstant::new(index, "loadable constant").into()),
    };
    runtime.thread.top_mut()?.push_value(value);
    Ok(Next::Advance(length))
}

// arrays

pub(super) fn array_load(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let index = frame.pop_int()?;
    let array = frame.pop_ref()?;
    if array.is_null() {
        return Err(ExecError::NullReference("array load").into());
    }
    let value = typed_array(&runtime.heap, array, op)?.load(index)?;
    frame.push_value(value);
    Ok(Next::Advance(1))
}

pub(super) fn array_store(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let value = match op {
        inst::LASTORE => Value::Long(frame.pop_long()?),
        inst::FASTORE => Value::Float(frame.pop_float()?),
        inst::DASTORE => Value::Double(frame.pop_double()?),
        inst::AASTORE => Value::Reference(frame.pop_ref()?),
        _ => Value::Int(frame.pop_int()?),
    };
    let index = frame.pop_int()?;
    let array = frame.pop_ref()?;
    if array.is_null() {
        return Err(ExecError::NullReference("array store").into());
    }
    typed_array(&runtime.heap, array, op)?;
    if let Value::Reference(reference) = value {
        if !reference.is_null() {
            let component = type_class_name(runtime.heap.array(array)?.component());
            if !runtime.is_instance_of(reference, &component)? {
                return Err(ExecError::ArrayStore {
                    value: runtime.heap.class_name(reference)?,
                    component,
                }
                .into());
            }
        }
    }
    runtime.heap.array_mut(array)?.store(index, value)?;
    Ok(Next::Advance(1))
}

pub(super) fn arraylength(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let array = frame.pop_ref()?;
    if array.is_null() {
        return Err(ExecError::NullReference("arraylength").into());
    }
    let length = runtime.heap.array(array)?.len();
    frame.push_int(length as i32);
    Ok(Next::Advance(1))
}

pub(super) fn newarray(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let component = match frame.u8_at(1)? {
        T_BOOLEAN => FieldType::Boolean,
        T_CHAR => FieldType::Char,
        T_FLOAT => FieldType::Float,
        T_DOUBLE => FieldType::Double,
        T_BYTE => FieldType::Byte,
        T_SHORT => FieldType::Short,
        T_INT => FieldType::Int,
        T_LONG => FieldType::Long,
        other => return Err(ExecError::InvalidArrayType(other).into()),
    };
    let length = frame.pop_int()?;
    if length < 0 {
        return Err(ExecError::NegativeArraySize(length).into());
    }
    let array = runtime.heap.allocate_array(component, length as usize)?;
    frame.push_ref(array);
    Ok(Next::Advance(2))
}

pub(super) fn anewarray(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let index = frame.index_operand()?;
    let component = component_type(&frame.constant_class_name(index)?)?;
    let length = frame.pop_int()?;
    if length < 0 {
        return Err(ExecError::NegativeArraySize(length).into());
    }
    let array = runtime.heap.allocate_array(component, length as usize)?;
    frame.push_ref(array);
    Ok(Next::Advance(3))
}

pub(super) fn multianewarray(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top_mut()?;
    let index = frame.index_operand()?;
    let class_name = frame.constant_class_name(index)?;
    let dimensions = frame.u8_at(3)? as usize;
    let component = FieldType::from_array_class(&class_name)
        .ok_or(BadConstant::new(index, "array class"))?;
    let counts = frame
        .pop_slots(dimensions)?
        .into_iter()
        .map(|count| count.as_int())
        .collect::<Vec<_>>();
    if counts.is_empty() {
        return Err(BadConstant::new(index, "array class").into());
    }
    let array = runtime.new_multi_array(&component, &counts)?;
    runtime.thread.top_mut()?.push_ref(array);
    Ok(Next::Advance(4))
}

// objects

pub(super) fn new(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top()?;
    let class_name = frame.constant_class_name(frame.index_operand()?)?;
    let Some(class) = runtime.resolve_class(&class_name)? else {
        return Ok(Next::Stay);
    };
    let object = runtime.heap.allocate_object(class)?;
    runtime.thread.top_mut()?.push_ref(object);
    Ok(Next::Advance(3))
}

pub(super) fn getstatic(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let index = runtime.thread.top()?.index_operand()?;
    let Some(field) = runtime.resolve_field(index)? else {
        return Ok(Next::Stay);
    };
    let owner = field
        .owner()
        .ok_or_else(|| ExecError::ClassUnloaded(field.name().to_string()))?;
    let value = owner.get_static(&field);
    runtime.thread.top_mut()?.push_value(value);
    Ok(Next::Advance(3))
}

pub(super) fn putstatic(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let index = runtime.thread.top()?.index_operand()?;
    let Some(field) = runtime.resolve_field(index)? else {
        return Ok(Next::Stay);
    };
    let owner = field
        .owner()
        .ok_or_else(|| ExecError::ClassUnloaded(field.name().to_string()))?;
    let value = runtime.thread.top_mut()?.pop_value(field.field_type())?;
    owner.put_static(&field, value)?;
    Ok(Next::Advance(3))
}

/// Checks that `object` really has `field` before touching its bytes.
fn check_field_owner(
    runtime: &Runtime,
    object: Reference,
    field: &RuntimeField,
) -> Result<(), ExecError> {
    let owner = field
        .owner()
        .ok_or_else(|| ExecError::ClassUnloaded(field.name().to_string()))?;
    if runtime.heap.object(object)?.class().is_subclass_of(owner.name()) {
        Ok(())
    } else {
        Err(ExecError::ClassCast {
            value: runtime.heap.class_name(object)?,
            target: owner.name().to_string(),
        })
    }
}

pub(super) fn getfield(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let index = runtime.thread.top()?.index_operand()?;
    let Some(field) = runtime.resolve_field(index)? else {
        return Ok(Next::Stay);
    };
    let object = runtime.thread.top_mut()?.pop_ref()?;
    if object.is_null() {
        return Err(ExecError::NullReference("getfield").into());
    }
    check_field_owner(runtime, object, &field)?;
    let value = runtime.heap.object(object)?.get_field(&field);
    runtime.thread.top_mut()?.push_value(value);
    Ok(Next::Advance(3))
}

pub(super) fn putfield(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let index = runtime.thread.top()?.index_operand()?;
    let Some(field) = runtime.resolve_field(index)? else {
        return Ok(Next::Stay);
    };
    let frame = runtime.thread.top_mut()?;
    let value = frame.pop_value(field.field_type())?;
    let object = frame.pop_ref()?;
    if object.is_null() {
        return Err(ExecError::NullReference("putfield").into());
    }
    check_field_owner(runtime, object, &field)?;
    runtime.heap.object_mut(object)?.put_field(&field, value)?;
    Ok(Next::Advance(3))
}

pub(super) fn athrow(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let exception = runtime.thread.top_mut()?.pop_ref()?;
    if exception.is_null() {
        return Err(ExecError::NullReference("athrow").into());
    }
    Err(Exception::Thrown(exception))
}

pub(super) fn checkcast(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top()?;
    let target = frame.constant_class_name(frame.index_operand()?)?;
    let object = frame.peek(0)?.as_reference();
    if !object.is_null() && !runtime.is_instance_of(object, &target)? {
        return Err(ExecError::ClassCast {
            value: runtime.heap.class_name(object)?,
            target: target.to_string(),
        }
        .into());
    }
    Ok(Next::Advance(3))
}

pub(super) fn instanceof(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let frame = runtime.thread.top()?;
    let target = frame.constant_class_name(frame.index_operand()?)?;
    let object = frame.peek(0)?.as_reference();
    let result = !object.is_null() && runtime.is_instance_of(object, &target)?;
    let frame = runtime.thread.top_mut()?;
    frame.pop()?;
    frame.push_int(result as i32);
    Ok(Next::Advance(3))
}

/// Monitors are no-ops on a single thread, but still reject null.
pub(super) fn monitor(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let object = runtime.thread.top_mut()?.pop_ref()?;
    if object.is_null() {
        return Err(ExecError::NullReference("monitor").into());
    }
    Ok(Next::Advance(1))
}
