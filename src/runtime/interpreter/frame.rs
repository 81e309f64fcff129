use std::sync::Arc;

use crate::{
    class::CodeAttribute,
    descriptor::FieldType,
    error::{BadConstant, ExecError},
    runtime::{Reference, RuntimeClass, RuntimeMethod, Value, Variable},
};

/// The single call stack a [`Runtime`](crate::Runtime) executes on.
#[derive(Debug, Default)]
pub struct Thread {
    frames: Vec<Frame>,
    // result slots of the last method that returned with no caller
    last_return: Vec<Variable>,
}

/// Locals, operand stack and program counter of one method invocation.
#[derive(Debug)]
pub struct Frame {
    class: Arc<RuntimeClass>,
    method: Arc<RuntimeMethod>,
    code: Arc<CodeAttribute>,
    locals: Vec<Variable>,
    stack: Vec<Variable>,
    pc: usize,
    /// Added to the caller's pc once this frame returns: the length of the
    /// invoke instruction, or 0 when the caller must re-execute.
    return_advance: usize,
}

impl Thread {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn top(&self) -> Result<&Frame, ExecError> {
        self.frames.last().ok_or(ExecError::NoFrame)
    }

    pub fn top_mut(&mut self) -> Result<&mut Frame, ExecError> {
        self.frames.last_mut().ok_or(ExecError::NoFrame)
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        log::trace!("push frame {}", frame.method.signature());
        self.frames.push(frame);
    }

    pub(crate) fn insert(&mut self, index: usize, frame: Frame) {
        log::trace!("insert frame {} at {index}", frame.method.signature());
        self.frames.insert(index.min(self.frames.len()), frame);
    }

    pub(crate) fn pop(&mut self) -> Result<Frame, ExecError> {
        let frame = self.frames.pop().ok_or(ExecError::NoFrame)?;
        log::trace!("pop frame {}", frame.method.signature());
        Ok(frame)
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn last_return(&self) -> &[Variable] {
        &self.last_return
    }

    pub(crate) fn set_last_return(&mut self, slots: Vec<Variable>) {
        self.last_return = slots;
    }

    pub(crate) fn take_last_return(&mut self) -> Vec<Variable> {
        std::mem::take(&mut self.last_return)
    }
}

impl Frame {
    /// A frame for `method` with `args` in its first local slots.
    pub fn new(
        method: Arc<RuntimeMethod>,
        args: Vec<Variable>,
        return_advance: usize,
    ) -> Result<Frame, ExecError> {
        let code = method
            .code()
            .cloned()
            .ok_or_else(|| ExecError::NoCode(method.signature()))?;
        let class = method
            .owner()
            .ok_or_else(|| ExecError::ClassUnloaded(method.signature()))?;
        Ok(Frame::with_code(class, method, code, args, return_advance))
    }

    pub(crate) fn with_code(
        class: Arc<RuntimeClass>,
        method: Arc<RuntimeMethod>,
        code: Arc<CodeAttribute>,
        mut locals: Vec<Variable>,
        return_advance: usize,
    ) -> Frame {
        let max_locals = (code.max_locals as usize).max(locals.len());
        locals.resize(max_locals, Variable::default());
        let stack = Vec::with_capacity(code.max_stack as usize);
        Frame {
            class,
            method,
            code,
            locals,
            stack,
            pc: 0,
            return_advance,
        }
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn method(&self) -> &Arc<RuntimeMethod> {
        &self.method
    }

    pub fn code(&self) -> &Arc<CodeAttribute> {
        &self.code
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn locals(&self) -> &[Variable] {
        &self.locals
    }

    pub fn stack(&self) -> &[Variable] {
        &self.stack
    }

    pub(crate) fn return_advance(&self) -> usize {
        self.return_advance
    }

    pub(crate) fn advance(&mut self, offset: usize) {
        self.pc += offset;
    }

    pub(crate) fn jump(&mut self, target: usize) {
        self.pc = target;
    }

    /// `pc + offset` as a branch target.
    pub(crate) fn branch_target(&self, offset: i32) -> Result<usize, ExecError> {
        let target = self.pc as i64 + offset as i64;
        if target < 0 || target as usize >= self.code.code.len() {
            return Err(ExecError::TruncatedCode(self.pc));
        }
        Ok(target as usize)
    }

    // instruction stream

    pub(crate) fn u8_at(&self, offset: usize) -> Result<u8, ExecError> {
        self.code
            .code
            .get(self.pc + offset)
            .copied()
            .ok_or(ExecError::TruncatedCode(self.pc))
    }

    pub(crate) fn i8_at(&self, offset: usize) -> Result<i8, ExecError> {
        Ok(self.u8_at(offset)? as i8)
    }

    pub(crate) fn u16_at(&self, offset: usize) -> Result<u16, ExecError> {
        Ok(u16::from_be_bytes([self.u8_at(offset)?, self.u8_at(offset + 1)?]))
    }

    pub(crate) fn i16_at(&self, offset: usize) -> Result<i16, ExecError> {
        Ok(self.u16_at(offset)? as i16)
    }

    pub(crate) fn i32_at(&self, offset: usize) -> Result<i32, ExecError> {
        Ok(i32::from_be_bytes([
            self.u8_at(offset)?,
            self.u8_at(offset + 1)?,
            self.u8_at(offset + 2)?,
            self.u8_at(offset + 3)?,
        ]))
    }

    /// The pool index operand of the instruction at pc.
    pub(crate) fn index_operand(&self) -> Result<u16, ExecError> {
        self.u16_at(1)
    }

    pub(crate) fn constant_class_name(&self, index: u16) -> Result<Arc<str>, BadConstant> {
        self.class
            .class_file()
            .constant_pool()
            .class_name(index)
            .cloned()
    }

    /// First exception table entry covering pc that catches an instance of
    /// `thrown`.
    pub(crate) fn find_handler(
        &self,
        thrown: Option<&RuntimeClass>,
        thrown_name: &str,
    ) -> Result<Option<usize>, ExecError> {
        for entry in &self.code.exception_table {
            if !entry.covers(self.pc) {
                continue;
            }
            if entry.catch_type == 0 {
                return Ok(Some(entry.handler_pc as usize));
            }
            let catch_type = self.constant_class_name(entry.catch_type)?;
            let catches = &*catch_type == thrown_name
                || thrown.is_some_and(|class| class.is_subclass_of(&catch_type));
            if catches {
                return Ok(Some(entry.handler_pc as usize));
            }
        }
        Ok(None)
    }

    // operand stack

    pub(crate) fn push(&mut self, value: Variable) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Variable, ExecError> {
        self.stack.pop().ok_or(ExecError::StackUnderflow)
    }

    /// The slot `depth` entries below the top.
    pub(crate) fn peek(&self, depth: usize) -> Result<Variable, ExecError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|index| self.stack[index])
            .ok_or(ExecError::StackUnderflow)
    }

    /// Pops `count` slots, keeping their stack order.
    pub(crate) fn pop_slots(&mut self, count: usize) -> Result<Vec<Variable>, ExecError> {
        let at = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(ExecError::StackUnderflow)?;
        Ok(self.stack.split_off(at))
    }

    pub(crate) fn push_slots(&mut self, slots: &[Variable]) {
        self.stack.extend_from_slice(slots);
    }

    pub(crate) fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn push_int(&mut self, value: i32) {
        self.push(Variable::int(value));
    }

    pub(crate) fn pop_int(&mut self) -> Result<i32, ExecError> {
        Ok(self.pop()?.as_int())
    }

    pub(crate) fn push_float(&mut self, value: f32) {
        self.push(Variable::float(value));
    }

    pub(crate) fn pop_float(&mut self) -> Result<f32, ExecError> {
        Ok(self.pop()?.as_float())
    }

    pub(crate) fn push_long(&mut self, value: i64) {
        let (upper, lower) = Variable::put_long(value);
        self.push(upper);
        self.push(lower);
    }

    pub(crate) fn pop_long(&mut self) -> Result<i64, ExecError> {
        let lower = self.pop()?;
        let upper = self.pop()?;
        Ok(Variable::get_long(upper, lower))
    }

    pub(crate) fn push_double(&mut self, value: f64) {
        let (upper, lower) = Variable::put_double(value);
        self.push(upper);
        self.push(lower);
    }

    pub(crate) fn pop_double(&mut self) -> Result<f64, ExecError> {
        let lower = self.pop()?;
        let upper = self.pop()?;
        Ok(Variable::get_double(upper, lower))
    }

    pub(crate) fn push_ref(&mut self, value: Reference) {
        self.push(Variable::reference(value));
    }

    pub(crate) fn pop_ref(&mut self) -> Result<Reference, ExecError> {
        Ok(self.pop()?.as_reference())
    }

    pub(crate) fn push_value(&mut self, value: Value) {
        match value {
            Value::Int(value) => self.push_int(value),
            Value::Long(value) => self.push_long(value),
            Value::Float(value) => self.push_float(value),
            Value::Double(value) => self.push_double(value),
            Value::Reference(value) => self.push_ref(value),
        }
    }

    /// Pops a value of `field_type`; sub-int types come off as ints.
    pub(crate) fn pop_value(&mut self, field_type: &FieldType) -> Result<Value, ExecError> {
        Ok(match field_type {
            FieldType::Long => Value::Long(self.pop_long()?),
            FieldType::Double => Value::Double(self.pop_double()?),
            FieldType::Float => Value::Float(self.pop_float()?),
            FieldType::Object(_) | FieldType::Array(_) => Value::Reference(self.pop_ref()?),
            _ => Value::Int(self.pop_int()?),
        })
    }

    // locals

    pub(crate) fn load(&self, index: usize) -> Result<Variable, ExecError> {
        self.locals
            .get(index)
            .copied()
            .ok_or(ExecError::LocalOutOfRange(index))
    }

    pub(crate) fn store(&mut self, index: usize, value: Variable) -> Result<(), ExecError> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(ExecError::LocalOutOfRange(index))?;
        *slot = value;
        Ok(())
    }

    /// Pushes `slots` consecutive locals starting at `index`.
    pub(crate) fn load_slots(&mut self, index: usize, slots: usize) -> Result<(), ExecError> {
        for i in index..index + slots {
            let value = self.load(i)?;
            self.push(value);
        }
        Ok(())
    }

    /// Pops the top `slots` stack entries into the locals starting at `index`.
    pub(crate) fn store_slots(&mut self, index: usize, slots: usize) -> Result<(), ExecError> {
        let values = self.pop_slots(slots)?;
        for (i, value) in values.into_iter().enumerate() {
            self.store(index + i, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_without_frames() {
        let mut thread = Thread::default();
        assert_eq!(thread.depth(), 0);
        assert!(matches!(thread.top(), Err(ExecError::NoFrame)));
        assert!(matches!(thread.pop(), Err(ExecError::NoFrame)));
        thread.set_last_return(vec![Variable::int(5)]);
        assert_eq!(thread.take_last_return(), vec![Variable::int(5)]);
        assert!(thread.last_return().is_empty());
    }
}
