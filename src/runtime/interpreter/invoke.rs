use std::sync::Arc;

use log::debug;

use super::{HandlerResult, Next, instructions as inst};
use crate::{
    consts::OBJECT_CLASS,
    descriptor::MethodDescriptor,
    error::ExecError,
    runtime::{
        Exception, Frame, HeapObject, NativeEnv, NativeRegistry, NativeVariable, Runtime,
        RuntimeMethod, Variable, native::decode_args,
    },
};

impl Runtime {
    /// Pops the arguments of `method` off the current frame and either runs
    /// its native binding to completion or pushes a frame for it. `advance`
    /// is the length of the invoking instruction.
    pub(crate) fn invoke_method(
        &mut self,
        method: Arc<RuntimeMethod>,
        advance: usize,
    ) -> HandlerResult {
        if method.is_abstract() {
            return Err(ExecError::AbstractMethod(method.signature()).into());
        }
        let args = self.thread.top_mut()?.pop_slots(method.arg_slots())?;
        if method.is_native() || method.code().is_none() {
            let result = self.invoke_native(&method, &args)?;
            self.thread.top_mut()?.push_slots(&result);
            return Ok(Next::Advance(advance));
        }
        if self.thread.depth() >= self.config.max_call_depth {
            return Err(ExecError::StackOverflow(self.config.max_call_depth).into());
        }
        self.thread.push(Frame::new(method, args, advance)?);
        Ok(Next::Stay)
    }

    fn invoke_native(
        &mut self,
        method: &RuntimeMethod,
        args: &[Variable],
    ) -> Result<Vec<Variable>, Exception> {
        let class = method
            .owner()
            .ok_or_else(|| ExecError::ClassUnloaded(method.signature()))?;
        let key = NativeRegistry::key(class.name(), method.name(), method.descriptor());
        let Some(function) = self.natives.get(&key) else {
            return Err(if method.is_native() {
                ExecError::NativeNotFound(key)
            } else {
                ExecError::NoCode(method.signature())
            }
            .into());
        };
        debug!("native {key}");
        let env = NativeEnv {
            args: decode_args(method.parsed_descriptor(), method.is_static(), args),
            heap: &mut self.heap,
            out: &mut *self.out,
            class,
        };
        let result = function(env)?;
        Ok(result.map(NativeVariable::into_slots).unwrap_or_default())
    }
}

/// `invokestatic` and `invokespecial`: the method is looked up in the
/// referenced class and its ancestors.
pub(super) fn invoke_static(runtime: &mut Runtime, _op: u8) -> HandlerResult {
    let class = Arc::clone(runtime.thread.top()?.class());
    let index = runtime.thread.top()?.index_operand()?;
    let member = class.class_file().constant_pool().method_ref(index)?;
    let Some(target) = runtime.resolve_class(member.class_name)? else {
        return Ok(Next::Stay);
    };
    let method = target
        .find_method(member.name, member.descriptor)
        .ok_or_else(|| ExecError::MethodNotFound {
            class: member.class_name.to_string(),
            name: member.name.to_string(),
            descriptor: member.descriptor.to_string(),
        })?;
    runtime.invoke_method(method, 3)
}

/// `invokevirtual` and `invokeinterface`: the method is looked up in the
/// receiver's runtime class.
pub(super) fn invoke_virtual(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let class = Arc::clone(runtime.thread.top()?.class());
    let index = runtime.thread.top()?.index_operand()?;
    let member = class.class_file().constant_pool().method_ref(index)?;
    let descriptor = MethodDescriptor::parse(member.descriptor)?;
    let receiver = runtime
        .thread
        .top()?
        .peek(descriptor.arg_slots(true))?
        .as_reference();
    if receiver.is_null() {
        return Err(ExecError::NullReference("invoke").into());
    }
    let receiver_class = match runtime.heap.get(receiver)? {
        HeapObject::Object(object) => Some(Arc::clone(object.class())),
        HeapObject::Array(_) => None,
    };
    // arrays only inherit Object's methods
    let receiver_class = match receiver_class {
        Some(class) => class,
        None => runtime.load_class(OBJECT_CLASS)?,
    };
    let method = receiver_class
        .find_method(member.name, member.descriptor)
        .ok_or_else(|| ExecError::MethodNotFound {
            class: receiver_class.name().to_string(),
            name: member.name.to_string(),
            descriptor: member.descriptor.to_string(),
        })?;
    let advance = if op == inst::INVOKEINTERFACE { 5 } else { 3 };
    runtime.invoke_method(method, advance)
}

/// Every return opcode: the result slots move to the caller, whose pc then
/// moves past its invoke instruction.
pub(super) fn return_value(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let slots = match op {
        inst::LRETURN | inst::DRETURN => 2,
        inst::RETURN => 0,
        _ => 1,
    };
    let mut frame = runtime.thread.pop()?;
    let result = frame.pop_slots(slots)?;
    match runtime.thread.top_mut() {
        Ok(caller) => {
            caller.push_slots(&result);
            caller.advance(frame.return_advance());
        }
        Err(_) => runtime.thread.set_last_return(result),
    }
    Ok(Next::Stay)
}

pub(super) fn invokedynamic(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let pc = runtime.thread.top()?.pc();
    Err(ExecError::UnknownOpcode { opcode: op, pc }.into())
}
