mod frame;
pub mod instructions;
mod invoke;
mod objects;
mod ops;

use log::{debug, trace, warn};

pub use frame::*;

use crate::{
    error::{ExecError, RuntimeError},
    runtime::{Exception, Reference, Runtime},
};

use instructions as inst;

/// Where execution continues after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// The instruction `n` bytes further in the same frame.
    Advance(usize),
    /// An absolute offset in the same frame.
    Jump(usize),
    /// The call stack changed and every pc already points where it should:
    /// a frame was pushed or popped, or static initializers were scheduled
    /// in front of an instruction that has to run again.
    Stay,
}

pub(crate) type HandlerResult = Result<Next, Exception>;

/// A handler gets the runtime and the opcode it was dispatched for, so
/// one function can serve a whole opcode family.
type Handler = fn(&mut Runtime, u8) -> HandlerResult;

fn unknown(runtime: &mut Runtime, op: u8) -> HandlerResult {
    let pc = runtime.thread.top()?.pc();
    Err(ExecError::UnknownOpcode { opcode: op, pc }.into())
}

const fn dispatch_table() -> [Handler; 256] {
    let mut table: [Handler; 256] = [unknown; 256];

    macro_rules! set {
        ($($op:expr),+ => $handler:expr) => {
            $(table[$op as usize] = $handler;)+
        };
        ($from:expr ; $to:expr => $handler:expr) => {{
            let mut op = $from as usize;
            while op <= $to as usize {
                table[op] = $handler;
                op += 1;
            }
        }};
    }

    set!(inst::NOP => ops::nop);
    set!(inst::ACONST_NULL => ops::aconst_null);
    set!(inst::ICONST_M1; inst::ICONST_5 => ops::iconst);
    set!(inst::LCONST_0, inst::LCONST_1 => ops::lconst);
    set!(inst::FCONST_0; inst::FCONST_2 => ops::fconst);
    set!(inst::DCONST_0, inst::DCONST_1 => ops::dconst);
    set!(inst::BIPUSH => ops::bipush);
    set!(inst::SIPUSH => ops::sipush);
    set!(inst::LDC, inst::LDC_W, inst::LDC2_W => objects::ldc);

    set!(inst::ILOAD; inst::ALOAD => ops::load);
    set!(inst::ILOAD_0; inst::ALOAD_3 => ops::load_n);
    set!(inst::IALOAD; inst::SALOAD => objects::array_load);
    set!(inst::ISTORE; inst::ASTORE => ops::store);
    set!(inst::ISTORE_0; inst::ASTORE_3 => ops::store_n);
    set!(inst::IASTORE; inst::SASTORE => objects::array_store);

    set!(inst::POP, inst::POP2 => ops::pop);
    set!(inst::DUP; inst::DUP2_X2 => ops::dup);
    set!(inst::SWAP => ops::swap);

    set!(inst::IADD => ops::iadd);
    set!(inst::LADD => ops::ladd);
    set!(inst::FADD => ops::fadd);
    set!(inst::DADD => ops::dadd);
    set!(inst::ISUB => ops::isub);
    set!(inst::LSUB => ops::lsub);
    set!(inst::FSUB => ops::fsub);
    set!(inst::DSUB => ops::dsub);
    set!(inst::IMUL => ops::imul);
    set!(inst::LMUL => ops::lmul);
    set!(inst::FMUL => ops::fmul);
    set!(inst::DMUL => ops::dmul);
    set!(inst::IDIV => ops::idiv);
    set!(inst::LDIV => ops::ldiv);
    set!(inst::FDIV => ops::fdiv);
    set!(inst::DDIV => ops::ddiv);
    set!(inst::IREM => ops::irem);
    set!(inst::LREM => ops::lrem);
    set!(inst::FREM => ops::frem);
    set!(inst::DREM => ops::drem);
    set!(inst::INEG => ops::ineg);
    set!(inst::LNEG => ops::lneg);
    set!(inst::FNEG => ops::fneg);
    set!(inst::DNEG => ops::dneg);
    set!(inst::ISHL => ops::ishl);
    set!(inst::LSHL => ops::lshl);
    set!(inst::ISHR => ops::ishr);
    set!(inst::LSHR => ops::lshr);
    set!(inst::IUSHR => ops::iushr);
    set!(inst::LUSHR => ops::lushr);
    set!(inst::IAND => ops::iand);
    set!(inst::LAND => ops::land);
    set!(inst::IOR => ops::ior);
    set!(inst::LOR => ops::lor);
    set!(inst::IXOR => ops::ixor);
    set!(inst::LXOR => ops::lxor);
    set!(inst::IINC => ops::iinc);

    set!(inst::I2L => ops::i2l);
    set!(inst::I2F => ops::i2f);
    set!(inst::I2D => ops::i2d);
    set!(inst::L2I => ops::l2i);
    set!(inst::L2F => ops::l2f);
    set!(inst::L2D => ops::l2d);
    set!(inst::F2I => ops::f2i);
    set!(inst::F2L => ops::f2l);
    set!(inst::F2D => ops::f2d);
    set!(inst::D2I => ops::d2i);
    set!(inst::D2L => ops::d2l);
    set!(inst::D2F => ops::d2f);
    set!(inst::I2B => ops::i2b);
    set!(inst::I2C => ops::i2c);
    set!(inst::I2S => ops::i2s);

    set!(inst::LCMP => ops::lcmp);
    set!(inst::FCMPL => ops::fcmpl);
    set!(inst::FCMPG => ops::fcmpg);
    set!(inst::DCMPL => ops::dcmpl);
    set!(inst::DCMPG => ops::dcmpg);
    set!(inst::IFEQ; inst::IFLE => ops::if_zero);
    set!(inst::IF_ICMPEQ; inst::IF_ICMPLE => ops::if_icmp);
    set!(inst::IF_ACMPEQ, inst::IF_ACMPNE => ops::if_acmp);
    set!(inst::IFNULL, inst::IFNONNULL => ops::if_null);
    set!(inst::GOTO, inst::GOTO_W => ops::goto);
    set!(inst::JSR, inst::JSR_W => ops::jsr);
    set!(inst::RET => ops::ret);
    set!(inst::TABLESWITCH => ops::tableswitch);
    set!(inst::LOOKUPSWITCH => ops::lookupswitch);
    set!(inst::WIDE => ops::wide);

    set!(inst::IRETURN; inst::RETURN => invoke::return_value);
    set!(inst::INVOKEVIRTUAL, inst::INVOKEINTERFACE => invoke::invoke_virtual);
    set!(inst::INVOKESPECIAL, inst::INVOKESTATIC => invoke::invoke_static);
    set!(inst::INVOKEDYNAMIC => invoke::invokedynamic);

    set!(inst::GETSTATIC => objects::getstatic);
    set!(inst::PUTSTATIC => objects::putstatic);
    set!(inst::GETFIELD => objects::getfield);
    set!(inst::PUTFIELD => objects::putfield);
    set!(inst::NEW => objects::new);
    set!(inst::NEWARRAY => objects::newarray);
    set!(inst::ANEWARRAY => objects::anewarray);
    set!(inst::MULTIANEWARRAY => objects::multianewarray);
    set!(inst::ARRAYLENGTH => objects::arraylength);
    set!(inst::ATHROW => objects::athrow);
    set!(inst::CHECKCAST => objects::checkcast);
    set!(inst::INSTANCEOF => objects::instanceof);
    set!(inst::MONITORENTER, inst::MONITOREXIT => objects::monitor);

    table
}

static DISPATCH: [Handler; 256] = dispatch_table();

impl Runtime {
    /// Steps the thread until its call stack is empty. A fatal error or an
    /// uncaught exception discards every remaining frame.
    pub(crate) fn run(&mut self) -> Result<(), RuntimeError> {
        while self.thread.depth() > 0 {
            let result = match self.step() {
                Ok(()) => Ok(()),
                Err(Exception::Thrown(exception)) => self.dispatch_exception(exception),
                Err(Exception::Fatal(err)) => {
                    if let Ok(frame) = self.thread.top() {
                        warn!(
                            "{} failed at pc {}: {err}",
                            frame.method().signature(),
                            frame.pc()
                        );
                    }
                    Err(err.into())
                }
            };
            if let Err(err) = result {
                self.thread.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Executes the instruction at the top frame's pc.
    fn step(&mut self) -> Result<(), Exception> {
        let frame = self.thread.top()?;
        let op = frame.u8_at(0)?;
        trace!("{} @{}: {op:#04x}", frame.method().signature(), frame.pc());
        match DISPATCH[op as usize](self, op)? {
            Next::Advance(length) => self.thread.top_mut()?.advance(length),
            Next::Jump(target) => self.thread.top_mut()?.jump(target),
            Next::Stay => {}
        }
        Ok(())
    }

    /// Unwinds to the nearest handler whose range covers the pc of its frame
    /// and whose catch type matches the thrown object.
    fn dispatch_exception(&mut self, exception: Reference) -> Result<(), RuntimeError> {
        let class_name = self.heap.class_name(exception)?;
        let class = self.method_area.get(&class_name);
        while let Ok(frame) = self.thread.top_mut() {
            if let Some(handler) = frame.find_handler(class.as_deref(), &class_name)? {
                debug!(
                    "{class_name} caught in {} at pc {handler}",
                    frame.method().signature()
                );
                frame.clear_stack();
                frame.push_ref(exception);
                frame.jump(handler);
                return Ok(());
            }
            let frame = self.thread.pop()?;
            debug!(
                "{class_name} propagates out of {}",
                frame.method().signature()
            );
        }
        Err(RuntimeError::Uncaught {
            class_name,
            reference: exception,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        class::{ClassWriter, MethodBody},
        consts::{MethodAccessFlag, OBJECT_CLASS},
        runtime::{MemoryClassPath, RuntimeConfig, Variable},
    };

    #[test]
    fn test_dispatch_replaces_operands_with_the_exception() {
        let mut writer = ClassWriter::new("Catcher", Some(OBJECT_CLASS));
        let code = vec![inst::NOP, inst::NOP, inst::NOP, inst::ATHROW, inst::POP, inst::RETURN];
        let body = MethodBody::new(3, 0, code).with_handler(0, 4, 4, 0);
        writer.add_method(MethodAccessFlag::STATIC, "run", "()V", Some(body));
        let mut classes = MemoryClassPath::new();
        classes.insert_class("Catcher", writer);
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        runtime.add_class_path(Box::new(classes));

        let class = runtime.load_class("Catcher").unwrap();
        let object_class = runtime.load_class(OBJECT_CLASS).unwrap();
        runtime.thread.clear();
        let exception = runtime.heap.allocate_object(object_class).unwrap();
        let method = Arc::clone(class.method("run", "()V").unwrap());
        let mut frame = Frame::new(method, vec![], 0).unwrap();
        frame.push_int(1);
        frame.push_int(2);
        frame.advance(3);
        runtime.thread.push(frame);

        runtime.dispatch_exception(exception).unwrap();
        let frame = runtime.thread.top().unwrap();
        assert_eq!(frame.pc(), 4);
        assert_eq!(frame.stack(), &[Variable::reference(exception)]);
    }

    #[test]
    fn test_every_defined_opcode_has_a_handler() {
        // invokedynamic has its own handler that always fails
        for op in (0..=inst::JSR_W).filter(|&op| op != inst::INVOKEDYNAMIC) {
            assert!(
                DISPATCH[op as usize] as usize != unknown as usize,
                "opcode {op:#04x} is not dispatched"
            );
        }
        assert_eq!(DISPATCH[inst::BREAKPOINT as usize] as usize, unknown as usize);
        assert_eq!(DISPATCH[inst::IMPDEP2 as usize] as usize, unknown as usize);
    }
}
