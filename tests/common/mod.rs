#![allow(dead_code)]

use std::{io, sync::Arc};

use minijvm::{
    Runtime, RuntimeConfig,
    class::{ClassWriter, MethodBody},
    consts::{INIT_NAME, MethodAccessFlag, OBJECT_CLASS},
    runtime::{MemoryClassPath, instructions as inst},
};
use parking_lot::Mutex;

pub const STATIC: MethodAccessFlag = MethodAccessFlag::PUBLIC.union(MethodAccessFlag::STATIC);

/// `op` followed by a big-endian pool index.
pub fn indexed(op: u8, index: u16) -> [u8; 3] {
    let [high, low] = index.to_be_bytes();
    [op, high, low]
}

pub fn branch(op: u8, offset: i16) -> [u8; 3] {
    let [high, low] = offset.to_be_bytes();
    [op, high, low]
}

/// Adds `<init>()V` calling the superclass constructor.
pub fn add_constructor(writer: &mut ClassWriter, super_name: &str) {
    let super_init = writer.add_method_ref(super_name, INIT_NAME, "()V");
    let mut code = vec![inst::ALOAD_0];
    code.extend(indexed(inst::INVOKESPECIAL, super_init));
    code.push(inst::RETURN);
    writer.add_method(
        MethodAccessFlag::PUBLIC,
        INIT_NAME,
        "()V",
        Some(MethodBody::new(1, 1, code)),
    );
}

pub fn class(name: &str) -> ClassWriter {
    ClassWriter::new(name, Some(OBJECT_CLASS))
}

/// Program output shared between the runtime and the test.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn runtime(classes: Vec<(&str, ClassWriter)>) -> (Runtime, Output) {
    runtime_with_config(RuntimeConfig::default(), classes)
}

pub fn runtime_with_config(
    config: RuntimeConfig,
    classes: Vec<(&str, ClassWriter)>,
) -> (Runtime, Output) {
    let mut class_path = MemoryClassPath::new();
    for (name, writer) in classes {
        class_path.insert_class(name, writer);
    }
    let output = Output::default();
    let mut runtime = Runtime::new(config)
        .unwrap()
        .with_output(Box::new(output.clone()));
    runtime.add_class_path(Box::new(class_path));
    (runtime, output)
}
