mod class_loader;
mod heap;
mod interpreter;
mod method_area;
mod native;
mod structs;

use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use log::debug;
use once_cell::sync::OnceCell;

pub use class_loader::*;
pub use heap::*;
pub use interpreter::{Frame, Thread, instructions};
pub use method_area::MethodArea;
pub use native::{NativeEnv, NativeFunction, NativeRegistry, NativeVariable};
pub use structs::*;

use crate::{
    descriptor::FieldType,
    error::{ExecError, LoadError, RuntimeError},
};

pub const MAIN_NAME: &str = "main";
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directories and `.jar`/`.zip` archives, searched in order.
    pub class_path: Vec<PathBuf>,
    pub max_call_depth: usize,
    /// Fall back to the in-memory `java/lang` classes when the class path
    /// does not provide them.
    pub bootstrap_classes: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            class_path: vec![],
            max_call_depth: 4096,
            bootstrap_classes: true,
        }
    }
}

/// One isolated virtual machine: its class path, method area, heap, native
/// table and the single thread that runs bytecode.
pub struct Runtime {
    config: RuntimeConfig,
    class_path: Vec<Box<dyn ClassPath>>,
    bootstrap: Option<MemoryClassPath>,
    method_area: MethodArea,
    heap: Heap,
    natives: NativeRegistry,
    thread: Thread,
    out: Box<dyn Write>,
    // classes being defined, innermost last
    loading: Vec<String>,
    string_class: OnceCell<Arc<RuntimeClass>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Runtime, LoadError> {
        let class_path = config
            .class_path
            .iter()
            .map(open_class_path)
            .collect::<Result<Vec<_>, _>>()?;
        let bootstrap = config.bootstrap_classes.then(bootstrap_class_path);
        Ok(Runtime {
            config,
            class_path,
            bootstrap,
            method_area: MethodArea::new(),
            heap: Heap::new(),
            natives: NativeRegistry::with_builtins(),
            thread: Thread::default(),
            out: Box::new(io::stdout()),
            loading: vec![],
            string_class: OnceCell::new(),
        })
    }

    /// Redirects what the program prints through `java/io/PrintStream`.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Runtime {
        self.out = out;
        self
    }

    /// Adds a class path entry searched after the configured ones.
    pub fn add_class_path(&mut self, class_path: Box<dyn ClassPath>) {
        self.class_path.push(class_path);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn method_area(&self) -> &MethodArea {
        &self.method_area
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Loads `class_name`, runs its static initializers and then
    /// `main(String[])` with `args`.
    pub fn run_main(&mut self, class_name: &str, args: &[String]) -> Result<(), RuntimeError> {
        let base = self.thread.depth();
        let class = self.load_class(class_name)?;
        let method = class
            .method(MAIN_NAME, MAIN_DESCRIPTOR)
            .filter(|method| method.is_static())
            .cloned()
            .ok_or_else(|| RuntimeError::MainNotFound(class_name.to_string()))?;
        let args = self.new_string_array(args)?;
        let frame = Frame::new(method, vec![Variable::reference(args)], 0)?;
        // below any <clinit> frames the load scheduled
        self.thread.insert(base, frame);
        debug!("running {class_name}.main");
        self.run()?;
        self.out.flush().map_err(ExecError::Output)?;
        Ok(())
    }

    /// Runs a static method to completion and returns its result slots.
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Variable],
    ) -> Result<Vec<Variable>, RuntimeError> {
        let base = self.thread.depth();
        let class = self.load_class(class_name)?;
        let method = class
            .find_method(name, descriptor)
            .filter(|method| method.is_static())
            .ok_or_else(|| ExecError::MethodNotFound {
                class: class_name.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;
        let frame = Frame::new(method, args.to_vec(), 0)?;
        self.thread.insert(base, frame);
        self.run()?;
        self.out.flush().map_err(ExecError::Output)?;
        Ok(self.thread.take_last_return())
    }

    /// A `String[]` holding a fresh `String` per element.
    pub fn new_string_array(&mut self, values: &[String]) -> Result<Reference, ExecError> {
        let string_class = self.string_class()?;
        let array = self.heap.allocate_array(
            FieldType::Object(string_class.name().to_string()),
            values.len(),
        )?;
        for (index, value) in values.iter().enumerate() {
            let string = self.heap.new_string(value, &string_class)?;
            self.heap
                .array_mut(array)?
                .store(index as i32, Value::Reference(string))?;
        }
        Ok(array)
    }

    pub fn intern_string(&mut self, value: &str) -> Result<Reference, ExecError> {
        let string_class = self.string_class()?;
        self.heap.intern(value, &string_class)
    }

    pub fn read_string(&self, reference: Reference) -> Result<String, ExecError> {
        self.heap.read_string(reference)
    }

    pub(crate) fn string_class(&mut self) -> Result<Arc<RuntimeClass>, LoadError> {
        if let Some(class) = self.string_class.get() {
            return Ok(Arc::clone(class));
        }
        let class = self.load_class(crate::consts::STRING_CLASS)?;
        let _ = self.string_class.set(Arc::clone(&class));
        Ok(class)
    }
}
