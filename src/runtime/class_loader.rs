use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicBool},
};

use log::{debug, trace};
use parking_lot::RwLock;

pub use bootstrap::*;
pub use classpath::*;

use crate::{
    class::{ClassFile, CodeAttribute, ConstantPoolInfo, class_file},
    consts::{FieldAccessFlag, MethodAccessFlag},
    descriptor::{FieldType, MethodDescriptor},
    error::{BadConstant, ExecError, LoadError},
    runtime::{Frame, Runtime, RuntimeClass, RuntimeField, RuntimeMethod, Value, member_key},
};

mod bootstrap;
mod classpath;

struct FieldLayout {
    name: Arc<str>,
    descriptor: Arc<str>,
    field_type: FieldType,
    access_flags: FieldAccessFlag,
    offset: usize,
    width: usize,
    constant: Option<u16>,
}

struct MethodLayout {
    name: Arc<str>,
    descriptor: Arc<str>,
    parsed_descriptor: MethodDescriptor,
    access_flags: MethodAccessFlag,
    code: Option<Arc<CodeAttribute>>,
    arg_slots: usize,
}

impl Runtime {
    /// Returns the class registered under `name`, defining it (and its
    /// superclasses and interfaces) first if needed. The first load also
    /// pushes the `<clinit>` frames of the class and of its uninitialized
    /// superclasses onto the thread, superclasses on top, to run the next
    /// time the interpreter steps.
    pub fn load_class(&mut self, name: &str) -> Result<Arc<RuntimeClass>, LoadError> {
        let class = match self.method_area.get(name) {
            Some(class) => class,
            None => self.define_class(name)?,
        };
        if !class.is_initialized() {
            self.schedule_initializers(&class);
        }
        Ok(class)
    }

    /// Walks the superclass chain up to the first initialized class.
    fn schedule_initializers(&mut self, class: &Arc<RuntimeClass>) {
        let mut current = Some(class);
        while let Some(class) = current {
            if !class.begin_initialization() {
                break;
            }
            if let Some(clinit) = class.clinit() {
                if let Some(code) = clinit.code() {
                    debug!("scheduling {}", clinit.signature());
                    self.thread.push(Frame::with_code(
                        Arc::clone(class),
                        Arc::clone(clinit),
                        Arc::clone(code),
                        vec![],
                        0,
                    ));
                }
            }
            current = class.super_class();
        }
    }

    /// Like [`Runtime::load_class`], but `None` when loading scheduled
    /// static initializers: the current instruction has to run again once
    /// they return.
    pub(crate) fn resolve_class(
        &mut self,
        name: &str,
    ) -> Result<Option<Arc<RuntimeClass>>, LoadError> {
        let depth = self.thread.depth();
        let class = self.load_class(name)?;
        Ok((self.thread.depth() == depth).then_some(class))
    }

    fn read_class_bytes(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        for class_path in &self.class_path {
            if let Some(bytes) = class_path.read_class(name)? {
                return Ok(bytes);
            }
        }
        if let Some(bootstrap) = &self.bootstrap {
            if let Some(bytes) = bootstrap.read_class(name)? {
                trace!("{name} comes from the bootstrap library");
                return Ok(bytes);
            }
        }
        Err(LoadError::NotFound(name.to_string()))
    }

    fn define_class(&mut self, name: &str) -> Result<Arc<RuntimeClass>, LoadError> {
        if let Some(class) = self.method_area.get(name) {
            return Ok(class);
        }
        if self.loading.iter().any(|loading| loading == name) {
            return Err(LoadError::Circularity(name.to_string()));
        }
        self.loading.push(name.to_string());
        let result = self.link_class(name);
        self.loading.pop();
        result
    }

    fn link_class(&mut self, name: &str) -> Result<Arc<RuntimeClass>, LoadError> {
        let bytes = self.read_class_bytes(name)?;
        let class_file = class_file(&bytes).map_err(|source| LoadError::Decode {
            name: name.to_string(),
            source,
        })?;
        let found = class_file.name()?;
        if &**found != name {
            return Err(LoadError::NameMismatch {
                requested: name.to_string(),
                found: found.to_string(),
            });
        }
        let class_name = Arc::clone(found);

        let super_name = class_file.super_name()?.cloned();
        let super_class = match &super_name {
            Some(super_name) => Some(self.define_class(super_name).map_err(
                |source| LoadError::Super {
                    name: name.to_string(),
                    source: Box::new(source),
                },
            )?),
            None => None,
        };
        let interfaces = class_file
            .interface_names()?
            .into_iter()
            .map(Arc::clone)
            .collect::<Vec<_>>();
        let interfaces = interfaces
            .iter()
            .map(|interface| self.define_class(interface))
            .collect::<Result<Vec<_>, _>>()?;

        let base = super_class.as_ref().map_or(0, |class| class.instance_size());
        let (fields, instance_size, static_size) = layout_fields(&class_file, base)?;
        let methods = layout_methods(&class_file)?;

        let class = Arc::new_cyclic(|owner| RuntimeClass {
            name: Arc::clone(&class_name),
            super_name,
            access_flags: class_file.access_flags,
            super_class,
            interfaces,
            fields: fields
                .iter()
                .map(|field| {
                    let runtime_field = RuntimeField {
                        name: Arc::clone(&field.name),
                        descriptor: Arc::clone(&field.descriptor),
                        field_type: field.field_type.clone(),
                        access_flags: field.access_flags,
                        offset: field.offset,
                        width: field.width,
                        owner: owner.clone(),
                    };
                    (
                        member_key(&field.name, &field.descriptor),
                        Arc::new(runtime_field),
                    )
                })
                .collect::<HashMap<_, _>>(),
            methods: methods
                .into_iter()
                .map(|method| {
                    let key = member_key(&method.name, &method.descriptor);
                    let runtime_method = RuntimeMethod {
                        name: method.name,
                        descriptor: method.descriptor,
                        parsed_descriptor: method.parsed_descriptor,
                        access_flags: method.access_flags,
                        code: method.code,
                        arg_slots: method.arg_slots,
                        owner: owner.clone(),
                    };
                    (key, Arc::new(runtime_method))
                })
                .collect::<HashMap<_, _>>(),
            instance_size,
            static_storage: RwLock::new(vec![0; static_size]),
            initialized: AtomicBool::new(false),
            class_file,
        });

        for field in fields.iter().filter(|field| field.constant.is_some()) {
            self.apply_constant_value(&class, field)
                .map_err(|source| LoadError::ConstantValue {
                    class: class_name.to_string(),
                    field: field.name.to_string(),
                    source: Box::new(source),
                })?;
        }

        let class = self.method_area.register(class);
        debug!(
            "defined {} ({} bytes per instance, {} static bytes)",
            class.name(),
            class.instance_size(),
            class.static_size()
        );
        Ok(class)
    }

    fn apply_constant_value(
        &mut self,
        class: &Arc<RuntimeClass>,
        layout: &FieldLayout,
    ) -> Result<(), ExecError> {
        let Some(index) = layout.constant else {
            return Ok(());
        };
        let Some(field) = class.field(&layout.name, &layout.descriptor).cloned() else {
            return Ok(());
        };
        let entry = class.class_file().constant_pool().get(index).cloned();
        let value = match (entry, &layout.field_type) {
            (
                Some(ConstantPoolInfo::Integer(value)),
                FieldType::Int
                | FieldType::Short
                | FieldType::Char
                | FieldType::Byte
                | FieldType::Boolean,
            ) => Value::Int(value),
            (Some(ConstantPoolInfo::Long(value)), FieldType::Long) => Value::Long(value),
            (Some(ConstantPoolInfo::Float(value)), FieldType::Float) => Value::Float(value),
            (Some(ConstantPoolInfo::Double(value)), FieldType::Double) => Value::Double(value),
            (Some(ConstantPoolInfo::String { .. }), FieldType::Object(_)) => {
                let string = Arc::clone(class.class_file().constant_pool().string(index)?);
                Value::Reference(self.intern_string(&string)?)
            }
            _ => return Err(BadConstant::new(index, "ConstantValue").into()),
        };
        class.put_static(&field, value)
    }
}

/// Byte offsets in declaration order: instance fields after the
/// superclass's, statics from zero in the class's own buffer.
fn layout_fields(
    class_file: &ClassFile,
    instance_base: usize,
) -> Result<(Vec<FieldLayout>, usize, usize), LoadError> {
    let pool = class_file.constant_pool();
    let mut instance_size = instance_base;
    let mut static_size = 0;
    let mut fields = Vec::with_capacity(class_file.fields().len());
    for field in class_file.fields() {
        let name = Arc::clone(pool.utf8(field.name_index)?);
        let descriptor = Arc::clone(pool.utf8(field.descriptor_index)?);
        let field_type =
            FieldType::parse(&descriptor).map_err(|_| LoadError::InvalidDescriptor {
                member: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;
        let width = field_type.byte_width();
        let is_static = field.access_flags.contains(FieldAccessFlag::STATIC);
        let offset = if is_static {
            static_size += width;
            static_size - width
        } else {
            instance_size += width;
            instance_size - width
        };
        fields.push(FieldLayout {
            name,
            descriptor,
            field_type,
            access_flags: field.access_flags,
            offset,
            width,
            constant: field.constant_value_index().filter(|_| is_static),
        });
    }
    Ok((fields, instance_size, static_size))
}

fn layout_methods(class_file: &ClassFile) -> Result<Vec<MethodLayout>, LoadError> {
    let pool = class_file.constant_pool();
    class_file
        .methods()
        .iter()
        .map(|method| {
            let name = Arc::clone(pool.utf8(method.name_index)?);
            let descriptor = Arc::clone(pool.utf8(method.descriptor_index)?);
            let parsed_descriptor =
                MethodDescriptor::parse(&descriptor).map_err(|_| LoadError::InvalidDescriptor {
                    member: name.to_string(),
                    descriptor: descriptor.to_string(),
                })?;
            let is_static = method.access_flags.contains(MethodAccessFlag::STATIC);
            Ok(MethodLayout {
                arg_slots: parsed_descriptor.arg_slots(is_static),
                name,
                descriptor,
                parsed_descriptor,
                access_flags: method.access_flags,
                code: method.code().cloned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassWriter, MethodBody},
        consts::OBJECT_CLASS,
        runtime::{RuntimeConfig, instructions as inst},
    };

    fn runtime_with(classes: MemoryClassPath) -> Runtime {
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        runtime.add_class_path(Box::new(classes));
        runtime
    }

    #[test]
    fn test_field_layout_follows_declaration_order() {
        let mut base = ClassWriter::new("Base", Some(OBJECT_CLASS));
        base.add_field(FieldAccessFlag::empty(), "flag", "Z");
        let mut derived = ClassWriter::new("Derived", Some("Base"));
        derived.add_field(FieldAccessFlag::empty(), "count", "J");
        derived.add_field(FieldAccessFlag::STATIC, "shared", "S");
        derived.add_field(FieldAccessFlag::empty(), "next", "LDerived;");

        let mut classes = MemoryClassPath::new();
        classes.insert_class("Base", base).insert_class("Derived", derived);
        let mut runtime = runtime_with(classes);
        let class = runtime.load_class("Derived").unwrap();

        assert_eq!(class.instance_size(), 1 + 8 + 4);
        assert_eq!(class.static_size(), 2);
        assert_eq!(class.field("count", "J").unwrap().offset(), 1);
        assert_eq!(class.field("next", "LDerived;").unwrap().offset(), 9);
        assert_eq!(class.field("shared", "S").unwrap().offset(), 0);
        assert!(class.find_field("flag", "Z").is_some());
    }

    #[test]
    fn test_method_arg_slots() {
        let mut writer = ClassWriter::new("Slots", Some(OBJECT_CLASS));
        writer.add_method(MethodAccessFlag::ABSTRACT, "virtual", "(IJLFoo;)V", None);
        writer.add_method(
            MethodAccessFlag::STATIC | MethodAccessFlag::NATIVE,
            "statik",
            "([[JD)I",
            None,
        );
        let mut classes = MemoryClassPath::new();
        classes.insert_class("Slots", writer);
        let mut runtime = runtime_with(classes);
        let class = runtime.load_class("Slots").unwrap();

        assert_eq!(class.method("virtual", "(IJLFoo;)V").unwrap().arg_slots(), 5);
        assert_eq!(class.method("statik", "([[JD)I").unwrap().arg_slots(), 3);
    }

    #[test]
    fn test_constant_value_initializes_statics() {
        let mut writer = ClassWriter::new("Constants", Some(OBJECT_CLASS));
        let answer = writer.add_integer(42);
        let greeting = writer.add_string("hi");
        let flags = FieldAccessFlag::STATIC | FieldAccessFlag::FINAL;
        writer.add_constant_field(flags, "ANSWER", "B", answer);
        writer.add_constant_field(flags, "GREETING", "Ljava/lang/String;", greeting);
        let mut classes = MemoryClassPath::new();
        classes.insert_class("Constants", writer);
        let mut runtime = runtime_with(classes);
        let class = runtime.load_class("Constants").unwrap();

        let answer = class.field("ANSWER", "B").unwrap();
        assert_eq!(class.get_static(answer), Value::Int(42));
        let greeting = class.field("GREETING", "Ljava/lang/String;").unwrap();
        let reference = class.get_static(greeting).as_reference().unwrap();
        assert_eq!(runtime.read_string(reference).unwrap(), "hi");
    }

    #[test]
    fn test_constant_value_must_match_field_type() {
        let flags = FieldAccessFlag::STATIC | FieldAccessFlag::FINAL;
        let mut int_on_long = ClassWriter::new("IntOnLong", Some(OBJECT_CLASS));
        let answer = int_on_long.add_integer(42);
        int_on_long.add_constant_field(flags, "BIG", "J", answer);
        let mut long_on_int = ClassWriter::new("LongOnInt", Some(OBJECT_CLASS));
        let answer = long_on_int.add_long(42);
        long_on_int.add_constant_field(flags, "SMALL", "I", answer);
        let mut classes = MemoryClassPath::new();
        classes
            .insert_class("IntOnLong", int_on_long)
            .insert_class("LongOnInt", long_on_int);
        let mut runtime = runtime_with(classes);

        for name in ["IntOnLong", "LongOnInt"] {
            match runtime.load_class(name) {
                Err(LoadError::ConstantValue { class, source, .. }) => {
                    assert_eq!(class, name);
                    assert!(matches!(*source, ExecError::BadConstant(_)));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(!runtime.method_area().contains(name));
        }
    }

    #[test]
    fn test_clinit_is_scheduled_superclass_first() {
        let clinit = || Some(MethodBody::new(0, 0, vec![inst::RETURN]));
        let mut base = ClassWriter::new("InitBase", Some(OBJECT_CLASS));
        base.add_method(MethodAccessFlag::STATIC, "<clinit>", "()V", clinit());
        let mut derived = ClassWriter::new("InitDerived", Some("InitBase"));
        derived.add_method(MethodAccessFlag::STATIC, "<clinit>", "()V", clinit());
        let mut classes = MemoryClassPath::new();
        classes
            .insert_class("InitBase", base)
            .insert_class("InitDerived", derived);
        let mut runtime = runtime_with(classes);
        runtime.load_class("InitDerived").unwrap();

        assert_eq!(runtime.thread().depth(), 2);
        assert_eq!(runtime.thread().top().unwrap().class().name(), "InitBase");
        // a second load schedules nothing
        runtime.load_class("InitDerived").unwrap();
        assert_eq!(runtime.thread().depth(), 2);
    }

    #[test]
    fn test_name_mismatch_is_rejected() {
        let mut classes = MemoryClassPath::new();
        classes.insert("Expected", ClassWriter::new("Actual", Some(OBJECT_CLASS)).to_bytes());
        let mut runtime = runtime_with(classes);
        assert!(matches!(
            runtime.load_class("Expected"),
            Err(LoadError::NameMismatch { .. })
        ));
        assert!(!runtime.method_area().contains("Expected"));
    }
}
