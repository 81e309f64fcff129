//! Serializes [`ClassFile`]s back to bytes and assembles new ones.

use std::{collections::HashMap, sync::Arc};

use cesu8_str::java as cesu8_java;

use crate::{
    class::{
        Attribute, AttributeInfo, ClassFile, CodeAttribute, ConstantPool, ConstantPoolInfo,
        ExceptionTableEntry, FieldInfo, MethodInfo, StackMapFrame, VerificationType,
        structs::tags,
    },
    consts::{ClassAccessFlag, FieldAccessFlag, MAGIC, MethodAccessFlag},
};

impl ClassFile {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, MAGIC);
        put_u16(&mut out, self.minor_version);
        put_u16(&mut out, self.major_version);

        put_u16(&mut out, self.constant_pool.count());
        for (_, constant) in self.constant_pool.iter() {
            write_constant(&mut out, constant);
        }

        put_u16(&mut out, self.access_flags.bits());
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);
        put_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            put_u16(&mut out, *interface);
        }

        put_u16(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            put_u16(&mut out, field.access_flags.bits());
            put_u16(&mut out, field.name_index);
            put_u16(&mut out, field.descriptor_index);
            write_attributes(&mut out, &field.attributes);
        }

        put_u16(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            put_u16(&mut out, method.access_flags.bits());
            put_u16(&mut out, method.name_index);
            put_u16(&mut out, method.descriptor_index);
            write_attributes(&mut out, &method.attributes);
        }

        write_attributes(&mut out, &self.attributes);
        out
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_constant(out: &mut Vec<u8>, constant: &ConstantPoolInfo) {
    match constant {
        // shadow slots and index 0 have no bytes of their own
        ConstantPoolInfo::Empty => {}
        ConstantPoolInfo::Utf8(value) => {
            out.push(tags::UTF8);
            let encoded = cesu8_java::from_utf8(&**value);
            let bytes = encoded.as_bytes();
            put_u16(out, bytes.len() as u16);
            out.extend_from_slice(bytes);
        }
        ConstantPoolInfo::Integer(value) => {
            out.push(tags::INTEGER);
            out.extend_from_slice(&value.to_be_bytes());
        }
        ConstantPoolInfo::Float(value) => {
            out.push(tags::FLOAT);
            out.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        ConstantPoolInfo::Long(value) => {
            out.push(tags::LONG);
            out.extend_from_slice(&value.to_be_bytes());
        }
        ConstantPoolInfo::Double(value) => {
            out.push(tags::DOUBLE);
            out.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        ConstantPoolInfo::Class { name_index } => {
            out.push(tags::CLASS);
            put_u16(out, *name_index);
        }
        ConstantPoolInfo::String { string_index } => {
            out.push(tags::STRING);
            put_u16(out, *string_index);
        }
        ConstantPoolInfo::Fieldref {
            class_index,
            name_and_type_index,
        } => {
            out.push(tags::FIELDREF);
            put_u16(out, *class_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::Methodref {
            class_index,
            name_and_type_index,
        } => {
            out.push(tags::METHODREF);
            put_u16(out, *class_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => {
            out.push(tags::INTERFACE_METHODREF);
            put_u16(out, *class_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        } => {
            out.push(tags::NAME_AND_TYPE);
            put_u16(out, *name_index);
            put_u16(out, *descriptor_index);
        }
        ConstantPoolInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => {
            out.push(tags::METHOD_HANDLE);
            out.push(*reference_kind);
            put_u16(out, *reference_index);
        }
        ConstantPoolInfo::MethodType { descriptor_index } => {
            out.push(tags::METHOD_TYPE);
            put_u16(out, *descriptor_index);
        }
        ConstantPoolInfo::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => {
            out.push(tags::DYNAMIC);
            put_u16(out, *bootstrap_method_attr_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => {
            out.push(tags::INVOKE_DYNAMIC);
            put_u16(out, *bootstrap_method_attr_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::Module { name_index } => {
            out.push(tags::MODULE);
            put_u16(out, *name_index);
        }
        ConstantPoolInfo::Package { name_index } => {
            out.push(tags::PACKAGE);
            put_u16(out, *name_index);
        }
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) {
    put_u16(out, attributes.len() as u16);
    for attribute in attributes {
        let mut body = Vec::new();
        write_attribute_body(&mut body, &attribute.info);
        put_u16(out, attribute.name_index);
        put_u32(out, body.len() as u32);
        out.extend_from_slice(&body);
    }
}

fn write_attribute_body(out: &mut Vec<u8>, info: &AttributeInfo) {
    match info {
        AttributeInfo::Code(code) => {
            put_u16(out, code.max_stack);
            put_u16(out, code.max_locals);
            put_u32(out, code.code.len() as u32);
            out.extend_from_slice(&code.code);
            put_u16(out, code.exception_table.len() as u16);
            for entry in &code.exception_table {
                put_u16(out, entry.start_pc);
                put_u16(out, entry.end_pc);
                put_u16(out, entry.handler_pc);
                put_u16(out, entry.catch_type);
            }
            write_attributes(out, &code.attributes);
        }
        AttributeInfo::ConstantValue {
            constantvalue_index,
        } => put_u16(out, *constantvalue_index),
        AttributeInfo::Exceptions {
            exception_index_table,
        } => {
            put_u16(out, exception_index_table.len() as u16);
            for index in exception_index_table {
                put_u16(out, *index);
            }
        }
        AttributeInfo::InnerClasses(classes) => {
            put_u16(out, classes.len() as u16);
            for class in classes {
                put_u16(out, class.inner_class_info_index);
                put_u16(out, class.outer_class_info_index);
                put_u16(out, class.inner_name_index);
                put_u16(out, class.inner_class_access_flags.bits());
            }
        }
        AttributeInfo::LineNumberTable(lines) => {
            put_u16(out, lines.len() as u16);
            for line in lines {
                put_u16(out, line.start_pc);
                put_u16(out, line.line_number);
            }
        }
        AttributeInfo::LocalVariableTable(variables) => {
            put_u16(out, variables.len() as u16);
            for variable in variables {
                put_u16(out, variable.start_pc);
                put_u16(out, variable.length);
                put_u16(out, variable.name_index);
                put_u16(out, variable.descriptor_index);
                put_u16(out, variable.index);
            }
        }
        AttributeInfo::StackMapTable(frames) => {
            put_u16(out, frames.len() as u16);
            for frame in frames {
                write_stack_map_frame(out, frame);
            }
        }
        AttributeInfo::SourceFile { sourcefile_index } => put_u16(out, *sourcefile_index),
        AttributeInfo::Synthetic => {}
        AttributeInfo::Unknown(bytes) => out.extend_from_slice(bytes),
    }
}

fn write_stack_map_frame(out: &mut Vec<u8>, frame: &StackMapFrame) {
    out.push(frame.frame_type());
    match frame {
        StackMapFrame::Same { .. } => {}
        StackMapFrame::SameLocals1StackItem { stack, .. } => write_verification_type(out, stack),
        StackMapFrame::SameLocals1StackItemExtended {
            offset_delta,
            stack,
        } => {
            put_u16(out, *offset_delta);
            write_verification_type(out, stack);
        }
        StackMapFrame::Chop { offset_delta, .. } | StackMapFrame::SameExtended { offset_delta } => {
            put_u16(out, *offset_delta)
        }
        StackMapFrame::Append {
            offset_delta,
            locals,
            ..
        } => {
            put_u16(out, *offset_delta);
            for local in locals {
                write_verification_type(out, local);
            }
        }
        StackMapFrame::Full {
            offset_delta,
            locals,
            stack,
        } => {
            put_u16(out, *offset_delta);
            put_u16(out, locals.len() as u16);
            for local in locals {
                write_verification_type(out, local);
            }
            put_u16(out, stack.len() as u16);
            for item in stack {
                write_verification_type(out, item);
            }
        }
    }
}

fn write_verification_type(out: &mut Vec<u8>, verification_type: &VerificationType) {
    out.push(verification_type.tag());
    match verification_type {
        VerificationType::Object { cpool_index } => put_u16(out, *cpool_index),
        VerificationType::Uninitialized { offset } => put_u16(out, *offset),
        _ => {}
    }
}

/// Deduplication key; floats are keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Utf8(Arc<str>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    InterfaceMethodref(u16, u16),
    NameAndType(u16, u16),
}

/// The body of a method: its limits, instruction bytes and handlers.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

impl MethodBody {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: vec![],
        }
    }

    pub fn with_handler(
        mut self,
        start_pc: u16,
        end_pc: u16,
        handler_pc: u16,
        catch_type: u16,
    ) -> Self {
        self.exception_table.push(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }
}

/// Builds a class from scratch with a deduplicating constant pool.
#[derive(Debug)]
pub struct ClassWriter {
    constants: Vec<ConstantPoolInfo>,
    lookup: HashMap<ConstantKey, u16>,
    access_flags: ClassAccessFlag,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    attributes: Vec<Attribute>,
}

impl ClassWriter {
    pub const MAJOR_VERSION: u16 = 52;

    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut writer = ClassWriter {
            constants: vec![ConstantPoolInfo::Empty],
            lookup: HashMap::new(),
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };
        writer.this_class = writer.add_class(name);
        if let Some(super_name) = super_name {
            writer.super_class = writer.add_class(super_name);
        }
        writer
    }

    pub fn set_access_flags(&mut self, access_flags: ClassAccessFlag) -> &mut Self {
        self.access_flags = access_flags;
        self
    }

    fn intern(&mut self, key: ConstantKey, constant: ConstantPoolInfo) -> u16 {
        if let Some(&index) = self.lookup.get(&key) {
            return index;
        }
        let index = self.constants.len() as u16;
        let wide = constant.is_wide();
        self.constants.push(constant);
        if wide {
            self.constants.push(ConstantPoolInfo::Empty);
        }
        self.lookup.insert(key, index);
        index
    }

    pub fn add_utf8(&mut self, value: &str) -> u16 {
        let value: Arc<str> = Arc::from(value);
        self.intern(
            ConstantKey::Utf8(Arc::clone(&value)),
            ConstantPoolInfo::Utf8(value),
        )
    }

    pub fn add_integer(&mut self, value: i32) -> u16 {
        self.intern(ConstantKey::Integer(value), ConstantPoolInfo::Integer(value))
    }

    pub fn add_float(&mut self, value: f32) -> u16 {
        self.intern(
            ConstantKey::Float(value.to_bits()),
            ConstantPoolInfo::Float(value),
        )
    }

    pub fn add_long(&mut self, value: i64) -> u16 {
        self.intern(ConstantKey::Long(value), ConstantPoolInfo::Long(value))
    }

    pub fn add_double(&mut self, value: f64) -> u16 {
        self.intern(
            ConstantKey::Double(value.to_bits()),
            ConstantPoolInfo::Double(value),
        )
    }

    pub fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.intern(
            ConstantKey::Class(name_index),
            ConstantPoolInfo::Class { name_index },
        )
    }

    pub fn add_string(&mut self, value: &str) -> u16 {
        let string_index = self.add_utf8(value);
        self.intern(
            ConstantKey::String(string_index),
            ConstantPoolInfo::String { string_index },
        )
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.intern(
            ConstantKey::NameAndType(name_index, descriptor_index),
            ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            },
        )
    }

    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type_index = self.add_name_and_type(name, descriptor);
        self.intern(
            ConstantKey::Fieldref(class_index, name_and_type_index),
            ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            },
        )
    }

    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type_index = self.add_name_and_type(name, descriptor);
        self.intern(
            ConstantKey::Methodref(class_index, name_and_type_index),
            ConstantPoolInfo::Methodref {
                class_index,
                name_and_type_index,
            },
        )
    }

    pub fn add_interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type_index = self.add_name_and_type(name, descriptor);
        self.intern(
            ConstantKey::InterfaceMethodref(class_index, name_and_type_index),
            ConstantPoolInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            },
        )
    }

    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        let index = self.add_class(name);
        self.interfaces.push(index);
        self
    }

    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlag,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![],
        });
        self
    }

    /// A static field initialized at link time from the pool entry `constant`.
    pub fn add_constant_field(
        &mut self,
        access_flags: FieldAccessFlag,
        name: &str,
        descriptor: &str,
        constant: u16,
    ) -> &mut Self {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let attribute_name = self.add_utf8("ConstantValue");
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![Attribute {
                name_index: attribute_name,
                info: AttributeInfo::ConstantValue {
                    constantvalue_index: constant,
                },
            }],
        });
        self
    }

    /// `body` is `None` for native and abstract methods.
    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlag,
        name: &str,
        descriptor: &str,
        body: Option<MethodBody>,
    ) -> &mut Self {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let mut attributes = vec![];
        if let Some(body) = body {
            attributes.push(Attribute {
                name_index: self.add_utf8("Code"),
                info: AttributeInfo::Code(Arc::new(CodeAttribute {
                    max_stack: body.max_stack,
                    max_locals: body.max_locals,
                    code: body.code,
                    exception_table: body.exception_table,
                    attributes: vec![],
                })),
            });
        }
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    pub fn set_source_file(&mut self, name: &str) -> &mut Self {
        let name_index = self.add_utf8("SourceFile");
        let sourcefile_index = self.add_utf8(name);
        self.attributes.push(Attribute {
            name_index,
            info: AttributeInfo::SourceFile { sourcefile_index },
        });
        self
    }

    pub fn build(self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: Self::MAJOR_VERSION,
            constant_pool: ConstantPool::new(self.constants),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.build().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{LineNumber, class_file};

    #[test]
    fn test_constants_are_deduplicated() {
        let mut writer = ClassWriter::new("A", Some("java/lang/Object"));
        let first = writer.add_method_ref("A", "f", "()V");
        let second = writer.add_method_ref("A", "f", "()V");
        assert_eq!(first, second);
        assert_eq!(writer.add_class("A"), writer.this_class);
    }

    #[test]
    fn test_long_takes_two_slots() {
        let mut writer = ClassWriter::new("A", None);
        let long = writer.add_long(7);
        let next = writer.add_integer(1);
        assert_eq!(next, long + 2);
    }

    #[test]
    fn test_reserialize_is_byte_identical() {
        let mut writer = ClassWriter::new("pkg/Round", Some("java/lang/Object"));
        writer.add_interface("java/lang/Runnable");
        writer.add_string("h\u{e9}llo \u{0}");
        writer.add_double(-0.5);
        writer.add_float(3.25);
        writer.add_field(FieldAccessFlag::PRIVATE, "x", "J");
        writer.add_method(
            MethodAccessFlag::PUBLIC,
            "run",
            "()V",
            Some(MethodBody::new(2, 1, vec![0x2a, 0x57, 0xb1]).with_handler(0, 2, 2, 0)),
        );
        writer.set_source_file("Round.java");
        let mut class = writer.build();

        // decorate the code body with nested attributes
        let code_attribute = class.methods[0].attributes[0].clone();
        let AttributeInfo::Code(code) = code_attribute.info else {
            unreachable!()
        };
        let mut code = (*code).clone();
        let lnt = class.constant_pool.entries.len() as u16;
        class
            .constant_pool
            .entries
            .push(ConstantPoolInfo::Utf8(Arc::from("LineNumberTable")));
        code.attributes.push(Attribute {
            name_index: lnt,
            info: AttributeInfo::LineNumberTable(vec![LineNumber {
                start_pc: 0,
                line_number: 3,
            }]),
        });
        let smt = class.constant_pool.entries.len() as u16;
        class
            .constant_pool
            .entries
            .push(ConstantPoolInfo::Utf8(Arc::from("StackMapTable")));
        code.attributes.push(Attribute {
            name_index: smt,
            info: AttributeInfo::StackMapTable(vec![
                StackMapFrame::Same { frame_type: 2 },
                StackMapFrame::Full {
                    offset_delta: 0,
                    locals: vec![VerificationType::Object { cpool_index: 1 }],
                    stack: vec![],
                },
            ]),
        });
        class.methods[0].attributes[0].info = AttributeInfo::Code(Arc::new(code));

        let bytes = class.to_bytes();
        let parsed = class_file(&bytes).unwrap();
        assert_eq!(parsed, class);
        assert_eq!(parsed.to_bytes(), bytes);
    }
}
