use std::fmt::{self, Display, Write};

use crate::class::{
    Attribute, AttributeInfo, ClassFile, CodeAttribute, ConstantPool, ConstantPoolInfo,
};

impl Display for ClassFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cp = &self.constant_pool;
        writeln!(f, "class {}", name_or_index(cp, self.this_class))?;
        if let Ok(Some(super_name)) = self.super_name() {
            writeln!(f, "  extends {super_name}")?;
        }
        for &interface in &self.interfaces {
            writeln!(f, "  implements {}", name_or_index(cp, interface))?;
        }
        writeln!(f, "  version: {}.{}", self.major_version, self.minor_version)?;
        writeln!(f, "  flags: {:?}", self.access_flags)?;

        writeln!(f, "constant pool ({} entries):", cp.count())?;
        for (index, info) in cp.iter().skip(1) {
            if matches!(info, ConstantPoolInfo::Empty) {
                continue;
            }
            writeln!(f, "  #{index:<4} {:<18} {}", info.kind(), describe_constant(cp, info))?;
        }

        writeln!(f, "fields ({}):", self.fields.len())?;
        for field in &self.fields {
            writeln!(
                f,
                "  {} {} {:?}",
                utf8_or_index(cp, field.name_index),
                utf8_or_index(cp, field.descriptor_index),
                field.access_flags
            )?;
            write_attributes(f, cp, &field.attributes, 4)?;
        }

        writeln!(f, "methods ({}):", self.methods.len())?;
        for method in &self.methods {
            writeln!(
                f,
                "  {}{} {:?}",
                utf8_or_index(cp, method.name_index),
                utf8_or_index(cp, method.descriptor_index),
                method.access_flags
            )?;
            write_attributes(f, cp, &method.attributes, 4)?;
        }

        writeln!(f, "attributes ({}):", self.attributes.len())?;
        write_attributes(f, cp, &self.attributes, 2)
    }
}

fn utf8_or_index(cp: &ConstantPool, index: u16) -> String {
    cp.utf8(index)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| format!("#{index}"))
}

fn name_or_index(cp: &ConstantPool, index: u16) -> String {
    cp.class_name(index)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| format!("#{index}"))
}

fn describe_constant(cp: &ConstantPool, info: &ConstantPoolInfo) -> String {
    match info {
        ConstantPoolInfo::Empty => String::new(),
        ConstantPoolInfo::Utf8(value) => format!("{value:?}"),
        ConstantPoolInfo::Integer(value) => value.to_string(),
        ConstantPoolInfo::Float(value) => format!("{value}f"),
        ConstantPoolInfo::Long(value) => format!("{value}L"),
        ConstantPoolInfo::Double(value) => format!("{value}d"),
        ConstantPoolInfo::Class { name_index } => utf8_or_index(cp, *name_index),
        ConstantPoolInfo::String { string_index } => {
            format!("{:?}", utf8_or_index(cp, *string_index))
        }
        ConstantPoolInfo::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => match cp.name_and_type(*name_and_type_index) {
            Ok((name, descriptor)) => {
                format!("{}.{name}:{descriptor}", name_or_index(cp, *class_index))
            }
            Err(_) => format!("#{class_index}.#{name_and_type_index}"),
        },
        ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        } => format!(
            "{}:{}",
            utf8_or_index(cp, *name_index),
            utf8_or_index(cp, *descriptor_index)
        ),
        ConstantPoolInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => format!("kind {reference_kind} #{reference_index}"),
        ConstantPoolInfo::MethodType { descriptor_index } => utf8_or_index(cp, *descriptor_index),
        ConstantPoolInfo::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => format!("bootstrap #{bootstrap_method_attr_index} #{name_and_type_index}"),
        ConstantPoolInfo::Module { name_index } | ConstantPoolInfo::Package { name_index } => {
            utf8_or_index(cp, *name_index)
        }
    }
}

fn write_attributes(
    f: &mut fmt::Formatter<'_>,
    cp: &ConstantPool,
    attributes: &[Attribute],
    indent: usize,
) -> fmt::Result {
    let pad = " ".repeat(indent);
    for attribute in attributes {
        let name = utf8_or_index(cp, attribute.name_index);
        match &attribute.info {
            AttributeInfo::Code(code) => {
                writeln!(
                    f,
                    "{pad}{name}: max_stack={} max_locals={} length={}",
                    code.max_stack,
                    code.max_locals,
                    code.code.len()
                )?;
                writeln!(f, "{pad}  {}", hex_dump(code))?;
                for entry in &code.exception_table {
                    let catch = if entry.catch_type == 0 {
                        "any".to_string()
                    } else {
                        name_or_index(cp, entry.catch_type)
                    };
                    writeln!(
                        f,
                        "{pad}  [{}, {}) -> {} catch {catch}",
                        entry.start_pc, entry.end_pc, entry.handler_pc
                    )?;
                }
                write_attributes(f, cp, &code.attributes, indent + 2)?;
            }
            AttributeInfo::ConstantValue {
                constantvalue_index,
            } => match cp.get(*constantvalue_index) {
                Some(info) => writeln!(f, "{pad}{name}: {}", describe_constant(cp, info))?,
                None => writeln!(f, "{pad}{name}: #{constantvalue_index}")?,
            },
            AttributeInfo::Exceptions {
                exception_index_table,
            } => {
                let names: Vec<_> = exception_index_table
                    .iter()
                    .map(|&index| name_or_index(cp, index))
                    .collect();
                writeln!(f, "{pad}{name}: {}", names.join(", "))?;
            }
            AttributeInfo::InnerClasses(classes) => {
                writeln!(f, "{pad}{name}: {} entries", classes.len())?;
                for class in classes {
                    writeln!(
                        f,
                        "{pad}  {} {:?}",
                        name_or_index(cp, class.inner_class_info_index),
                        class.inner_class_access_flags
                    )?;
                }
            }
            AttributeInfo::LineNumberTable(lines) => {
                writeln!(f, "{pad}{name}:")?;
                for line in lines {
                    writeln!(f, "{pad}  line {}: {}", line.line_number, line.start_pc)?;
                }
            }
            AttributeInfo::LocalVariableTable(variables) => {
                writeln!(f, "{pad}{name}:")?;
                for variable in variables {
                    writeln!(
                        f,
                        "{pad}  slot {} {} {} [{}, +{})",
                        variable.index,
                        utf8_or_index(cp, variable.name_index),
                        utf8_or_index(cp, variable.descriptor_index),
                        variable.start_pc,
                        variable.length
                    )?;
                }
            }
            AttributeInfo::StackMapTable(frames) => {
                writeln!(f, "{pad}{name}: {} frames", frames.len())?;
                for frame in frames {
                    writeln!(
                        f,
                        "{pad}  type {} delta {} {:?}",
                        frame.frame_type(),
                        frame.offset_delta(),
                        frame
                    )?;
                }
            }
            AttributeInfo::SourceFile { sourcefile_index } => {
                writeln!(f, "{pad}{name}: {}", utf8_or_index(cp, *sourcefile_index))?
            }
            AttributeInfo::Synthetic => writeln!(f, "{pad}{name}")?,
            AttributeInfo::Unknown(bytes) => writeln!(f, "{pad}{name}: {} bytes", bytes.len())?,
        }
    }
    Ok(())
}

fn hex_dump(code: &CodeAttribute) -> String {
    let mut out = String::with_capacity(code.code.len() * 3);
    for (i, byte) in code.code.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}
