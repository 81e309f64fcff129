use std::sync::Arc;

use cesu8_str::java as cesu8_java;
use nom::{
    IResult, Parser,
    bytes::complete::take,
    multi::count,
    number::complete::{be_f32, be_f64, be_i32, be_i64, be_u8, be_u16, be_u32},
};

use crate::{
    class::{
        Attribute, AttributeInfo, ClassFile, CodeAttribute, ConstantPool, ConstantPoolInfo,
        ExceptionTableEntry, FieldInfo, InnerClass, LineNumber, LocalVariable, MethodInfo,
        StackMapFrame, VerificationType, structs::tags,
    },
    consts::{ClassAccessFlag, FieldAccessFlag, InnerClassAccessFlag, MAGIC, MethodAccessFlag},
    error::DecodeError,
};

pub(crate) type PResult<'a, T> = IResult<&'a [u8], T, DecodeError>;

/// Decodes a complete class file. The whole input must be consumed.
pub fn class_file(input: &[u8]) -> Result<ClassFile, DecodeError> {
    let (rest, class) = parse_class(input)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    Ok(class)
}

fn fail<'a, T>(err: impl Into<DecodeError>) -> PResult<'a, T> {
    Err(nom::Err::Failure(err.into()))
}

fn parse_class(input: &[u8]) -> PResult<'_, ClassFile> {
    let (input, (minor, major)) = parse_header(input)?;
    let (input, constant_pool) = parse_constant_pool(input)?;

    let (input, access_flags) = be_u16(input)?;
    let (input, this_class) = be_u16(input)?;
    let (input, super_class) = be_u16(input)?;
    let (input, interfaces) = parse_interfaces(input)?;
    let (input, fields) = parse_fields(input, &constant_pool)?;
    let (input, methods) = parse_methods(input, &constant_pool)?;
    let (input, attributes) = parse_attributes(input, &constant_pool)?;

    Ok((
        input,
        ClassFile {
            major_version: major,
            minor_version: minor,
            access_flags: ClassAccessFlag::from_bits_retain(access_flags),
            this_class,
            super_class,
            constant_pool,
            interfaces,
            fields,
            methods,
            attributes,
        },
    ))
}

fn parse_header(input: &[u8]) -> PResult<'_, (u16, u16)> {
    let (input, magic) = be_u32(input)?;
    if magic != MAGIC {
        return fail(DecodeError::BadMagic(magic));
    }
    let (input, minor) = be_u16(input)?;
    let (input, major) = be_u16(input)?;
    Ok((input, (minor, major)))
}

fn parse_constant_pool(input: &[u8]) -> PResult<'_, ConstantPool> {
    let (mut input, constant_pool_count) = be_u16(input)?;
    if constant_pool_count == 0 {
        return fail(DecodeError::EmptyConstantPool(constant_pool_count));
    }

    let mut constant_pool = Vec::with_capacity(constant_pool_count as usize);
    constant_pool.push(ConstantPoolInfo::Empty);

    while constant_pool.len() < constant_pool_count as usize {
        let index = constant_pool.len() as u16;
        let constant;
        (input, constant) = parse_constant(input, index)?;
        let need_empty = constant.is_wide();
        constant_pool.push(constant);
        if need_empty {
            if constant_pool.len() >= constant_pool_count as usize {
                return fail(DecodeError::ConstantPoolOverrun);
            }
            constant_pool.push(ConstantPoolInfo::Empty);
        }
    }

    Ok((input, ConstantPool::new(constant_pool)))
}

fn parse_constant(mut input: &[u8], index: u16) -> PResult<'_, ConstantPoolInfo> {
    let tag;
    (input, tag) = be_u8(input)?;
    let cp_info = match tag {
        tags::UTF8 => {
            let length;
            (input, length) = be_u16(input)?;
            let bytes;
            (input, bytes) = take(length)(input)?;
            let Ok(java_str) = cesu8_java::JavaStr::from_java_cesu8(bytes) else {
                return fail(DecodeError::InvalidUtf8(index));
            };
            let decoded = cesu8_java::from_java_cesu8(java_str);
            ConstantPoolInfo::Utf8(Arc::from(&*decoded))
        }
        tags::INTEGER => {
            let int;
            (input, int) = be_i32(input)?;
            ConstantPoolInfo::Integer(int)
        }
        tags::FLOAT => {
            let float;
            (input, float) = be_f32(input)?;
            ConstantPoolInfo::Float(float)
        }
        tags::LONG => {
            let long;
            (input, long) = be_i64(input)?;
            ConstantPoolInfo::Long(long)
        }
        tags::DOUBLE => {
            let double;
            (input, double) = be_f64(input)?;
            ConstantPoolInfo::Double(double)
        }
        tags::CLASS => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Class { name_index }
        }
        tags::STRING => {
            let string_index;
            (input, string_index) = be_u16(input)?;
            ConstantPoolInfo::String { string_index }
        }
        tags::FIELDREF | tags::METHODREF | tags::INTERFACE_METHODREF => {
            let (class_index, name_and_type_index);
            (input, class_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            match tag {
                tags::FIELDREF => ConstantPoolInfo::Fieldref {
                    class_index,
                    name_and_type_index,
                },
                tags::METHODREF => ConstantPoolInfo::Methodref {
                    class_index,
                    name_and_type_index,
                },
                _ => ConstantPoolInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            }
        }
        tags::NAME_AND_TYPE => {
            let (name_index, descriptor_index);
            (input, name_index) = be_u16(input)?;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            }
        }
        tags::METHOD_HANDLE => {
            let (reference_kind, reference_index);
            (input, reference_kind) = be_u8(input)?;
            (input, reference_index) = be_u16(input)?;
            ConstantPoolInfo::MethodHandle {
                reference_kind,
                reference_index,
            }
        }
        tags::METHOD_TYPE => {
            let descriptor_index;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::MethodType { descriptor_index }
        }
        tags::DYNAMIC | tags::INVOKE_DYNAMIC => {
            let (bootstrap_method_attr_index, name_and_type_index);
            (input, bootstrap_method_attr_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            if tag == tags::DYNAMIC {
                ConstantPoolInfo::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            } else {
                ConstantPoolInfo::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            }
        }
        tags::MODULE => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Module { name_index }
        }
        tags::PACKAGE => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Package { name_index }
        }
        _ => return fail(DecodeError::InvalidTag(tag)),
    };
    Ok((input, cp_info))
}

fn parse_interfaces(input: &[u8]) -> PResult<'_, Vec<u16>> {
    let (input, interface_count) = be_u16(input)?;

    let (input, interfaces) = count(be_u16, interface_count as _).parse(input)?;

    Ok((input, interfaces))
}

fn parse_fields<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, Vec<FieldInfo>> {
    let (input, field_count) = be_u16(input)?;
    let (input, fields) = count(|i| parse_field(i, cp), field_count as _).parse(input)?;
    Ok((input, fields))
}

fn parse_field<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, FieldInfo> {
    let (input, access_flags) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;

    let (input, attributes) = parse_attributes(input, cp)?;
    Ok((
        input,
        FieldInfo {
            access_flags: FieldAccessFlag::from_bits_retain(access_flags),
            name_index,
            descriptor_index,
            attributes,
        },
    ))
}

fn parse_methods<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, Vec<MethodInfo>> {
    let (input, methods_count) = be_u16(input)?;

    let (input, methods) = count(|i| parse_method(i, cp), methods_count as _).parse(input)?;

    Ok((input, methods))
}

fn parse_method<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, MethodInfo> {
    let (input, access_flags) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, attributes) = parse_attributes(input, cp)?;

    Ok((
        input,
        MethodInfo {
            access_flags: MethodAccessFlag::from_bits_retain(access_flags),
            name_index,
            descriptor_index,
            attributes,
        },
    ))
}

fn parse_attributes<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, Vec<Attribute>> {
    let (input, attributes_count) = be_u16(input)?;

    let (input, attributes) =
        count(|i| parse_attribute(i, cp), attributes_count as _).parse(input)?;

    Ok((input, attributes))
}

/// Slices the declared body out first, so a variant decoder can never read
/// past it, then insists the decoder used every byte.
fn parse_attribute<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, Attribute> {
    let (input, name_index) = be_u16(input)?;
    let (input, attribute_length) = be_u32(input)?;
    let (input, body) = take(attribute_length)(input)?;

    let name = match cp.utf8(name_index) {
        Ok(name) => name,
        Err(err) => return fail(err),
    };

    let (rest, info) = parse_attribute_body(name, body, cp)?;
    if !rest.is_empty() {
        return fail(DecodeError::AttributeLength {
            name: name.to_string(),
            declared: attribute_length,
            consumed: body.len() - rest.len(),
        });
    }

    Ok((input, Attribute { name_index, info }))
}

fn parse_attribute_body<'a>(
    name: &str,
    mut input: &'a [u8],
    cp: &ConstantPool,
) -> PResult<'a, AttributeInfo> {
    let info = match name {
        "Code" => {
            let code;
            (input, code) = parse_code(input, cp)?;
            AttributeInfo::Code(Arc::new(code))
        }
        "ConstantValue" => {
            let constantvalue_index;
            (input, constantvalue_index) = be_u16(input)?;
            AttributeInfo::ConstantValue {
                constantvalue_index,
            }
        }
        "Exceptions" => {
            let (number_of_exceptions, exception_index_table);
            (input, number_of_exceptions) = be_u16(input)?;
            (input, exception_index_table) =
                count(be_u16, number_of_exceptions as _).parse(input)?;
            AttributeInfo::Exceptions {
                exception_index_table,
            }
        }
        "InnerClasses" => {
            let (number_of_classes, classes);
            (input, number_of_classes) = be_u16(input)?;
            (input, classes) = count(parse_inner_class, number_of_classes as _).parse(input)?;
            AttributeInfo::InnerClasses(classes)
        }
        "LineNumberTable" => {
            let (line_number_table_length, line_number_table);
            (input, line_number_table_length) = be_u16(input)?;
            (input, line_number_table) = count(
                |input| {
                    let (input, start_pc) = be_u16(input)?;
                    let (input, line_number) = be_u16(input)?;
                    Ok((
                        input,
                        LineNumber {
                            start_pc,
                            line_number,
                        },
                    ))
                },
                line_number_table_length as _,
            )
            .parse(input)?;
            AttributeInfo::LineNumberTable(line_number_table)
        }
        "LocalVariableTable" => {
            let (local_variable_table_length, local_variable_table);
            (input, local_variable_table_length) = be_u16(input)?;
            (input, local_variable_table) =
                count(parse_local_variable, local_variable_table_length as _).parse(input)?;
            AttributeInfo::LocalVariableTable(local_variable_table)
        }
        "StackMapTable" => {
            let (number_of_entries, entries);
            (input, number_of_entries) = be_u16(input)?;
            (input, entries) = count(parse_stack_map_frame, number_of_entries as _).parse(input)?;
            AttributeInfo::StackMapTable(entries)
        }
        "SourceFile" => {
            let sourcefile_index;
            (input, sourcefile_index) = be_u16(input)?;
            AttributeInfo::SourceFile { sourcefile_index }
        }
        "Synthetic" => AttributeInfo::Synthetic,
        _ => {
            let info = AttributeInfo::Unknown(input.to_vec());
            input = &input[input.len()..];
            info
        }
    };

    Ok((input, info))
}

fn parse_code<'a>(input: &'a [u8], cp: &ConstantPool) -> PResult<'a, CodeAttribute> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(parse_exception_table_entry, exception_table_length as _).parse(input)?;
    let (input, attributes) = parse_attributes(input, cp)?;

    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code: code.to_vec(),
            exception_table,
            attributes,
        },
    ))
}

fn parse_exception_table_entry(input: &[u8]) -> PResult<'_, ExceptionTableEntry> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

fn parse_inner_class(input: &[u8]) -> PResult<'_, InnerClass> {
    let (input, inner_class_info_index) = be_u16(input)?;
    let (input, outer_class_info_index) = be_u16(input)?;
    let (input, inner_name_index) = be_u16(input)?;
    let (input, inner_class_access_flags) = be_u16(input)?;
    Ok((
        input,
        InnerClass {
            inner_class_info_index,
            outer_class_info_index,
            inner_name_index,
            inner_class_access_flags: InnerClassAccessFlag::from_bits_retain(
                inner_class_access_flags,
            ),
        },
    ))
}

fn parse_local_variable(input: &[u8]) -> PResult<'_, LocalVariable> {
    let (input, start_pc) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, index) = be_u16(input)?;
    Ok((
        input,
        LocalVariable {
            start_pc,
            length,
            name_index,
            descriptor_index,
            index,
        },
    ))
}

fn parse_stack_map_frame(input: &[u8]) -> PResult<'_, StackMapFrame> {
    let (input, frame_type) = be_u8(input)?;
    match frame_type {
        0..=63 => Ok((input, StackMapFrame::Same { frame_type })),
        64..=127 => {
            let (input, stack) = parse_verification_type(input)?;
            Ok((
                input,
                StackMapFrame::SameLocals1StackItem { frame_type, stack },
            ))
        }
        128..=246 => fail(DecodeError::InvalidStackMapFrame(frame_type)),
        247 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, stack) = parse_verification_type(input)?;
            Ok((
                input,
                StackMapFrame::SameLocals1StackItemExtended {
                    offset_delta,
                    stack,
                },
            ))
        }
        248..=250 => {
            let (input, offset_delta) = be_u16(input)?;
            Ok((
                input,
                StackMapFrame::Chop {
                    frame_type,
                    offset_delta,
                },
            ))
        }
        251 => {
            let (input, offset_delta) = be_u16(input)?;
            Ok((input, StackMapFrame::SameExtended { offset_delta }))
        }
        252..=254 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, locals) =
                count(parse_verification_type, (frame_type - 251) as usize).parse(input)?;
            Ok((
                input,
                StackMapFrame::Append {
                    frame_type,
                    offset_delta,
                    locals,
                },
            ))
        }
        255 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, number_of_locals) = be_u16(input)?;
            let (input, locals) =
                count(parse_verification_type, number_of_locals as _).parse(input)?;
            let (input, number_of_stack_items) = be_u16(input)?;
            let (input, stack) =
                count(parse_verification_type, number_of_stack_items as _).parse(input)?;
            Ok((
                input,
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                },
            ))
        }
    }
}

fn parse_verification_type(input: &[u8]) -> PResult<'_, VerificationType> {
    let (input, tag) = be_u8(input)?;
    let verification_type = match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => {
            let (input, cpool_index) = be_u16(input)?;
            return Ok((input, VerificationType::Object { cpool_index }));
        }
        8 => {
            let (input, offset) = be_u16(input)?;
            return Ok((input, VerificationType::Uninitialized { offset }));
        }
        _ => return fail(DecodeError::InvalidVerificationType(tag)),
    };
    Ok((input, verification_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassWriter, MethodBody};

    fn sample_class() -> Vec<u8> {
        let mut writer = ClassWriter::new("Sample", Some("java/lang/Object"));
        writer.add_long(1 << 40);
        writer.add_double(2.5);
        writer.add_field(FieldAccessFlag::STATIC, "counter", "I");
        writer.add_method(
            MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC,
            "main",
            "([Ljava/lang/String;)V",
            Some(MethodBody::new(1, 1, vec![0xb1])),
        );
        writer.set_source_file("Sample.java");
        writer.to_bytes()
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_class();
        bytes[0] = 0xca;
        bytes[3] = 0xbf;
        assert_eq!(class_file(&bytes), Err(DecodeError::BadMagic(0xcafe_babf)));
    }

    #[test]
    fn test_truncated() {
        let bytes = sample_class();
        for len in [0, 3, 9, bytes.len() / 2, bytes.len() - 1] {
            assert_eq!(class_file(&bytes[..len]), Err(DecodeError::Truncated), "{len}");
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = sample_class();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(class_file(&bytes), Err(DecodeError::TrailingBytes(2)));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let bytes = sample_class();
        assert_eq!(class_file(&bytes).unwrap(), class_file(&bytes).unwrap());
    }

    #[test]
    fn test_wide_constants_shadow_next_slot() {
        let class = class_file(&sample_class()).unwrap();
        let cp = class.constant_pool();
        assert_eq!(cp.get(0), Some(&ConstantPoolInfo::Empty));
        let mut wide = 0;
        for (index, info) in cp.iter() {
            if info.is_wide() {
                wide += 1;
                assert_eq!(cp.get(index + 1), Some(&ConstantPoolInfo::Empty));
            }
        }
        assert_eq!(wide, 2);
    }

    #[test]
    fn test_invalid_tag() {
        // magic, version, count = 2, tag 2 (unused)
        let bytes = [0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 2, 2];
        assert_eq!(class_file(&bytes), Err(DecodeError::InvalidTag(2)));
    }

    #[test]
    fn test_stack_map_frames() {
        let body = [
            0, 5, // entries
            10, // same
            70, 1, // same_locals_1_stack_item, int
            249, 0, 3, // chop 2
            253, 0, 4, 4, 7, 0, 9, // append long, Object #9
            255, 0, 2, 0, 1, 8, 0, 6, 0, 1, 5, // full
        ];
        let cp = ConstantPool::new(vec![ConstantPoolInfo::Empty]);
        let (rest, info) = parse_attribute_body("StackMapTable", &body, &cp).unwrap();
        assert!(rest.is_empty());
        let AttributeInfo::StackMapTable(frames) = info else {
            panic!("expected stack map table");
        };
        assert_eq!(frames[0], StackMapFrame::Same { frame_type: 10 });
        assert_eq!(frames[1].offset_delta(), 6);
        assert_eq!(
            frames[2],
            StackMapFrame::Chop {
                frame_type: 249,
                offset_delta: 3
            }
        );
        assert_eq!(
            frames[3],
            StackMapFrame::Append {
                frame_type: 253,
                offset_delta: 4,
                locals: vec![
                    VerificationType::Long,
                    VerificationType::Object { cpool_index: 9 }
                ],
            }
        );
        assert_eq!(
            frames[4],
            StackMapFrame::Full {
                offset_delta: 2,
                locals: vec![VerificationType::Uninitialized { offset: 6 }],
                stack: vec![VerificationType::Null],
            }
        );
    }

    #[test]
    fn test_reserved_frame_type() {
        let cp = ConstantPool::new(vec![ConstantPoolInfo::Empty]);
        let err = parse_attribute_body("StackMapTable", &[0, 1, 200], &cp).unwrap_err();
        assert_eq!(
            err,
            nom::Err::Failure(DecodeError::InvalidStackMapFrame(200))
        );
    }

    #[test]
    fn test_attribute_length_mismatch() {
        let cp = ConstantPool::new(vec![
            ConstantPoolInfo::Empty,
            ConstantPoolInfo::Utf8(Arc::from("SourceFile")),
        ]);
        // SourceFile body is two bytes but three are declared
        let bytes = [0, 1, 0, 0, 0, 3, 0, 1, 0];
        let err = parse_attribute(&bytes, &cp).unwrap_err();
        assert_eq!(
            err,
            nom::Err::Failure(DecodeError::AttributeLength {
                name: "SourceFile".to_string(),
                declared: 3,
                consumed: 2,
            })
        );
    }

    #[test]
    fn test_unknown_attribute_is_kept_raw() {
        let cp = ConstantPool::new(vec![
            ConstantPoolInfo::Empty,
            ConstantPoolInfo::Utf8(Arc::from("Custom")),
        ]);
        let bytes = [0, 1, 0, 0, 0, 2, 7, 8];
        let (rest, attr) = parse_attribute(&bytes, &cp).unwrap();
        assert!(rest.is_empty());
        assert_eq!(attr.info, AttributeInfo::Unknown(vec![7, 8]));
    }
}
