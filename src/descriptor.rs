use std::fmt::{self, Display};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, one_of},
    combinator::{all_consuming, map},
    multi::many0,
    sequence::delimited,
};

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor(pub(crate) FieldType);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub(crate) parameters: Vec<FieldType>,
    pub(crate) return_type: ReturnType,
}

pub type ReturnType = Option<FieldType>;

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Object(String),
    Short,
    Boolean,
    Array(Box<FieldType>),
}

impl FieldType {
    /// Long and double take two slots on the operand stack and in locals.
    pub fn is_long(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    pub fn slot_size(&self) -> usize {
        if self.is_long() { 2 } else { 1 }
    }

    /// Bytes occupied in an object body, a static area or a primitive array.
    pub fn byte_width(&self) -> usize {
        match self {
            FieldType::Byte | FieldType::Boolean => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Int | FieldType::Float | FieldType::Object(_) | FieldType::Array(_) => 4,
            FieldType::Long | FieldType::Double => 8,
        }
    }

    pub fn to_descriptor(&self) -> String {
        self.to_string()
    }

    /// The class name used for an array whose elements have this type, e.g. `[I`.
    pub fn array_class_name(&self) -> String {
        format!("[{self}")
    }

    pub fn parse(input: &str) -> Result<FieldType, LoadError> {
        parse_field_descriptor(input)
            .map(|(_, FieldDescriptor(field_type))| field_type)
            .map_err(|_| LoadError::InvalidDescriptor {
                member: "field".to_string(),
                descriptor: input.to_string(),
            })
    }

    /// Interprets an array class name like `[[I` or `[Ljava/lang/String;`.
    pub fn from_array_class(class_name: &str) -> Option<FieldType> {
        match FieldType::parse(class_name) {
            Ok(FieldType::Array(element)) => Some(*element),
            _ => None,
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Array(element) => write!(f, "[{element}"),
        }
    }
}

impl MethodDescriptor {
    pub fn parse(input: &str) -> Result<MethodDescriptor, LoadError> {
        parse_method_descriptor(input)
            .map(|(_, descriptor)| descriptor)
            .map_err(|_| LoadError::InvalidDescriptor {
                member: "method".to_string(),
                descriptor: input.to_string(),
            })
    }

    pub fn parameters(&self) -> &[FieldType] {
        &self.parameters
    }

    pub fn return_type(&self) -> Option<&FieldType> {
        self.return_type.as_ref()
    }

    /// Slots the caller pops for this call: one per parameter, two for
    /// long/double, plus the receiver unless the method is static.
    pub fn arg_slots(&self, is_static: bool) -> usize {
        let params: usize = self.parameters.iter().map(FieldType::slot_size).sum();
        if is_static { params } else { params + 1 }
    }

    pub fn return_slots(&self) -> usize {
        self.return_type.as_ref().map_or(0, FieldType::slot_size)
    }
}

impl Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for parameter in &self.parameters {
            write!(f, "{parameter}")?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(return_type) => write!(f, "{return_type}"),
            None => f.write_str("V"),
        }
    }
}

pub fn parse_field_descriptor(input: &str) -> IResult<&str, FieldDescriptor> {
    map(all_consuming(parse_field_type), FieldDescriptor).parse(input)
}

pub fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    let (input, parameters) =
        delimited(char('('), many0(parse_field_type), char(')')).parse(input)?;

    let (input, return_type) = all_consuming(parse_return_type_descriptor).parse(input)?;

    Ok((
        input,
        MethodDescriptor {
            parameters,
            return_type,
        },
    ))
}

pub fn parse_return_type_descriptor(input: &str) -> IResult<&str, ReturnType> {
    alt((map(parse_field_type, Some), parse_void_type)).parse(input)
}

fn parse_field_type(input: &str) -> IResult<&str, FieldType> {
    alt((parse_base_type, parse_object_type, parse_array_type)).parse(input)
}

fn parse_base_type(input: &str) -> IResult<&str, FieldType> {
    let (input, ch) = one_of("BCDFIJSZ")(input)?;
    let field_type = match ch {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        _ => FieldType::Boolean,
    };
    Ok((input, field_type))
}

fn parse_object_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('L')(input)?;

    let (input, class_name) = take_till1(|c| c == ';')(input)?;

    let (input, _) = char(';')(input)?;

    Ok((input, FieldType::Object(class_name.to_string())))
}

fn parse_array_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('[')(input)?;

    let (input, field_type) = parse_field_type(input)?;

    Ok((input, FieldType::Array(Box::new(field_type))))
}

fn parse_void_type(input: &str) -> IResult<&str, Option<FieldType>> {
    let (input, _) = char('V')(input)?;
    Ok((input, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_slots() {
        let descriptor = MethodDescriptor::parse("(IJLFoo;)V").unwrap();
        assert_eq!(descriptor.arg_slots(false), 5);
        assert_eq!(descriptor.arg_slots(true), 4);
        assert_eq!(descriptor.return_slots(), 0);
    }

    #[test]
    fn test_nested_array_counts_one_slot() {
        let descriptor = MethodDescriptor::parse("([[JD[Ljava/lang/String;)J").unwrap();
        assert_eq!(descriptor.arg_slots(true), 1 + 2 + 1);
        assert_eq!(descriptor.return_slots(), 2);
    }

    #[test]
    fn test_byte_width() {
        let widths: Vec<_> = ["B", "Z", "C", "S", "I", "F", "LFoo;", "[J", "J", "D"]
            .iter()
            .map(|d| FieldType::parse(d).unwrap().byte_width())
            .collect();
        assert_eq!(widths, vec![1, 1, 2, 2, 4, 4, 4, 4, 8, 8]);
    }

    #[test]
    fn test_display_roundtrip() {
        for d in ["([ILjava/lang/Object;J)Z", "()V", "(D)[[Ljava/lang/String;"] {
            assert_eq!(MethodDescriptor::parse(d).unwrap().to_string(), d);
        }
    }

    #[test]
    fn test_invalid_descriptors() {
        assert!(FieldType::parse("Q").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("L;").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("()VV").is_err());
    }

    #[test]
    fn test_array_class() {
        assert_eq!(
            FieldType::from_array_class("[Ljava/lang/String;"),
            Some(FieldType::Object("java/lang/String".to_string()))
        );
        assert_eq!(FieldType::from_array_class("java/lang/String"), None);
        assert_eq!(FieldType::Int.array_class_name(), "[I");
    }
}
