use std::sync::Arc;

use crate::error::BadConstant;

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolInfo {
    /// Index 0 and the slot shadowed by every long/double.
    Empty,
    Utf8(Arc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

pub(crate) mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

impl ConstantPoolInfo {
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantPoolInfo::Long(_) | ConstantPoolInfo::Double(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConstantPoolInfo::Empty => "Empty",
            ConstantPoolInfo::Utf8(_) => "Utf8",
            ConstantPoolInfo::Integer(_) => "Integer",
            ConstantPoolInfo::Float(_) => "Float",
            ConstantPoolInfo::Long(_) => "Long",
            ConstantPoolInfo::Double(_) => "Double",
            ConstantPoolInfo::Class { .. } => "Class",
            ConstantPoolInfo::String { .. } => "String",
            ConstantPoolInfo::Fieldref { .. } => "Fieldref",
            ConstantPoolInfo::Methodref { .. } => "Methodref",
            ConstantPoolInfo::InterfaceMethodref { .. } => "InterfaceMethodref",
            ConstantPoolInfo::NameAndType { .. } => "NameAndType",
            ConstantPoolInfo::MethodHandle { .. } => "MethodHandle",
            ConstantPoolInfo::MethodType { .. } => "MethodType",
            ConstantPoolInfo::Dynamic { .. } => "Dynamic",
            ConstantPoolInfo::InvokeDynamic { .. } => "InvokeDynamic",
            ConstantPoolInfo::Module { .. } => "Module",
            ConstantPoolInfo::Package { .. } => "Package",
        }
    }
}

/// A symbolic reference to a field or method, fully resolved to strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// 1-based constant pool; slot 0 always holds [`ConstantPoolInfo::Empty`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    pub(crate) entries: Vec<ConstantPoolInfo>,
}

impl ConstantPool {
    pub(crate) fn new(entries: Vec<ConstantPoolInfo>) -> Self {
        Self { entries }
    }

    /// The `constant_pool_count` as written in the file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Option<&ConstantPoolInfo> {
        self.entries.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantPoolInfo)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, info)| (index as u16, info))
    }

    pub fn utf8(&self, index: u16) -> Result<&Arc<str>, BadConstant> {
        match self.get(index) {
            Some(ConstantPoolInfo::Utf8(string)) => Ok(string),
            _ => Err(BadConstant::new(index, "Utf8")),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&Arc<str>, BadConstant> {
        match self.get(index) {
            Some(ConstantPoolInfo::Class { name_index }) => self.utf8(*name_index),
            _ => Err(BadConstant::new(index, "Class")),
        }
    }

    pub fn string(&self, index: u16) -> Result<&Arc<str>, BadConstant> {
        match self.get(index) {
            Some(ConstantPoolInfo::String { string_index }) => self.utf8(*string_index),
            _ => Err(BadConstant::new(index, "String")),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&Arc<str>, &Arc<str>), BadConstant> {
        match self.get(index) {
            Some(ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(BadConstant::new(index, "NameAndType")),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<MemberRef<'_>, BadConstant> {
        match self.get(index) {
            Some(ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            }) => self.member_ref(*class_index, *name_and_type_index),
            _ => Err(BadConstant::new(index, "Fieldref")),
        }
    }

    /// Accepts both `Methodref` and `InterfaceMethodref`.
    pub fn method_ref(&self, index: u16) -> Result<MemberRef<'_>, BadConstant> {
        match self.get(index) {
            Some(
                ConstantPoolInfo::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            ) => self.member_ref(*class_index, *name_and_type_index),
            _ => Err(BadConstant::new(index, "Methodref")),
        }
    }

    fn member_ref(
        &self,
        class_index: u16,
        name_and_type_index: u16,
    ) -> Result<MemberRef<'_>, BadConstant> {
        let class_name = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class_name,
            name,
            descriptor,
        })
    }
}
