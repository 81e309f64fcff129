use std::sync::Arc;

mod attributes;
mod constant_pool;

pub use attributes::*;
pub use constant_pool::*;

use crate::{
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
    error::BadConstant,
};

/// A decoded class file. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) access_flags: ClassAccessFlag,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<FieldInfo>,
    pub(crate) methods: Vec<MethodInfo>,
    pub(crate) attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub(crate) access_flags: FieldAccessFlag,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub(crate) access_flags: MethodAccessFlag,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn access_flags(&self) -> ClassAccessFlag {
        self.access_flags
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn name(&self) -> Result<&Arc<str>, BadConstant> {
        self.constant_pool.class_name(self.this_class)
    }

    /// `None` only for `java/lang/Object`.
    pub fn super_name(&self) -> Result<Option<&Arc<str>>, BadConstant> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&Arc<str>>, BadConstant> {
        self.interfaces
            .iter()
            .map(|&index| self.constant_pool.class_name(index))
            .collect()
    }

    pub fn source_file(&self) -> Option<&Arc<str>> {
        self.attributes.iter().find_map(|attr| match attr.info {
            AttributeInfo::SourceFile { sourcefile_index } => {
                self.constant_pool.utf8(sourcefile_index).ok()
            }
            _ => None,
        })
    }
}

impl FieldInfo {
    pub fn access_flags(&self) -> FieldAccessFlag {
        self.access_flags
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn constant_value_index(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr.info {
            AttributeInfo::ConstantValue {
                constantvalue_index,
            } => Some(constantvalue_index),
            _ => None,
        })
    }
}

impl MethodInfo {
    pub fn access_flags(&self) -> MethodAccessFlag {
        self.access_flags
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn code(&self) -> Option<&Arc<CodeAttribute>> {
        self.attributes.iter().find_map(|attr| match &attr.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}
