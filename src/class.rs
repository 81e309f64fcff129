//! The on-disk class descriptor: structures, the nom decoder, a serializer
//! and a human-readable dump.

pub mod parser;
mod structs;
mod viewer;
pub mod writer;

pub use parser::class_file;
pub use structs::*;
pub use writer::{ClassWriter, MethodBody};
