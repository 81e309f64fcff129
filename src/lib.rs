pub mod class;
pub mod consts;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod runtime;

pub use class::ClassFile;
pub use error::{DecodeError, ExecError, LoadError, RuntimeError};
pub use runtime::{Runtime, RuntimeConfig};
