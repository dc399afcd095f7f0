pub mod constants;
pub mod error;

pub use error::{ErrorKind, KeelError, Result};
