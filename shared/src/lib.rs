pub use error::{BindingError, Error, Result, ValidationError};

pub mod error;
pub mod ids;
pub mod keys;
pub mod time;
