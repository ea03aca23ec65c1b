//! Target URI validation

pub mod resolver;
pub mod validator;

pub use resolver::{Resolve, StaticResolver, SystemResolver};
pub use validator::{TargetSpec, UriValidator, ValidatedTarget, ValidationResult};
