//! Registered custom functions: validation, persistence and the
//! `customFunctions` namespace handed to the execution pipeline.

mod error;
pub mod model;
pub mod namespace;
pub mod registry;
pub mod store;

pub use error::RegistryError;
pub use model::{CustomFunction, FunctionSummary, RESERVED_NAMES, Registration, content_hash, validate_name};
pub use namespace::Namespace;
pub use registry::{FunctionRegistry, RegistrySnapshot};
pub use store::{FunctionStore, MemoryFunctionStore, RedbFunctionStore};
