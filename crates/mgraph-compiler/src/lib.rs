//! Incremental compiler over the metamodel graph.
//!
//! Sources are staged in a [`SourceRegistry`] and compiled by
//! [`Repository::compile`] inside a single [`CompilationTransaction`]:
//! parse into stub-bearing nodes, resolve to a fixed point, validate, then
//! commit or roll back to the previous baseline exactly.

mod builder;
pub mod error;
pub mod options;
pub mod registry;
pub mod repository;
mod resolve;
pub mod transaction;
mod validate;

pub use error::{CompilationError, ErrorKind, RegistryError};
pub use options::CompilerOptions;
pub use registry::{SourceRegistry, SourceState, SourceUnit};
pub use repository::{CompileReport, PropertyLocation, Repository};
pub use transaction::{CommitOutcome, CompilationTransaction, TransactionState};
pub use validate::multiplicity_fits;
