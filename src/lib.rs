mod code;
mod context;
mod error;
mod memory;
mod ops;
mod provider;
mod resolver;
mod trap;
mod types;

pub use code::{ABI_VERSION, ABI_VERSION_SYMBOL, Code};
pub use context::{ExecutionContext, GasState, InstancePrefix};
pub use error::{Error, Result};
pub use memory::{DEFAULT_TABLE_ELEMENTS, LinearMemory, PAGE_SIZE, Table, TableElem};
pub use ops::RuntimeOps;
pub use provider::{ArtifactHandle, CodeProvider, DlProvider};
pub use resolver::{FuncHandle, Resolver};
pub use trap::{TrapCode, TrapHandler, set_trap_handler};
pub use types::{FuncType, TypeId, TypeRegistry, ValKind};
