mod dispatch;
mod handle_table;
mod naming;
mod policy;

pub use dispatch::{BUILTIN_TYPES, CapabilityTable, Dispatcher};
pub use handle_table::{HandleTable, PendingOperation};
pub use naming::NameGenerator;
pub use policy::{ReductionPlan, resolve as resolve_reduction};
