pub mod error;
pub mod port;
pub mod schedule;
pub mod state;

pub mod prelude {
    pub use crate::error::{CoreError, ProtectionError};
    pub use crate::port::{DataStore, Garbage, GarbageStore, KeyLease, Keychain, PlanStore, RunStore};
    pub use crate::schedule::{Placement, TaintEffect, Toleration, placement_for};
    pub use crate::state::MemoryStore;
}
