mod amount;
mod module;
mod reconciler;

pub use amount::{AmountError, Tokens};
pub use module::TransitionRule;
pub use reconciler::{
    BalanceUpdate, ModuleSpec, RegistrationStatus, SharedState, Snapshot, StateReconciler,
};
