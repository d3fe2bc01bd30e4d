//! Desktop capability provider for the pilot agent: validates the model's
//! calls, gates them through approvals and per-run quotas, hands them to a
//! host backend, and keeps a hash-chained ledger of every call in a run.

pub mod approvals;
pub mod desktop;
pub mod ledger;
pub mod policy;
pub mod runtime;

pub use approvals::ApprovalHandler;
pub use desktop::{
    resolve_executable, BackendError, DesktopAction, DesktopBackend, DesktopEvent,
    DesktopObservation, RecordingBackend,
};
pub use ledger::{LedgerEntry, RunLedger};
pub use policy::{ActionKind, ActionLimit, ActionPolicy, PolicyError};
pub use runtime::{DesktopRunReport, DesktopRuntime, DesktopRuntimeBuilder};
