//! Process approval workflow.
//!
//! Creates a process record, waits for a human approval, waits until no other
//! process is running, then runs two commands concurrently and completes the
//! process. Outbound transports are reached only through the `ports` traits.

pub mod ports;
pub mod workflow;

pub use ports::{ApprovalNotifier, CommandDispatcher, CommandError};
pub use workflow::{APPROVAL_WORKFLOW, ApprovalSettings, ApprovalWorkflow};
