//! flock-dispatch: the admission-control surface for an external router.
//!
//! The router asks [`Dispatcher::try_dispatch`] for a worker before
//! forwarding a unit of work, and reports back through
//! [`Dispatcher::complete`] once the forwarded call finishes. Every
//! `Assigned` answer holds one unit of the worker's capacity until the
//! matching `complete`; a router that never completes leaks that capacity.

pub mod dispatcher;

pub use dispatcher::{DispatchResult, Dispatcher, Outcome};
