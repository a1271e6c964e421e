//! Policy Spec Sync CRD Definitions
//!
//! The `Policy` custom resource as seen by the spec sync controller on both
//! the hub and the managed cluster, plus the identifiers the controller stamps
//! on objects it owns.

pub mod policy;
pub mod references;
pub mod mirror;

pub use policy::*;
pub use references::*;
pub use mirror::*;
