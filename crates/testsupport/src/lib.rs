//! Test support utilities for the storage workspace.
//!
//! Provides property-based generators for index workloads and small
//! assertion helpers shared by the crate test suites. Workspace-level
//! end-to-end tests (persistence, eviction equivalence) live under
//! `tests/`.

pub mod assertions;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::proptest_generators::*;
}
