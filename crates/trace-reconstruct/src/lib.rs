//! State reconstructor (C6): point-in-time reconstruction, diffing,
//! replay, condition search, and critical-path analysis.

pub mod cache;
pub mod critical_path;
pub mod error;
pub mod reconstructor;
pub mod state_apply;

pub use critical_path::{Bottleneck, CriticalPathResult, ParallelizationOpportunity};
pub use error::{ReconstructError, ReconstructResult};
pub use reconstructor::Reconstructor;
