//! Sync-wave ordered scale-down
//!
//! - `discovery`: scalable workloads of an application, grouped by wave
//! - `tree`: which pods of the live resource tree still belong to a workload
//! - `poller`: per-workload drain polling and forced pod deletion
//! - `orchestrator`: wave scheduling, cancellation and reporting

pub mod discovery;
mod orchestrator;
mod poller;
pub mod tree;


pub use discovery::{discover, group_by_wave, scalable_workloads, WaveGroup, SCALABLE_KINDS};
pub use orchestrator::{ScaleDownReport, ScaleDownRequest, WaveReport, WaveScheduler};
pub use poller::{DrainReport, DrainState};
pub use tree::{remaining_pods, TreeIndex};
