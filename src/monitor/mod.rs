//! Training-time monitors
//!
//! Early stopping over a monitored metric, disk-space gating for sweep work,
//! and background resource sampling.

pub mod early_stopping;
pub mod resources;

pub use early_stopping::{EarlyStopping, StoppingRecord};
pub use resources::{
    cleanup_old_sweeps, FixedProbe, FreeSpaceProbe, ResourceGate, ResourceReading,
    ResourceSampler, ResourceUsageSummary, VolumeProbe,
};
