//! Ports: capability interfaces implemented by the infrastructure layer.

pub mod storage;

pub use storage::{
    HealthReport, LeaseStats, ReclaimReport, StorageBackend, TaskFilter, TaskInsertOutcome,
};
