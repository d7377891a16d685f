//! kubesim: a small container-orchestrator control plane
//!
//! Best-fit pod placement over CPU capacity, heartbeat-timeout failure
//! detection and automatic rescheduling of evicted pods.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod provision;
