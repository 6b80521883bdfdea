//! Foreman - lease-based task orchestration service.
//!
//! Dispatches work items to ephemeral agents under time-bounded leases,
//! tracks retries and failures, and exposes its operations through an RPC
//! tool protocol, an authenticated HTTP REST API, and a CLI.

pub mod adapters;
pub mod commands;
pub mod domain;
pub mod infrastructure;
pub mod services;
