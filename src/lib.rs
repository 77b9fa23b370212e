//! # Gapline
//!
//! A resource-timeline scheduler for task-parallel distributed workloads.
//!
//! Applications hand Gapline a dependency graph of *actions* — opaque units
//! of work with data-flow edges and one or more candidate implementations —
//! and a pool of heterogeneous worker resources. Gapline decides *where and
//! when* every action should run, never *what* work exists or how its data
//! moves.
//!
//! ## Core Problem Solved
//!
//! Distributed/HPC runtimes place work using *estimated* durations, but
//! executions never match the estimates exactly. Left uncorrected, the
//! accumulated drift turns a carefully packed schedule into dead capacity.
//! Gapline models each worker's spare capacity as a timeline of **gaps**,
//! places actions by carving requirements out of those gaps, and
//! periodically **re-simulates** each worker's pending workload from
//! scratch to discard the drift — without ever reordering work that is
//! already running.
//!
//! ## Key Features
//!
//! - **Gap timeline per resource**: spare capacity as timestamped
//!   intervals, consumed by placement and re-created by completions
//! - **Two-level scoring**: data locality, earliest availability, and
//!   learned per-implementation durations rank every (resource,
//!   implementation) candidate
//! - **Concurrent graph maintenance**: per-action reentrant locks with a
//!   fixed acquisition order keep the two edge kinds (data and resource
//!   ordering) mutually consistent
//! - **Local re-optimization**: a background worker replays each resource's
//!   pending schedule through a discrete-event simulation and atomically
//!   installs the corrected gap list
//! - **Learned profiles**: observed execution times feed back into the
//!   duration estimates used by future placements
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gapline::builders::build_task_scheduler;
//! use gapline::config::SchedulerConfig;
//! use gapline::core::{Action, Implementation, ResourceDescription, ResourceKind};
//!
//! let scheduler = build_task_scheduler(&SchedulerConfig::local_default(), my_dispatcher)?;
//! let action = Action::new(
//!     1,
//!     0,
//!     0,
//!     vec![Implementation::new(0, 0, ResourceDescription::with(ResourceKind::Cpu, 2))],
//! );
//! scheduler.schedule(&action)?;
//! scheduler.start_optimizer(gapline::core::DEFAULT_OPTIMIZATION_INTERVAL)?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Core scheduling types and algorithms.
pub mod core;
/// Configuration models for resources and the optimizer.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
