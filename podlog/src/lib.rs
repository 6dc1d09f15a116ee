//! The podlog Kubernetes log volume generator.
//!
//! This library supports the podlog binary found elsewhere in this project.
//! podlog provisions a set of namespaces and then, for a fixed run window,
//! keeps creating short-lived pods that each write a known number of log
//! lines. Pod creation is admission controlled: a new batch is only sent when
//! the pods still live in the cluster plus one full batch stay under the
//! target.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod admission;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod observe;
pub mod provision;
pub mod run;
pub mod telemetry;
