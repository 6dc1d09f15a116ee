//! The podlog payloads
//!
//! This library converts a configured log volume into the shape of the pods
//! podlog creates: how many pods, how many lines each pod writes and what the
//! pod object submitted to the cluster looks like. Nothing here performs IO.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod sizing;
pub mod template;

pub use sizing::{Payload, Target};
pub use template::Template;
