//! Gauntlet Core - Strongly-typed identifiers and limits for Gauntlet.
//!
//! This crate holds the pieces every other Gauntlet crate agrees on: the
//! thread and state identifiers that flow through executors and reports, and
//! the explicit bounds a workload is validated against.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `Tid` with `StateId`
//! - **Explicit limits**: Every multiplied dimension has a bounded maximum
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{StateId, Tid};
