//! Data-driven task parallelism.
//!
//! Submit closures together with the memory keys they read and write; the
//! runtime discovers the parallelism from that stream of declarations and
//! runs the tasks on a worker pool, keeping the sequential-consistency
//! illusion per key: writers run in submission order, readers order against
//! writers, concurrent readers overlap.
//!
//! Entry points: [`Builder`] to construct a [`Runtime`], [`Runtime::task`]
//! (and friends) to submit, [`deps!`] to build key lists, and
//! [`Runtime::taskwait`] as the cooperative barrier. Setting the
//! `DISABLE_MINIRUN` environment variable before construction turns the
//! whole thing into inline execution for debugging.

pub mod dep;
pub use dep::{Dep, IntoDep};

pub mod runtime;
pub use runtime::runtime::DISABLE_ENV;
pub use runtime::{Builder, DEFAULT_GROUP, EPHEMERAL_GROUP, GroupId, Runtime, TaskBuilder};

pub(crate) mod sentinel;

pub(crate) mod task;

pub(crate) mod utils;
