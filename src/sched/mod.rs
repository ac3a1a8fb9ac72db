// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task scheduling.
//!
//! Components:
//! - `task`      — task object, state machine, waker
//! - `queue`     — per-worker ready queues and the dispatch array
//! - `scheduler` — worker pool, waiting set, task launch

pub(crate) mod queue;
pub mod scheduler;
pub(crate) mod task;
