// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative task runtime: typed channels, fair multi-way selection,
//! one-shot futures, and timers on a small worker pool.
//!
//! Tasks are futures driven by a fixed pool of workers; they suspend
//! only at channel, selection, future, and timer operations. Channels
//! carry both tasks and plain OS threads on the same wait queues, so
//! the two worlds mix freely.
//!
//! Components:
//! - channel — bounded FIFO rendezvous points, three operation modes
//! - select  — commit-one selection across channel operations
//! - future  — value-or-error one-shot carriers, wait_any/wait_all
//! - timer   — alarm service firing into tasks or onto time channels
//! - sched   — ready queues, waiting set, worker pool, `go`/`start`

pub mod channel;
pub mod future;
pub mod sched;
pub mod select;
pub mod timer;
pub(crate) mod waitq;

pub use channel::{make_channel, Channel, Receiver, Sender, TrySendError};
pub use future::{
    async_call, wait_all, wait_all_timeout, wait_any, wait_any_timeout, Future, TaskError,
};
pub use sched::scheduler::{go, scheduler, start, Scheduler};
pub use select::{select, select_timeout, try_select, ChannelOp};
pub use timer::Timer;
