//! Persistent circular-buffer record queues on external SPI NOR flash.
//!
//! One physical flash chip hosts one or more logical queues, each owning
//! a contiguous run of sectors. Records are appended under a
//! monotonically increasing id and the oldest sector is erased when a
//! queue wraps, so the newest records always survive a power cycle.
//! After power-up a mount pass rebuilds every queue's metadata from the
//! raw flash contents alone.
//!
//! The driver is a cooperative state machine and never owns the bus:
//! each [`Journal::worker`] call leaves at most one SPI packet in the
//! shared buffer and the host clocks it out before calling the worker
//! again. Hosts with a blocking [`embedded-hal`] SPI master can use the
//! loop in the [`blocking`] module instead of writing their own.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/spi-journal/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
pub mod blocking;
pub mod device;
mod error;
mod journal;
mod queue;
mod record;
#[cfg(test)]
mod testflash;
mod utils;
mod wire;

pub use crate::error::Error;
pub use crate::journal::{Journal, DATA_BUF_LEN};
pub use crate::queue::{Queue, QueueId};
pub use crate::record::{Header, HEADER_LEN};
pub use crate::wire::{CMD_OVERHEAD, SPI_BUF_LEN};
