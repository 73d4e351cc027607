use core::fmt::{self, Display};

/// The error type used by this library.
///
/// Job-staging calls return these directly. Faults the worker detects
/// while a job is in flight terminate the job and are parked in
/// [`Journal::last_error`](crate::Journal::last_error), to be inspected
/// once [`Journal::busy`](crate::Journal::busy) reports idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The device index passed at init does not name a known flash part.
    UnknownDevice,

    /// A job is already in flight; only `busy`, `spi_len` and `worker`
    /// may be called until it finishes.
    Busy,

    /// Every slot of the caller-supplied queue table is occupied.
    NoFreeSlot,

    /// The requested queue would extend past the last sector of the
    /// flash part.
    Capacity,

    /// `mount` was called before any queue was registered.
    NoQueue,

    /// The queue id does not name a registered queue.
    BadQueue,

    /// The queue's metadata has not been rebuilt; `mount` first.
    NotInitialised,

    /// The queue holds no records.
    Empty,

    /// The payload does not fit the queue's element size.
    PayloadTooLarge,

    /// The transfer would not fit the shared SPI packet buffer.
    SpiBufOverflow,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::UnknownDevice => "unknown flash device index",
            Error::Busy => "a job is already in flight",
            Error::NoFreeSlot => "queue table is full",
            Error::Capacity => "queue does not fit on the flash device",
            Error::NoQueue => "no queue registered",
            Error::BadQueue => "no such queue",
            Error::NotInitialised => "queue not mounted",
            Error::Empty => "queue holds no records",
            Error::PayloadTooLarge => "payload exceeds element size",
            Error::SpiBufOverflow => "transfer exceeds the SPI packet buffer",
        };
        f.write_str(s)
    }
}
