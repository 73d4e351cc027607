//! A blocking host loop for the worker, for targets with an
//! [`embedded-hal`] SPI master and a chip-select pin.
//!
//! The journal itself only ever fills the shared packet buffer; this
//! module ships each packet over the bus and calls the worker again
//! until the job finishes.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

use crate::device::Status;
use crate::journal::Journal;
use crate::queue::QueueId;
use core::fmt::{self, Debug, Display};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by the blocking adapter.
///
/// This can encapsulate an SPI or GPIO error, and adds the journal's own
/// errors on top of that.
pub enum Error<SPI: Transfer<u8>, CS: OutputPin> {
    /// An SPI transfer failed.
    Spi(SPI::Error),

    /// A GPIO could not be set.
    Gpio(CS::Error),

    /// The journal rejected or aborted the job.
    Driver(crate::Error),

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<SPI: Transfer<u8>, CS: OutputPin> Debug for Error<SPI, CS>
where
    SPI::Error: Debug,
    CS::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::Driver(driver) => write!(f, "Error::Driver({:?})", driver),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<SPI: Transfer<u8>, CS: OutputPin> Display for Error<SPI, CS>
where
    SPI::Error: Display,
    CS::Error: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI error: {}", spi),
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::Driver(driver) => write!(f, "driver error: {}", driver),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

/// Owns the bus pair and pumps the worker.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master to which the flash chip is attached.
/// * **`CS`**: The **C**hip-**S**elect line attached to the `\CS`/`\CE`
///   pin of the flash chip.
#[derive(Debug)]
pub struct Bus<SPI: Transfer<u8>, CS: OutputPin> {
    spi: SPI,
    cs: CS,
}

impl<SPI: Transfer<u8>, CS: OutputPin> Bus<SPI, CS> {
    /// Creates the host loop. `cs` is driven low for the duration of
    /// each packet.
    pub fn new(spi: SPI, cs: CS) -> Bus<SPI, CS> {
        Bus { spi, cs }
    }

    /// Returns the SPI and chip select objects so they can be used
    /// elsewhere.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn command(&mut self, bytes: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        // If the SPI transfer fails, make sure to disable CS anyways
        self.cs.set_low().map_err(Error::Gpio)?;
        let spi_result = self.spi.transfer(bytes).map_err(Error::Spi);
        self.cs.set_high().map_err(Error::Gpio)?;
        spi_result?;
        Ok(())
    }

    /// Reads the status register.
    pub fn read_status(&mut self, journal: &Journal<'_>) -> Result<Status, Error<SPI, CS>> {
        let mut buf = [journal.device().opcode_read_status, 0];
        self.command(&mut buf)?;

        Ok(Status::from_bits_truncate(buf[1]))
    }

    /// Drives the staged job to completion.
    pub fn run(&mut self, journal: &mut Journal<'_>) -> Result<(), Error<SPI, CS>> {
        while journal.busy() {
            journal.worker();
            let packet = journal.packet_mut();
            if !packet.is_empty() {
                self.command(packet)?;
            }
        }
        match journal.last_error() {
            Some(e) => Err(Error::Driver(e)),
            None => Ok(()),
        }
    }

    /// Rebuilds queue metadata from flash; see
    /// [`Journal::mount`](crate::Journal::mount).
    pub fn mount(&mut self, journal: &mut Journal<'_>) -> Result<(), Error<SPI, CS>> {
        journal.mount().map_err(Error::Driver)?;
        self.run(journal)
    }

    /// Appends `payload` to queue `id`; see
    /// [`Journal::append`](crate::Journal::append).
    pub fn append(
        &mut self,
        journal: &mut Journal<'_>,
        id: QueueId,
        payload: &[u8],
    ) -> Result<(), Error<SPI, CS>> {
        journal.append(id, payload).map_err(Error::Driver)?;
        self.run(journal)
    }

    /// Fetches the oldest record of queue `id` into `buf` and returns
    /// the number of bytes copied.
    pub fn get(
        &mut self,
        journal: &mut Journal<'_>,
        id: QueueId,
        buf: &mut [u8],
    ) -> Result<usize, Error<SPI, CS>> {
        journal.get(id).map_err(Error::Driver)?;
        self.run(journal)?;
        Ok(journal.read_payload(buf))
    }

    /// Reads `buf.len()` bytes at the absolute byte address `addr`.
    pub fn read_raw(
        &mut self,
        journal: &mut Journal<'_>,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<usize, Error<SPI, CS>> {
        journal.read_raw(addr, buf.len() as u16).map_err(Error::Driver)?;
        self.run(journal)?;
        Ok(journal.read_payload(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Queue;
    use crate::record::ERASED;
    use crate::testflash::SimFlash;
    use core::convert::Infallible;

    /// A bus whose far end is the simulated flash.
    struct SimBus(SimFlash);

    impl Transfer<u8> for SimBus {
        type Error = Infallible;

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
            self.0.transact(words);
            Ok(words)
        }
    }

    struct NoopPin;

    impl OutputPin for NoopPin {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn round_trip_over_the_bus() {
        let mut queues = [Queue::UNUSED; 2];
        let mut journal = Journal::new(0, &mut queues).unwrap();
        let q = journal.register(0x4A51_0001, 64, 32).unwrap();
        let mut bus = Bus::new(SimBus(SimFlash::new(journal.device())), NoopPin);

        let status = bus.read_status(&journal).unwrap();
        assert!(!status.contains(Status::WIP));

        bus.mount(&mut journal).unwrap();
        bus.append(&mut journal, q, b"hello flash").unwrap();
        bus.mount(&mut journal).unwrap();

        let mut buf = [0; 11];
        assert_eq!(bus.get(&mut journal, q, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello flash");
    }

    #[test]
    fn raw_read_over_the_bus() {
        let mut queues = [Queue::UNUSED; 1];
        let mut journal = Journal::new(0, &mut queues).unwrap();
        journal.register(0x4A51_0002, 16, 8).unwrap();
        let mut bus = Bus::new(SimBus(SimFlash::new(journal.device())), NoopPin);

        let mut buf = [0; 8];
        assert_eq!(bus.read_raw(&mut journal, 0x1000, &mut buf).unwrap(), 8);
        assert_eq!(buf, [ERASED; 8]);
    }

    #[test]
    fn driver_errors_pass_through() {
        let mut queues = [Queue::UNUSED; 1];
        let mut journal = Journal::new(0, &mut queues).unwrap();
        let q = journal.register(0x4A51_0003, 16, 8).unwrap();
        let mut bus = Bus::new(SimBus(SimFlash::new(journal.device())), NoopPin);

        match bus.get(&mut journal, q, &mut []) {
            Err(Error::Driver(crate::Error::NotInitialised)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
