//! The journal driver: job staging and the cooperative worker.
//!
//! The driver never touches the SPI bus. A job-staging call records what
//! has to happen; each [`Journal::worker`] call then advances the job by
//! exactly one SPI transaction, leaving the request in the shared packet
//! buffer. The host clocks it out full-duplex, stores the response in
//! place and calls the worker again. No call ever blocks, so the worker
//! can be driven from a superloop or a scheduler tick.
//!
//! One job is in flight at a time; staging calls fail with
//! [`Error::Busy`] until [`Journal::busy`] reports idle again.

use crate::device::{FlashDevice, DEVICES};
use crate::error::Error;
use crate::queue::{Queue, QueueId};
use crate::record::{Header, Slot, HEADER_LEN};
use crate::wire::{Packet, CMD_OVERHEAD, SPI_BUF_LEN};
use core::fmt;

/// Capacity of the staging buffer shared by append payloads and fetched
/// records.
pub const DATA_BUF_LEN: usize = SPI_BUF_LEN - CMD_OVERHEAD;

/// Driver handle for one flash part and its queue table.
pub struct Journal<'q> {
    dev: &'static FlashDevice,
    queues: &'q mut [Queue],
    job: Job,
    last_error: Option<Error>,
    spi: Packet,
    data: [u8; DATA_BUF_LEN],
    data_len: u16,
}

enum Job {
    Idle,
    Mount(Mount),
    Append(Append),
    Get(Get),
    Raw(Raw),
}

/// Outcome of advancing a job by one worker call.
enum Step {
    /// A packet is pending; call the worker again after transacting it.
    Pending,
    /// The job finished.
    Done,
    /// The job aborted; the error is surfaced via `last_error`.
    Failed(Error),
}

impl<'q> Journal<'q> {
    /// Creates a driver for the flash part at `device_index` in
    /// [`DEVICES`], taking ownership of the caller-allocated queue
    /// table.
    pub fn new(device_index: usize, queues: &'q mut [Queue]) -> Result<Journal<'q>, Error> {
        let dev = DEVICES.get(device_index).ok_or(Error::UnknownDevice)?;
        debug_assert!(queues.len() <= u8::MAX as usize);
        info!("Journal::new: device = {}", dev.name);
        Ok(Journal {
            dev,
            queues,
            job: Job::Idle,
            last_error: None,
            spi: Packet::new(),
            data: [0; DATA_BUF_LEN],
            data_len: 0,
        })
    }

    /// The flash part this driver was created for.
    pub fn device(&self) -> &'static FlashDevice {
        self.dev
    }

    /// Whether a job is in flight.
    pub fn busy(&self) -> bool {
        !matches!(self.job, Job::Idle)
    }

    /// Number of bytes the host must transact before the next worker
    /// call; 0 means none.
    pub fn spi_len(&self) -> u16 {
        self.spi.len()
    }

    /// The pending SPI packet. The host clocks out exactly these bytes
    /// and overwrites them with the response before calling
    /// [`worker`](Journal::worker) again.
    pub fn packet_mut(&mut self) -> &mut [u8] {
        self.spi.as_mut()
    }

    /// Fault that terminated the most recent job, if any. Cleared when
    /// the next job is staged.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// The queue descriptor behind `id`.
    pub fn queue(&self, id: QueueId) -> &Queue {
        &self.queues[id.0 as usize]
    }

    /// Registers a queue of `num_elems` elements carrying `elem_size`
    /// payload bytes each, tagged with `magic`.
    ///
    /// Purely in-memory: the sector range is reserved directly after the
    /// previously registered queue and nothing is read from flash until
    /// [`mount`](Journal::mount).
    pub fn register(
        &mut self,
        magic: u32,
        elem_size: u16,
        num_elems: u16,
    ) -> Result<QueueId, Error> {
        if self.busy() {
            return Err(Error::Busy);
        }
        let slot = self
            .queues
            .iter()
            .position(|q| !q.used)
            .ok_or(Error::NoFreeSlot)?;
        let start_sector = if slot == 0 {
            0
        } else {
            self.queues[slot - 1].stop_sector + 1
        };
        let queue = Queue::layout(self.dev, magic, elem_size, num_elems, start_sector);
        let entries = (queue.stop_sector - queue.start_sector + 1) * self.dev.pages_per_sector
            / queue.pages_per_element as u32;
        if queue.stop_sector >= self.dev.sector_count() || entries > u16::MAX as u32 {
            return Err(Error::Capacity);
        }
        info!(
            "register: magic {:#010x} in sectors {}..={}, {} entries max",
            queue.magic, queue.start_sector, queue.stop_sector, queue.num_entries_max
        );
        self.queues[slot] = queue;
        Ok(QueueId(slot as u8))
    }

    /// Stages a rebuild of every registered queue whose metadata is
    /// stale: scan its element slots, count live records, find the id
    /// extremes and the next free page, and erase the oldest sector if
    /// the queue has no free page left.
    pub fn mount(&mut self) -> Result<(), Error> {
        if self.busy() {
            return Err(Error::Busy);
        }
        if !self.queues.iter().any(|q| q.used) {
            return Err(Error::NoQueue);
        }
        self.stage(Job::Mount(Mount {
            stage: MountStage::WaitIdle,
            queue: 0,
            elem: 0,
            addr: 0,
        }));
        Ok(())
    }

    /// Stages an append of `payload` to queue `id` under the next record
    /// id.
    ///
    /// The payload is copied out before this returns. The queue's write
    /// cursor is stale once the record is programmed, so the queue drops
    /// back to un-initialised: a [`mount`](Journal::mount) is required
    /// before the next append or get on it.
    pub fn append(&mut self, id: QueueId, payload: &[u8]) -> Result<(), Error> {
        if self.busy() {
            return Err(Error::Busy);
        }
        let dev = self.dev;
        let queue = self
            .queues
            .get_mut(id.0 as usize)
            .filter(|q| q.used)
            .ok_or(Error::BadQueue)?;
        if !queue.initialised {
            return Err(Error::NotInitialised);
        }
        if payload.len() as u32 > queue.payload_capacity(dev) || payload.len() > DATA_BUF_LEN {
            return Err(Error::PayloadTooLarge);
        }
        queue.initialised = false;
        let job = Append {
            stage: AppendStage::WaitIdle,
            queue: id.0,
            id: queue.id_max.wrapping_add(1),
            len: payload.len() as u16,
            written: 0,
            addr: queue.write_addr,
        };
        self.data[..payload.len()].copy_from_slice(payload);
        self.stage(Job::Append(job));
        Ok(())
    }

    /// Stages a read of the oldest record in queue `id`.
    ///
    /// On completion the record's payload area is parked in the driver;
    /// copy it out with [`read_payload`](Journal::read_payload). Queue
    /// state is not touched: records are only ever discarded by the
    /// sector erase of a wrapping [`mount`](Journal::mount).
    pub fn get(&mut self, id: QueueId) -> Result<(), Error> {
        if self.busy() {
            return Err(Error::Busy);
        }
        let dev = self.dev;
        let queue = self
            .queues
            .get(id.0 as usize)
            .filter(|q| q.used)
            .ok_or(Error::BadQueue)?;
        if !queue.initialised {
            return Err(Error::NotInitialised);
        }
        if queue.num_entries == 0 {
            return Err(Error::Empty);
        }
        self.stage(Job::Get(Get {
            stage: GetStage::WaitIdle,
            addr: queue.oldest_addr,
            len: queue.record_len(dev),
        }));
        Ok(())
    }

    /// Stages a raw read of `len` bytes at the absolute byte address
    /// `addr`, bypassing all queue semantics.
    pub fn read_raw(&mut self, addr: u32, len: u16) -> Result<(), Error> {
        if self.busy() {
            return Err(Error::Busy);
        }
        self.stage(Job::Raw(Raw {
            stage: RawStage::WaitIdle,
            addr,
            len,
        }));
        Ok(())
    }

    /// Payload parked by the last completed `get` or `read_raw`.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }

    /// Copies the parked payload into `buf`, clamped to the shorter of
    /// the two, and returns the number of bytes copied.
    pub fn read_payload(&self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data_len as usize);
        buf[..n].copy_from_slice(&self.data[..n]);
        n
    }

    /// Advances the current job by one SPI transaction.
    ///
    /// Inspect [`spi_len`](Journal::spi_len) afterwards: non-zero means
    /// a packet is pending and must be transacted before the next call;
    /// zero with [`busy`](Journal::busy) clear means the job finished
    /// and [`last_error`](Journal::last_error) tells how.
    pub fn worker(&mut self) {
        let step = match &mut self.job {
            Job::Idle => return,
            Job::Mount(m) => step_mount(m, self.dev, self.queues, &mut self.spi),
            Job::Append(a) => step_append(a, self.dev, self.queues, &mut self.spi, &self.data),
            Job::Get(g) => step_get(g, self.dev, &mut self.spi, &mut self.data, &mut self.data_len),
            Job::Raw(r) => step_raw(r, self.dev, &mut self.spi, &mut self.data, &mut self.data_len),
        };
        match step {
            Step::Pending => {
                trace!("worker: pending {:?}", self.spi);
            }
            Step::Done => {
                self.job = Job::Idle;
                self.spi.clear();
            }
            Step::Failed(e) => {
                self.job = Job::Idle;
                self.spi.clear();
                self.last_error = Some(e);
            }
        }
    }

    fn stage(&mut self, job: Job) {
        self.last_error = None;
        self.data_len = 0;
        self.spi.clear();
        self.job = job;
    }
}

impl fmt::Debug for Journal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("device", &self.dev.name)
            .field("busy", &self.busy())
            .field("spi_len", &self.spi.len())
            .finish()
    }
}

/// Shared entry gate of every job: keep re-issuing the status read until
/// the flash reports no write in progress. Returns `true` while a poll
/// packet is pending.
fn poll_wip(spi: &mut Packet, dev: &FlashDevice) -> bool {
    if !spi.is_status(dev) || dev.is_wip(spi.status()) {
        spi.read_status(dev);
        return true;
    }
    false
}

struct Mount {
    stage: MountStage,
    queue: u8,
    elem: u16,
    addr: u32,
}

enum MountStage {
    /// Poll the status register, then start (or resume) scanning.
    WaitIdle,
    /// Consume one header read and issue the next.
    Scan,
    /// Write-enable has gone out; erase the oldest sector next.
    Erase,
}

/// Picks the next queue needing a rebuild, starting at `m.queue`, and
/// issues the read of its first element slot. Returns `false` when no
/// queue is left.
fn begin_scan(m: &mut Mount, dev: &FlashDevice, queues: &mut [Queue], spi: &mut Packet) -> bool {
    while let Some(queue) = queues.get_mut(m.queue as usize) {
        if queue.used && !queue.initialised {
            queue.reset_scan();
            m.elem = 0;
            m.addr = queue.elem_addr(dev, 0);
            spi.read_data(dev, m.addr, HEADER_LEN);
            m.stage = MountStage::Scan;
            return true;
        }
        m.queue += 1;
    }
    false
}

fn step_mount(m: &mut Mount, dev: &FlashDevice, queues: &mut [Queue], spi: &mut Packet) -> Step {
    match m.stage {
        MountStage::WaitIdle => {
            if poll_wip(spi, dev) {
                return Step::Pending;
            }
            if begin_scan(m, dev, queues, spi) {
                Step::Pending
            } else {
                Step::Done
            }
        }
        MountStage::Scan => {
            let queue = &mut queues[m.queue as usize];
            match Slot::classify(spi.response(), queue.magic) {
                Slot::Record(header) => {
                    queue.num_entries += 1;
                    if header.id > queue.id_max {
                        queue.id_max = header.id;
                    }
                    if header.id < queue.id_min {
                        queue.id_min = header.id;
                        queue.oldest_addr = m.addr;
                    }
                }
                Slot::Free if !queue.initialised => {
                    queue.write_addr = m.addr;
                    queue.initialised = true;
                }
                // foreign or torn slots, and free slots past the first,
                // are left alone
                _ => {}
            }
            m.elem += 1;
            if m.elem < queue.num_entries_max {
                m.addr = queue.elem_addr(dev, m.elem as u32);
                spi.read_data(dev, m.addr, HEADER_LEN);
                return Step::Pending;
            }
            if queue.initialised {
                m.queue += 1;
                if begin_scan(m, dev, queues, spi) {
                    Step::Pending
                } else {
                    Step::Done
                }
            } else {
                // no free slot in the whole range: the queue has
                // wrapped, free the sector holding the oldest record
                info!(
                    "mount: queue {} full, erasing sector at {:#08x}",
                    m.queue, queue.oldest_addr
                );
                spi.write_enable(dev);
                m.stage = MountStage::Erase;
                Step::Pending
            }
        }
        MountStage::Erase => {
            let queue = &queues[m.queue as usize];
            // with no record to age out (the whole range is foreign or
            // torn data) reclamation starts at the queue's first sector
            let target = if queue.num_entries == 0 {
                dev.sector_base(queue.start_sector)
            } else {
                queue.oldest_addr
            };
            spi.erase_sector(dev, target);
            // wait out the erase, then rescan the same queue
            m.stage = MountStage::WaitIdle;
            Step::Pending
        }
    }
}

struct Append {
    stage: AppendStage,
    queue: u8,
    id: u32,
    len: u16,
    written: u16,
    addr: u32,
}

enum AppendStage {
    WaitIdle,
    Program,
}

fn step_append(
    a: &mut Append,
    dev: &FlashDevice,
    queues: &mut [Queue],
    spi: &mut Packet,
    data: &[u8; DATA_BUF_LEN],
) -> Step {
    match a.stage {
        AppendStage::WaitIdle => {
            if poll_wip(spi, dev) {
                return Step::Pending;
            }
            if a.written < a.len {
                spi.write_enable(dev);
                a.stage = AppendStage::Program;
                Step::Pending
            } else {
                if a.len > 0 {
                    queues[a.queue as usize].id_max = a.id;
                }
                Step::Done
            }
        }
        AppendStage::Program => {
            let page_size = dev.page_size as usize;
            let len = a.len as usize;
            let written = a.written as usize;
            if written == 0 {
                // first page carries the header in front of the payload
                let magic = queues[a.queue as usize].magic;
                let take = len.min(page_size - HEADER_LEN);
                let body = spi.page_program(dev, a.addr, HEADER_LEN + take);
                body[..HEADER_LEN]
                    .copy_from_slice(&Header { magic, id: a.id }.to_bytes());
                body[HEADER_LEN..].copy_from_slice(&data[..take]);
                a.written = take as u16;
            } else {
                let take = (len - written).min(page_size);
                let body = spi.page_program(dev, a.addr, take);
                body.copy_from_slice(&data[written..written + take]);
                a.written += take as u16;
            }
            a.addr += dev.page_size;
            a.stage = AppendStage::WaitIdle;
            Step::Pending
        }
    }
}

struct Get {
    stage: GetStage,
    addr: u32,
    len: u32,
}

enum GetStage {
    WaitIdle,
    Fetch,
}

fn step_get(
    g: &mut Get,
    dev: &FlashDevice,
    spi: &mut Packet,
    data: &mut [u8; DATA_BUF_LEN],
    data_len: &mut u16,
) -> Step {
    match g.stage {
        GetStage::WaitIdle => {
            if poll_wip(spi, dev) {
                return Step::Pending;
            }
            if CMD_OVERHEAD as u32 + g.len > SPI_BUF_LEN as u32 {
                return Step::Failed(Error::SpiBufOverflow);
            }
            spi.read_data(dev, g.addr, g.len as usize);
            g.stage = GetStage::Fetch;
            Step::Pending
        }
        GetStage::Fetch => {
            let payload = &spi.response()[HEADER_LEN..];
            data[..payload.len()].copy_from_slice(payload);
            *data_len = payload.len() as u16;
            Step::Done
        }
    }
}

struct Raw {
    stage: RawStage,
    addr: u32,
    len: u16,
}

enum RawStage {
    WaitIdle,
    Fetch,
}

fn step_raw(
    r: &mut Raw,
    dev: &FlashDevice,
    spi: &mut Packet,
    data: &mut [u8; DATA_BUF_LEN],
    data_len: &mut u16,
) -> Step {
    match r.stage {
        RawStage::WaitIdle => {
            if poll_wip(spi, dev) {
                return Step::Pending;
            }
            if CMD_OVERHEAD + r.len as usize > SPI_BUF_LEN {
                return Step::Failed(Error::SpiBufOverflow);
            }
            spi.read_data(dev, r.addr, r.len as usize);
            r.stage = RawStage::Fetch;
            Step::Pending
        }
        RawStage::Fetch => {
            let n = r.len as usize;
            data[..n].copy_from_slice(&spi.response()[..n]);
            *data_len = n as u16;
            Step::Done
        }
    }
}
