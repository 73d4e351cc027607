//! An in-memory NOR flash model for exercising the worker without
//! hardware.
//!
//! `transact` plays the role of the host's full-duplex SPI transfer:
//! it interprets the packet the way the chip would and overwrites it
//! with the response. Programming can only clear bits and erasing a
//! sector restores `0xFF`, so ordering bugs in the driver show up as
//! corrupted data rather than silently passing.

use crate::device::FlashDevice;
use crate::journal::Journal;
use crate::record::ERASED;

pub(crate) struct SimFlash {
    dev: &'static FlashDevice,
    pub(crate) mem: Vec<u8>,
    write_enabled: bool,
    busy_polls: u8,
}

impl SimFlash {
    pub(crate) fn new(dev: &'static FlashDevice) -> SimFlash {
        SimFlash {
            dev,
            mem: vec![ERASED; dev.total_size as usize],
            write_enabled: false,
            busy_polls: 0,
        }
    }

    /// Executes one chip-select-framed transfer in place.
    pub(crate) fn transact(&mut self, buf: &mut [u8]) {
        let op = buf[0];
        if op == self.dev.opcode_read_status {
            buf[1] = if self.busy_polls > 0 {
                self.busy_polls -= 1;
                self.dev.wip_mask
            } else {
                0x00
            };
        } else if op == self.dev.opcode_write_enable {
            self.write_enabled = true;
        } else if op == self.dev.opcode_read {
            let addr = addr24(buf);
            for i in 4..buf.len() {
                buf[i] = self.mem[addr + i - 4];
            }
        } else if op == self.dev.opcode_page_program {
            assert!(self.write_enabled, "page program without write enable");
            let addr = addr24(buf);
            let page = self.dev.page_size as usize;
            assert!(
                addr % page + (buf.len() - 4) <= page,
                "page program crosses a page boundary"
            );
            for (i, &byte) in buf[4..].iter().enumerate() {
                self.mem[addr + i] &= byte;
            }
            self.write_enabled = false;
            self.busy_polls = 1;
        } else if op == self.dev.opcode_erase_sector {
            assert!(self.write_enabled, "sector erase without write enable");
            let sector = self.dev.sector_size as usize;
            let base = addr24(buf) / sector * sector;
            for byte in &mut self.mem[base..base + sector] {
                *byte = ERASED;
            }
            self.write_enabled = false;
            self.busy_polls = 1;
        } else {
            panic!("unknown opcode {:#04x}", op);
        }
    }
}

fn addr24(buf: &[u8]) -> usize {
    (buf[1] as usize) << 16 | (buf[2] as usize) << 8 | buf[3] as usize
}

/// Pumps worker calls and SPI transfers until the staged job finishes,
/// returning the number of worker calls it took.
pub(crate) fn pump(journal: &mut Journal<'_>, flash: &mut SimFlash) -> u32 {
    let mut calls = 0;
    while journal.busy() {
        journal.worker();
        calls += 1;
        assert!(calls < 1_000_000, "worker made no progress");
        let packet = journal.packet_mut();
        if !packet.is_empty() {
            flash.transact(packet);
        }
    }
    calls
}
