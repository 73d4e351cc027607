//! Descriptors for the supported 25-series SPI NOR flash parts.

use bitflags::bitflags;

bitflags! {
    /// Status register bits.
    pub struct Status: u8 {
        /// Erase or write in progress.
        const WIP = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 protection region bits.
        const PROT = 0b00011100;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

/// Geometry and instruction set of one supported flash part.
///
/// Entries are immutable; a part is selected by its index in [`DEVICES`]
/// when the journal is created. Addresses are transferred as 24 bits,
/// big-endian, after the opcode.
#[derive(Debug, PartialEq, Eq)]
pub struct FlashDevice {
    /// Part name, for diagnostics.
    pub name: &'static str,
    /// Total capacity in bytes.
    pub total_size: u32,
    /// Smallest erasable unit, in bytes.
    pub sector_size: u32,
    /// Smallest programmable unit, in bytes.
    pub page_size: u32,
    /// Pages per sector; `sector_size == pages_per_sector * page_size`.
    pub pages_per_sector: u32,
    /// Read-data instruction.
    pub opcode_read: u8,
    /// Read-status-register instruction.
    pub opcode_read_status: u8,
    /// Write-enable instruction.
    pub opcode_write_enable: u8,
    /// Sector-erase instruction.
    pub opcode_erase_sector: u8,
    /// Page-program instruction.
    pub opcode_page_program: u8,
    /// Mask applied to the status byte; any set bit means a program or
    /// erase is still in progress.
    pub wip_mask: u8,
}

impl FlashDevice {
    /// Byte address of the first page of `sector`.
    pub fn sector_base(&self, sector: u32) -> u32 {
        sector * self.sector_size
    }

    /// Number of sectors on the part.
    pub fn sector_count(&self) -> u32 {
        self.total_size / self.sector_size
    }

    /// Whether `status` reports a write in progress.
    pub fn is_wip(&self, status: u8) -> bool {
        status & self.wip_mask != 0
    }
}

/// The shared 25-series instruction set; the parts below differ only in
/// capacity.
const fn series25(name: &'static str, total_size: u32) -> FlashDevice {
    FlashDevice {
        name,
        total_size,
        sector_size: 4096,
        page_size: 256,
        pages_per_sector: 16,
        opcode_read: 0x03,
        opcode_read_status: 0x05,
        opcode_write_enable: 0x06,
        opcode_erase_sector: 0x20,
        opcode_page_program: 0x02,
        wip_mask: 0x01, // Status::WIP
    }
}

/// Supported flash parts, selected by index in
/// [`Journal::new`](crate::Journal::new).
pub static DEVICES: &[FlashDevice] = &[
    series25("W25Q32", 4 * 1024 * 1024),
    series25("W25Q128", 16 * 1024 * 1024),
    series25("MX25R6435F", 8 * 1024 * 1024),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_geometry_is_consistent() {
        for dev in DEVICES {
            assert_eq!(dev.sector_size, dev.pages_per_sector * dev.page_size);
            assert_eq!(dev.total_size % dev.sector_size, 0);
            assert_eq!(dev.wip_mask, Status::WIP.bits());
        }
    }

    #[test]
    fn address_helpers() {
        let dev = &DEVICES[0];
        assert_eq!(dev.sector_base(0), 0);
        assert_eq!(dev.sector_base(3), 3 * 4096);
        assert_eq!(dev.sector_count(), 1024);
        assert!(dev.is_wip(0x01));
        assert!(dev.is_wip(0x03));
        assert!(!dev.is_wip(0x02));
    }
}
