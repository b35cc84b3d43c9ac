//! Guest memory access primitives.
//!
//! Everything the emulated machine can see lives behind the [`GuestMemory`]
//! trait. Components that keep state inside guest RAM (resident drivers,
//! BIOS data area consumers) must go through it on every access. Guest code,
//! or a virtual machine monitor running inside the guest, may rewrite or page
//! that memory between two host-side accesses, so caching it in a host-native
//! struct is not allowed.
//!
//! Multi-byte values are little-endian, like on the real hardware.

use serde::{Deserialize, Serialize};

/// Size of a real mode paragraph in bytes
pub const PARAGRAPH_SIZE: u32 = 0x10;

/// Translate a real mode segment:offset pair to a physical (flat) address
#[inline]
pub fn physical(segment: u16, offset: u16) -> u32 {
    ((segment as u32) << 4) + offset as u32
}

/// Number of paragraphs needed to hold `bytes` bytes
pub fn paragraphs_for(bytes: usize) -> u16 {
    let blocks = bytes.div_ceil(PARAGRAPH_SIZE as usize);
    debug_assert!(blocks <= u16::MAX as usize);
    blocks as u16
}

/// Real mode far pointer, stored the way the guest stores it in memory:
/// segment in the high word, offset in the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct RealPtr(pub u32);

impl RealPtr {
    /// The null far pointer (0000:0000)
    pub const NULL: RealPtr = RealPtr(0);

    /// Build a far pointer from a segment and an offset
    pub fn new(segment: u16, offset: u16) -> Self {
        RealPtr(((segment as u32) << 16) | offset as u32)
    }

    pub fn segment(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn offset(self) -> u16 {
        self.0 as u16
    }

    /// Physical address this pointer refers to
    pub fn to_physical(self) -> u32 {
        physical(self.segment(), self.offset())
    }

    /// Same segment, offset moved by `delta` (wrapping inside the segment)
    pub fn add_offset(self, delta: u16) -> Self {
        RealPtr::new(self.segment(), self.offset().wrapping_add(delta))
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for RealPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment(), self.offset())
    }
}

/// Byte-addressable guest memory
///
/// Only the byte accessors are required; wider accesses and the real mode
/// `segment:offset` helpers are provided on top of them.
pub trait GuestMemory {
    /// Read a byte from the given physical address
    fn read_u8(&self, addr: u32) -> u8;

    /// Write a byte to the given physical address
    fn write_u8(&mut self, addr: u32, val: u8);

    fn read_u16(&self, addr: u32) -> u16 {
        u16::from(self.read_u8(addr)) | (u16::from(self.read_u8(addr.wrapping_add(1))) << 8)
    }

    fn write_u16(&mut self, addr: u32, val: u16) {
        self.write_u8(addr, val as u8);
        self.write_u8(addr.wrapping_add(1), (val >> 8) as u8);
    }

    fn read_u32(&self, addr: u32) -> u32 {
        u32::from(self.read_u16(addr)) | (u32::from(self.read_u16(addr.wrapping_add(2))) << 16)
    }

    fn write_u32(&mut self, addr: u32, val: u32) {
        self.write_u16(addr, val as u16);
        self.write_u16(addr.wrapping_add(2), (val >> 16) as u16);
    }

    /// Copy `buf.len()` bytes starting at `addr` into `buf`
    fn block_read(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(addr.wrapping_add(i as u32));
        }
    }

    /// Copy `data` into guest memory starting at `addr`
    fn block_write(&mut self, addr: u32, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), byte);
        }
    }

    fn real_read_u8(&self, segment: u16, offset: u16) -> u8 {
        self.read_u8(physical(segment, offset))
    }

    fn real_read_u16(&self, segment: u16, offset: u16) -> u16 {
        self.read_u16(physical(segment, offset))
    }

    fn real_read_u32(&self, segment: u16, offset: u16) -> u32 {
        self.read_u32(physical(segment, offset))
    }

    fn real_write_u8(&mut self, segment: u16, offset: u16, val: u8) {
        self.write_u8(physical(segment, offset), val);
    }

    fn real_write_u16(&mut self, segment: u16, offset: u16, val: u16) {
        self.write_u16(physical(segment, offset), val);
    }

    fn real_write_u32(&mut self, segment: u16, offset: u16, val: u32) {
        self.write_u32(physical(segment, offset), val);
    }
}

/// Flat 1 MiB conventional + upper memory, plus the 64 KiB high memory area
///
/// Reads outside the array return 0xFF (open bus), writes are dropped.
#[derive(Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl FlatMemory {
    /// 1 MiB plus the HMA
    pub const SIZE: usize = 0x10_0000 + 0x1_0000;

    pub fn new() -> Self {
        Self {
            bytes: vec![0; Self::SIZE],
        }
    }

    /// Raw view of the whole address space
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestMemory for FlatMemory {
    fn read_u8(&self, addr: u32) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn write_u8(&mut self, addr: u32, val: u8) {
        if let Some(byte) = self.bytes.get_mut(addr as usize) {
            *byte = val;
        }
    }

    fn block_read(&self, addr: u32, buf: &mut [u8]) {
        let start = addr as usize;
        match self.bytes.get(start..start + buf.len()) {
            Some(src) => buf.copy_from_slice(src),
            None => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.read_u8(addr.wrapping_add(i as u32));
                }
            }
        }
    }

    fn block_write(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        match self.bytes.get_mut(start..start + data.len()) {
            Some(dst) => dst.copy_from_slice(data),
            None => {
                for (i, &byte) in data.iter().enumerate() {
                    self.write_u8(addr.wrapping_add(i as u32), byte);
                }
            }
        }
    }
}
