//! Core emulator primitives shared by the device and driver crates.

pub mod logging;
pub mod memory;

pub use memory::{FlatMemory, GuestMemory, RealPtr};

/// Interrupt line driven by the PS/2 auxiliary (mouse) port
pub const IRQ_PS2_MOUSE: u8 = 12;
