//! DOS mouse driver (INT 33h) for an emulated PC.
//!
//! The driver is resident in guest memory: its state lives in a DOS memory
//! block and INT 33h points at a host callback stub. Host mouse input enters
//! through [`MouseDriver::notify_moved`], [`MouseDriver::notify_button`] and
//! [`MouseDriver::notify_wheel`], is coalesced, and is delivered on IRQ 12 to
//! the event handler the guest registered.
//!
//! The surrounding machine is abstracted by the traits in [`machine`];
//! [`HeadlessMachine`] implements all of them in memory.

pub mod buttons;
pub mod config;
mod cursor;
pub mod driver;
pub mod events;
pub mod headless;
pub mod int33;
pub mod machine;
mod modes;
pub mod position;
pub mod state;
mod win386;

use thiserror::Error;

pub use buttons::MouseButtons;
pub use config::MouseDosConfig;
pub use cursor::{DEFAULT_CURSOR_MASK, DEFAULT_SCREEN_MASK};
pub use driver::{MouseDebugInfo, MouseDriver};
pub use events::MouseEventId;
pub use headless::HeadlessMachine;
pub use machine::{
    CallbackKind, Cpu, DosServices, HostMouse, Machine, Pic, Registers, TimerEvent, VideoAdapterType, VideoBios,
    VideoModeInfo,
};
pub use state::{CursorType, DriverState};

/// Reported by function 24h and in the version string
pub const DRIVER_VERSION_MAJOR: u8 = 0x08;
pub const DRIVER_VERSION_MINOR: u8 = 0x05;

/// Returned by function 4Dh
pub const DRIVER_COPYRIGHT: &str = "Copyright (C) emu_dos_mouse contributors";

#[derive(Error, Debug)]
pub enum MouseError {
    #[error("Out of guest memory: {paragraphs} paragraphs needed for the {purpose}")]
    OutOfGuestMemory { paragraphs: u16, purpose: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}
