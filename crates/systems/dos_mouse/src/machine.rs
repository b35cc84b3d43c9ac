//! Interfaces the driver needs from the rest of the emulated PC.
//!
//! The driver never owns the CPU, the interrupt controller or the video
//! hardware. Every entry point receives the machine as a `&mut M` where
//! `M: Machine`, and all side effects go through these traits.

use emu_core::{GuestMemory, RealPtr};
use serde::{Deserialize, Serialize};

/// General purpose, index and segment registers of the emulated CPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub si: u16,
    pub di: u16,
    pub bp: u16,
    pub sp: u16,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub ss: u16,
    pub ip: u16,
    pub flags: u16,
}

macro_rules! byte_registers {
    ($($word:ident => $lo:ident, $set_lo:ident, $hi:ident, $set_hi:ident;)*) => {
        impl Registers {
            $(
                pub fn $lo(&self) -> u8 {
                    self.$word as u8
                }

                pub fn $hi(&self) -> u8 {
                    (self.$word >> 8) as u8
                }

                pub fn $set_lo(&mut self, val: u8) {
                    self.$word = (self.$word & 0xFF00) | val as u16;
                }

                pub fn $set_hi(&mut self, val: u8) {
                    self.$word = (self.$word & 0x00FF) | ((val as u16) << 8);
                }
            )*
        }
    };
}

byte_registers! {
    ax => al, set_al, ah, set_ah;
    bx => bl, set_bl, bh, set_bh;
    cx => cl, set_cl, ch, set_ch;
    dx => dl, set_dl, dh, set_dh;
}

/// Register file access
pub trait Cpu {
    fn regs(&self) -> &Registers;
    fn regs_mut(&mut self) -> &mut Registers;
}

/// One-shot timer events the driver schedules on the interrupt controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Minimum delay between two mouse interrupts has elapsed
    MouseDelay,
}

/// Programmable interrupt controller and emulated-time event queue
pub trait Pic {
    /// Assert an IRQ line
    fn activate_irq(&mut self, irq: u8);
    /// Lower (deassert) an IRQ line
    fn lower_irq(&mut self, irq: u8);
    /// Schedule `event` to fire once after `delay_ms` of emulated time.
    /// The machine reports the expiry back through
    /// [`crate::MouseDriver::delay_expired`].
    fn add_timer_event(&mut self, event: TimerEvent, delay_ms: u32);
    /// Cancel every scheduled instance of `event`
    fn remove_timer_events(&mut self, event: TimerEvent);
}

/// Installed display adapter class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoAdapterType {
    /// No video adapter
    None,
    /// Monochrome Display Adapter (MDA)
    Mda,
    /// Color Graphics Adapter (CGA)
    Cga,
    /// Enhanced Graphics Adapter (EGA)
    Ega,
    /// Video Graphics Array (VGA) or any SVGA card
    Vga,
}

/// Descriptor of the active video mode, as tracked by the video BIOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoModeInfo {
    pub is_text: bool,
    /// Screen width in pixels (graphics) or character-cell pixels (text)
    pub swidth: u16,
    /// Screen height in pixels
    pub sheight: u16,
}

/// Video BIOS services (INT 10h internals) and video I/O ports
pub trait VideoBios {
    fn video_adapter(&self) -> VideoAdapterType;
    fn current_mode(&self) -> VideoModeInfo;
    fn text_columns(&self) -> u16;
    fn text_rows(&self) -> u16;

    fn get_pixel(&mut self, x: u16, y: u16, page: u8) -> u8;
    fn put_pixel(&mut self, x: u16, y: u16, page: u8, color: u8);

    /// Character in the low byte, attribute in the high byte
    fn read_char_attr(&mut self, col: u16, row: u16, page: u8) -> u16;
    fn write_char(&mut self, col: u16, row: u16, page: u8, chr: u8, attr: u8);

    /// Program the hardware text cursor scan lines
    fn set_cursor_shape(&mut self, first: u8, last: u8);

    fn io_read(&mut self, port: u16) -> u8;
    fn io_write(&mut self, port: u16, val: u8);
}

/// Host-implemented entry points the driver installs into guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// INT 33h handler
    Int33,
    /// Register-block indirection entry point next to the INT 33h stub
    MouseBd,
    /// Far-return trampoline the guest event handler returns into
    CallbackReturn,
    /// Windows/386 mouse callout
    Win386Callout,
}

/// DOS kernel services used at install time
pub trait DosServices {
    /// Allocate `paragraphs` 16-byte blocks of conventional memory,
    /// returning the segment, or `None` when memory is exhausted
    fn allocate_paragraphs(&mut self, paragraphs: u16) -> Option<u16>;

    /// Install a host callback stub, at `location` if given, otherwise in
    /// the machine's own callback area. Returns the stub's far address.
    fn install_callback(&mut self, kind: CallbackKind, location: Option<RealPtr>) -> RealPtr;
}

/// Host side of the mouse, shared with the other guest mouse interfaces
pub trait HostMouse {
    /// Resolution the host absolute coordinates are relative to
    fn host_resolution(&self) -> (u32, u32);
    /// Inform the host mouse interface of the sampling rate the guest expects
    fn notify_interface_rate(&mut self, rate_hz: u16);
    /// Effective sampling rate of the host mouse interface
    fn interface_rate(&self) -> u16;
}

/// Everything the driver needs, in one bound
pub trait Machine: GuestMemory + Cpu + Pic + VideoBios + DosServices + HostMouse {
    /// Push a word onto the guest stack (SS:SP)
    fn push16(&mut self, val: u16) {
        let regs = self.regs_mut();
        regs.sp = regs.sp.wrapping_sub(2);
        let (ss, sp) = (regs.ss, regs.sp);
        self.real_write_u16(ss, sp, val);
    }
}

impl<T> Machine for T where T: GuestMemory + Cpu + Pic + VideoBios + DosServices + HostMouse {}
