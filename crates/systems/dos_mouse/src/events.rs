//! Host event coalescing and the inter-interrupt delay.
//!
//! Host notifications only accumulate into [`PendingMotion`] and raise one of
//! three pending flags. The IRQ is asserted when the delay timer is idle;
//! while the timer runs, new events wait for it to expire instead of being
//! dropped.

use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::IRQ_PS2_MOUSE;
use serde::Serialize;

use crate::buttons::MouseButtons;
use crate::machine::{Pic, TimerEvent};

/// Default minimum delay between two mouse interrupts
pub const DEFAULT_DELAY_MS: u8 = 5;

/// Bits of the event mask passed to the user callback in AX.
/// This layout is guest visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MouseEventId {
    MouseHasMoved = 1 << 0,
    PressedLeft = 1 << 1,
    ReleasedLeft = 1 << 2,
    PressedRight = 1 << 3,
    ReleasedRight = 1 << 4,
    PressedMiddle = 1 << 5,
    ReleasedMiddle = 1 << 6,
    WheelHasMoved = 1 << 7,
}

impl MouseEventId {
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Press and release bits for button `idx`
    pub(crate) fn button_edges(idx: usize) -> (MouseEventId, MouseEventId) {
        match idx {
            0 => (MouseEventId::PressedLeft, MouseEventId::ReleasedLeft),
            1 => (MouseEventId::PressedRight, MouseEventId::ReleasedRight),
            _ => (MouseEventId::PressedMiddle, MouseEventId::ReleasedMiddle),
        }
    }
}

/// Largest relative movement accepted from the host in one step
pub const MAX_RELATIVE_MOVEMENT: f32 = 2048.0;

/// Clamp a relative movement to a range the position model can digest
pub fn clamp_relative_movement(rel: f32) -> f32 {
    rel.clamp(-MAX_RELATIVE_MOVEMENT, MAX_RELATIVE_MOVEMENT)
}

pub(crate) fn clamp_to_i8(value: i32) -> i8 {
    value.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

/// Motion received from the host but not yet applied to the driver state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PendingMotion {
    pub x_rel: f32,
    pub y_rel: f32,
    pub x_abs: u32,
    pub y_abs: u32,
    /// Always within the `i8` range
    pub w_rel: i16,
}

impl PendingMotion {
    /// Drop accumulated relative motion; the absolute position is kept
    pub fn reset(&mut self) {
        self.x_rel = 0.0;
        self.y_rel = 0.0;
        self.w_rel = 0;
    }
}

/// Pending flags and delay timer state
#[derive(Debug, Clone)]
pub struct EventPipeline {
    delay_ms: u8,
    delay_running: bool,
    delay_finished: bool,

    pub(crate) pending_moved: bool,
    pub(crate) pending_button: bool,
    pub(crate) pending_wheel: bool,
    /// Latest button state reported by the host
    pub(crate) pending_buttons: MouseButtons,
    pub(crate) motion: PendingMotion,
}

impl Default for EventPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_MS)
    }
}

impl EventPipeline {
    pub fn new(delay_ms: u8) -> Self {
        Self {
            delay_ms,
            delay_running: false,
            delay_finished: true,
            pending_moved: false,
            pending_button: false,
            pending_wheel: false,
            pending_buttons: MouseButtons::NONE,
            motion: PendingMotion::default(),
        }
    }

    pub fn delay_ms(&self) -> u8 {
        self.delay_ms
    }

    pub fn set_delay_ms(&mut self, delay_ms: u8) {
        self.delay_ms = delay_ms;
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending_moved || self.pending_button || self.pending_wheel
    }

    pub fn is_delay_running(&self) -> bool {
        self.delay_running
    }

    /// The delay timer fired
    pub fn delay_expired<P: Pic + ?Sized>(&mut self, pic: &mut P) {
        self.delay_running = false;
        self.delay_finished = true;
        self.maybe_trigger(pic);
    }

    /// Start the delay timer unless it is already running
    pub fn maybe_start_delay_timer<P: Pic + ?Sized>(&mut self, pic: &mut P, delay_ms: u8) {
        if self.delay_running {
            return;
        }
        pic.add_timer_event(TimerEvent::MouseDelay, delay_ms as u32);
        self.delay_running = true;
        self.delay_finished = false;
    }

    /// Assert the IRQ if an event is pending and the previous delay is over
    pub fn maybe_trigger<P: Pic + ?Sized>(&mut self, pic: &mut P) {
        if !self.delay_finished {
            self.maybe_start_delay_timer(pic, self.delay_ms);
            return;
        }
        if !self.has_pending_event() {
            return;
        }

        self.maybe_start_delay_timer(pic, self.delay_ms);
        log(LogCategory::Events, LogLevel::Trace, || {
            format!(
                "IRQ {} (moved={}, button={}, wheel={})",
                IRQ_PS2_MOUSE, self.pending_moved, self.pending_button, self.pending_wheel
            )
        });
        pic.activate_irq(IRQ_PS2_MOUSE);
    }

    /// Forget pending motion/wheel events and restart the delay.
    /// A button event stays pending while any button is held, so the guest
    /// sees the current button state after a reset or mode change.
    pub fn clear_pending_events<P: Pic + ?Sized>(&mut self, pic: &mut P) {
        if self.delay_running {
            pic.remove_timer_events(TimerEvent::MouseDelay);
            self.delay_running = false;
        }

        self.pending_moved = false;
        self.pending_button = self.pending_buttons.any_pressed();
        self.pending_wheel = false;
        self.maybe_start_delay_timer(pic, self.delay_ms);
    }
}
