//! The resident driver instance and its host-facing entry points.

use std::collections::HashSet;

use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::{GuestMemory, RealPtr, IRQ_PS2_MOUSE};
use serde::Serialize;

use crate::buttons::MouseButtons;
use crate::config::MouseDosConfig;
use crate::cursor::VgaRegisterSave;
use crate::events::{clamp_relative_movement, clamp_to_i8, EventPipeline, MouseEventId, PendingMotion};
use crate::machine::{CallbackKind, HostMouse, Machine};
use crate::state::{DriverState, CursorType};
use crate::{MouseError, DRIVER_COPYRIGHT, DRIVER_VERSION_MAJOR, DRIVER_VERSION_MINOR};

/// Segment of the user callback pointer before any guest sets one
const USER_CALLBACK_MAGIC_SEGMENT: u16 = 0x6362;
/// Sampling rate reported to the host when nobody asked for one
const DEFAULT_RATE_HZ: u16 = 200;
/// Physical address of the BIOS video mode byte
pub(crate) const BIOS_VIDEO_MODE: u32 = 0x449;

/// Sampling rate bookkeeping (functions 1Ch/25h)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub(crate) struct RateSettings {
    /// Guest chose a rate with function 1Ch
    pub rate_is_set: bool,
    pub rate_hz: u16,
    /// Minimum requested by the user configuration
    pub min_rate_hz: u16,
}

/// Where the version and copyright strings live in guest memory
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DriverInfo {
    pub segment: u16,
    pub offset_version: u16,
    pub offset_copyright: u16,
    /// Empty MOUSE.INI path, points at the version string terminator
    pub offset_ini_file: u16,
}

/// Far addresses of the installed host callbacks
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntryPoints {
    pub int33: RealPtr,
    pub mouse_bd: RealPtr,
    pub callback_return: RealPtr,
    pub win386_callout: RealPtr,
}

/// Snapshot of the guest-visible driver state for debuggers and logs
#[derive(Debug, Clone, Serialize)]
pub struct MouseDebugInfo {
    pub segment: u16,
    pub position: (u16, u16),
    pub absolute: (f32, f32),
    pub mickeys: (f32, f32),
    pub min_pos: (i16, i16),
    pub max_pos: (i16, i16),
    pub granularity: (u16, u16),
    pub buttons: MouseButtons,
    pub wheel_counter: i8,
    pub wheel_api: bool,
    pub hidden: u16,
    pub enabled: bool,
    pub cursor_type: CursorType,
    pub bios_screen_mode: u8,
    pub user_callback: String,
    pub user_callback_mask: u16,
    pub pending_moved: bool,
    pub pending_button: bool,
    pub pending_wheel: bool,
    pub pending_motion: PendingMotion,
    pub callback_running: bool,
    pub use_relative: bool,
    pub win386_running: bool,
}

/// DOS mouse driver (INT 33h)
///
/// One instance per emulated machine. All state the guest can observe lives
/// in guest memory behind [`DriverState`]; the fields here are the host side
/// of the event pipeline and the "hardware" mirror.
pub struct MouseDriver {
    pub(crate) state: DriverState,
    pub(crate) events: EventPipeline,
    /// Buttons as last dispatched to the guest
    pub(crate) buttons: MouseButtons,
    /// Wheel counter, read-cleared by the guest
    pub(crate) counter_w: i8,
    /// Captured mouse: ignore the host absolute position
    pub(crate) use_relative: bool,
    /// No host acceleration has been applied to relative motion
    pub(crate) is_input_raw: bool,
    /// Apply motion in the notify path instead of at interrupt time
    pub(crate) immediate: bool,
    pub(crate) rate: RateSettings,
    /// Guest event handler has been entered and has not returned yet
    pub(crate) callback_running: bool,
    pub(crate) info: DriverInfo,
    pub(crate) entry_points: EntryPoints,
    pub(crate) vga_regs: VgaRegisterSave,
    warned_functions: HashSet<u16>,
}

impl MouseDriver {
    /// Install the driver: allocate its guest memory, hook INT 33h and
    /// perform the initial hardware and driver reset.
    pub fn start<M: Machine>(m: &mut M, config: &MouseDosConfig) -> Result<Self, MouseError> {
        let info = prepare_driver_info(m)?;
        let state = DriverState::allocate(m)?;

        let mut driver = Self {
            state,
            events: EventPipeline::new(config.delay_ms),
            buttons: MouseButtons::NONE,
            counter_w: 0,
            use_relative: true,
            is_input_raw: config.raw_input,
            immediate: config.immediate,
            rate: RateSettings::default(),
            callback_running: false,
            info,
            entry_points: EntryPoints::default(),
            vga_regs: VgaRegisterSave::default(),
            warned_functions: HashSet::new(),
        };

        driver.install_entry_points(m)?;

        let state = driver.state;
        state.set_callback_return(m, driver.entry_points.callback_return);
        state.set_user_callback(m, RealPtr::new(USER_CALLBACK_MAGIC_SEGMENT, 0));
        state.set_hidden(m, 1);
        // Not a real mode, forces the first mode change to be noticed
        state.set_bios_screen_mode(m, 0xFF);

        driver.set_sensitivity(m, 50, 50, 50);
        driver.reset_hardware(m);
        driver.reset_driver(m);
        driver.notify_min_rate(m, config.min_rate_hz);

        log(LogCategory::Driver, LogLevel::Info, || {
            format!(
                "DOS mouse driver {}.{:02X} installed, state at {:04X}:0000, INT 33h at {}",
                DRIVER_VERSION_MAJOR, DRIVER_VERSION_MINOR, state.segment(), driver.entry_points.int33
            )
        });
        Ok(driver)
    }

    fn install_entry_points<M: Machine>(&mut self, m: &mut M) -> Result<(), MouseError> {
        let win386_callout = m.install_callback(CallbackKind::Win386Callout, None);

        // Some games require both the segment and the offset of the INT 33h
        // vector to have a nonzero low byte
        let stub_segment = m
            .allocate_paragraphs(1)
            .filter(|&segment| segment != 0)
            .ok_or(MouseError::OutOfGuestMemory {
                paragraphs: 1,
                purpose: "INT 33h stub",
            })?;
        let int33_location = RealPtr::new(stub_segment - 1, 0x10);
        let int33 = m.install_callback(CallbackKind::Int33, Some(int33_location));
        m.write_u32(0x33 * 4, int33.0);

        let mouse_bd = m.install_callback(CallbackKind::MouseBd, Some(int33.add_offset(2)));
        let callback_return = m.install_callback(CallbackKind::CallbackReturn, None);

        self.entry_points = EntryPoints {
            int33,
            mouse_bd,
            callback_return,
            win386_callout,
        };
        Ok(())
    }

    /// Guest memory record backing this driver
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Address of the installed INT 33h handler
    pub fn int33_entry(&self) -> RealPtr {
        self.entry_points.int33
    }

    /// Address of the MouseBd register-block entry, two bytes past INT 33h
    pub fn mouse_bd_entry(&self) -> RealPtr {
        self.entry_points.mouse_bd
    }

    /// Address of the Windows/386 callout
    pub fn win386_callout_entry(&self) -> RealPtr {
        self.entry_points.win386_callout
    }

    /// Route a host callback stub invocation to its handler
    pub fn handle_callback<M: Machine>(&mut self, m: &mut M, kind: CallbackKind) {
        match kind {
            CallbackKind::Int33 => self.int33_handler(m),
            CallbackKind::MouseBd => self.mouse_bd_handler(m),
            CallbackKind::CallbackReturn => self.callback_return(),
            CallbackKind::Win386Callout => self.win386_callout(m),
        }
    }

    /// Guest event handler returned through the trampoline
    pub fn callback_return(&mut self) {
        self.callback_running = false;
    }

    pub fn is_callback_running(&self) -> bool {
        self.callback_running
    }

    // -----------------------------------------------------------------
    // Resets
    // -----------------------------------------------------------------

    /// Reset of the (emulated) mouse hardware, part of function 00h
    pub(crate) fn reset_hardware<M: Machine>(&mut self, m: &mut M) {
        // The wheel API is cleared here, not in the driver reset; software
        // enables it once and then calls function 21h
        self.counter_w = 0;
        self.state.set_wheel_api(m, false);

        m.lower_irq(IRQ_PS2_MOUSE);

        self.rate.rate_is_set = false;
        self.notify_interface_rate(m);
    }

    /// Reset of the driver state, functions 00h and 21h
    pub(crate) fn reset_driver<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;

        self.counter_w = 0;
        self.events.motion.reset();

        self.before_new_video_mode(m);
        self.after_new_video_mode(m, false);

        self.set_mickey_pixel_rate(m, 8, 16);
        self.set_double_speed_threshold(m, 0);

        state.set_enabled(m, true);

        // Integer halving, then converted
        let center_x = (state.max_pos_x(m) as i32 + 1) / 2;
        let center_y = (state.max_pos_y(m) as i32 + 1) / 2;
        state.set_absolute_x(m, center_x as f32);
        state.set_absolute_y(m, center_y as f32);

        state.set_mickey_counter_x(m, 0.0);
        state.set_mickey_counter_y(m, 0.0);

        for idx in 0..crate::state::NUM_BUTTONS {
            state.set_times_pressed(m, idx, 0);
            state.set_times_released(m, idx, 0);
            state.set_last_pressed_x(m, idx, 0);
            state.set_last_pressed_y(m, idx, 0);
            state.set_last_released_x(m, idx, 0);
            state.set_last_released_y(m, idx, 0);
        }
        state.set_last_wheel_moved_x(m, 0);
        state.set_last_wheel_moved_y(m, 0);

        state.set_user_callback_mask(m, 0);

        self.callback_running = false;
        self.events.clear_pending_events(m);

        log(LogCategory::Driver, LogLevel::Debug, || {
            format!(
                "driver reset, range {}..{} x {}..{}",
                state.min_pos_x(m),
                state.max_pos_x(m),
                state.min_pos_y(m),
                state.max_pos_y(m)
            )
        });
    }

    // -----------------------------------------------------------------
    // Sampling rate
    // -----------------------------------------------------------------

    pub(crate) fn notify_interface_rate<H: HostMouse + ?Sized>(&self, host: &mut H) {
        let rate_hz = if self.rate.rate_is_set {
            // The host interface still enforces the user minimum
            self.rate.rate_hz
        } else if self.rate.min_rate_hz != 0 {
            self.rate.min_rate_hz
        } else {
            DEFAULT_RATE_HZ
        };
        host.notify_interface_rate(rate_hz);
    }

    /// Function 1Ch, rate id 0 leaves the rate untouched
    pub(crate) fn set_interrupt_rate<H: HostMouse + ?Sized>(&mut self, host: &mut H, rate_id: u16) {
        let rate_hz = match rate_id {
            0 => return,
            1 => 30,
            2 => 50,
            3 => 100,
            _ => 200,
        };
        self.rate.rate_is_set = true;
        self.rate.rate_hz = rate_hz;
        self.notify_interface_rate(host);
    }

    /// Rate id (as used by function 1Ch) closest to the effective rate
    pub(crate) fn interrupt_rate_id<H: HostMouse + ?Sized>(&self, host: &H) -> u8 {
        let rate_hz = if self.rate.rate_is_set {
            self.rate.rate_hz
        } else {
            host.interface_rate()
        };

        match rate_hz {
            0 => 0,
            hz if hz < (30 + 50) / 2 => 1,
            hz if hz < (50 + 100) / 2 => 2,
            hz if hz < (100 + 200) / 2 => 3,
            _ => 4,
        }
    }

    /// User configured minimum sampling rate changed
    pub fn notify_min_rate<H: HostMouse + ?Sized>(&mut self, host: &mut H, rate_hz: u16) {
        self.rate.min_rate_hz = rate_hz;

        // A rate chosen by the guest stays in effect
        if !self.rate.rate_is_set {
            self.notify_interface_rate(host);
        }
    }

    // -----------------------------------------------------------------
    // Host notifications
    // -----------------------------------------------------------------

    /// Host mouse moved. `x_rel`/`y_rel` are relative host pixels,
    /// `x_abs`/`y_abs` the absolute host cursor position.
    pub fn notify_moved<M: Machine>(&mut self, m: &mut M, x_rel: f32, y_rel: f32, x_abs: u32, y_abs: u32) {
        let motion = &mut self.events.motion;

        // In seamless mode only a change of the absolute position counts,
        // relative deltas there are unreliable
        let mut event_needed = self.use_relative || motion.x_abs != x_abs || motion.y_abs != y_abs;

        motion.x_rel = clamp_relative_movement(motion.x_rel + x_rel);
        motion.y_rel = clamp_relative_movement(motion.y_rel + y_rel);
        motion.x_abs = x_abs;
        motion.y_abs = y_abs;

        // Never skip the pipeline just because no callback is registered,
        // some games re-register their handler constantly
        if event_needed && self.immediate {
            event_needed = self.move_cursor(m) != 0;
        }

        if event_needed {
            self.events.pending_moved = true;
            self.events.maybe_trigger(m);
        }
    }

    /// Host button state changed; edges are resolved at interrupt time
    pub fn notify_button<M: Machine>(&mut self, m: &mut M, buttons: MouseButtons) {
        self.events.pending_button = true;
        self.events.pending_buttons = buttons;
        self.events.maybe_trigger(m);
    }

    /// Host wheel scrolled, ignored until the guest enables the WheelAPI
    pub fn notify_wheel<M: Machine>(&mut self, m: &mut M, w_rel: i16) {
        if !self.state.wheel_api(m) {
            return;
        }

        let motion = &mut self.events.motion;
        motion.w_rel = clamp_to_i8(motion.w_rel as i32 + w_rel as i32) as i16;

        let mut event_needed = motion.w_rel != 0;
        if event_needed && self.immediate {
            event_needed = self.move_wheel(m) != 0;
        }

        if event_needed {
            self.events.pending_wheel = true;
            self.events.maybe_trigger(m);
        }
    }

    /// Host switched between captured (`use_relative`) and seamless mode
    pub fn notify_input_type(&mut self, use_relative: bool, is_input_raw: bool) {
        self.use_relative = use_relative;
        self.is_input_raw = is_input_raw;
    }

    /// Minimum delay between two mouse interrupts
    pub fn set_delay(&mut self, delay_ms: u8) {
        self.events.set_delay_ms(delay_ms);
    }

    /// The delay timer scheduled through [`crate::Pic::add_timer_event`] fired
    pub fn delay_expired<M: Machine>(&mut self, m: &mut M) {
        self.events.delay_expired(m);
    }

    pub fn has_pending_event(&self) -> bool {
        self.events.has_pending_event()
    }

    // -----------------------------------------------------------------
    // IRQ 12 path
    // -----------------------------------------------------------------

    /// Consume pending events and return the event mask for the guest
    /// handler, or 0 if nothing the handler asked for happened
    pub fn do_interrupt<M: Machine>(&mut self, m: &mut M) -> u8 {
        if !self.events.has_pending_event() {
            return 0;
        }

        let mut mask = 0u8;

        if self.events.pending_moved {
            mask = self.update_moved(m);

            // The cursor is redrawn here, in the IRQ handler, and never
            // straight from host input
            if mask != 0 {
                self.draw_cursor(m);
            }
            self.events.pending_moved = false;
        }

        if self.events.pending_button {
            mask |= self.update_buttons(m, self.events.pending_buttons);
            self.events.pending_button = false;
        }

        if self.events.pending_wheel {
            mask |= self.update_wheel(m);
            self.events.pending_wheel = false;
        }

        if self.state.user_callback_mask(m) & mask as u16 == 0 {
            return 0;
        }
        mask
    }

    /// Set up the registers and stack so that a far return enters the guest
    /// event handler, which in turn returns into the driver's trampoline
    pub fn do_callback<M: Machine>(&mut self, m: &mut M, mask: u8) {
        self.callback_running = true;

        let mouse_moved = mask & MouseEventId::MouseHasMoved.bit() != 0;
        let wheel_moved = mask & MouseEventId::WheelHasMoved.bit() != 0;

        let (pos_x, pos_y) = (self.pos_x(m), self.pos_y(m));
        let mickeys_x = mickey_counter_to_reg16(self.state.mickey_counter_x(m));
        let mickeys_y = mickey_counter_to_reg16(self.state.mickey_counter_y(m));
        let wheel = if wheel_moved { self.reset_wheel_8bit(m) } else { 0 };
        let buttons = self.buttons.to_byte();

        let regs = m.regs_mut();
        // VBADOS extension: AH=1 flags an absolute position update
        regs.set_ah(u8::from(!self.use_relative && mouse_moved));
        regs.set_al(mask);
        regs.set_bl(buttons);
        regs.set_bh(wheel);
        regs.cx = pos_x;
        regs.dx = pos_y;
        regs.si = mickeys_x;
        regs.di = mickeys_y;

        let callback_return = self.state.callback_return(m);
        let user_callback = self.state.user_callback(m);
        m.push16(callback_return.segment());
        m.push16(callback_return.offset());
        m.push16(user_callback.segment());
        m.push16(user_callback.offset());

        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!("user callback {} mask {:02X}", user_callback, mask)
        });
    }

    /// End of the IRQ 12 handler
    pub fn finalize_interrupt<M: Machine>(&mut self, m: &mut M) {
        // The interrupt may have been taken over by a PS/2 BIOS handler, or
        // the guest handler has not finished yet
        if self.events.has_pending_event() {
            self.events.maybe_start_delay_timer(m, 1);
        }
    }

    // -----------------------------------------------------------------
    // Helpers shared by the function handlers
    // -----------------------------------------------------------------

    pub(crate) fn reset_wheel_8bit<M: GuestMemory + ?Sized>(&mut self, m: &M) -> u8 {
        if !self.state.wheel_api(m) {
            return 0;
        }
        std::mem::take(&mut self.counter_w) as u8
    }

    pub(crate) fn reset_wheel_16bit<M: GuestMemory + ?Sized>(&mut self, m: &M) -> u16 {
        if !self.state.wheel_api(m) {
            return 0;
        }
        std::mem::take(&mut self.counter_w) as i16 as u16
    }

    /// Log a warning the first time an unimplemented function is used
    pub(crate) fn warn_unimplemented(&mut self, function: u16, what: &str) {
        if self.warned_functions.insert(function) {
            log(LogCategory::Stubs, LogLevel::Warn, || {
                format!("INT 33h function {:04X}h: {} not implemented", function, what)
            });
        }
    }

    pub fn debug_info<M: GuestMemory + ?Sized>(&self, m: &M) -> MouseDebugInfo {
        let state = self.state;
        MouseDebugInfo {
            segment: state.segment(),
            position: (self.pos_x(m), self.pos_y(m)),
            absolute: (state.absolute_x(m), state.absolute_y(m)),
            mickeys: (state.mickey_counter_x(m), state.mickey_counter_y(m)),
            min_pos: (state.min_pos_x(m), state.min_pos_y(m)),
            max_pos: (state.max_pos_x(m), state.max_pos_y(m)),
            granularity: (state.granularity_x(m), state.granularity_y(m)),
            buttons: self.buttons,
            wheel_counter: self.counter_w,
            wheel_api: state.wheel_api(m),
            hidden: state.hidden(m),
            enabled: state.enabled(m),
            cursor_type: state.cursor_type(m),
            bios_screen_mode: state.bios_screen_mode(m),
            user_callback: state.user_callback(m).to_string(),
            user_callback_mask: state.user_callback_mask(m),
            pending_moved: self.events.pending_moved,
            pending_button: self.events.pending_button,
            pending_wheel: self.events.pending_wheel,
            pending_motion: self.events.motion,
            callback_running: self.callback_running,
            use_relative: self.use_relative,
            win386_running: state.win386_running(m),
        }
    }
}

/// Rounded mickey counter as the guest sees it
pub(crate) fn mickey_counter_to_reg16(counter: f32) -> u16 {
    counter.round() as i32 as u16
}

/// "version 8.05" for driver version 8.05
pub fn version_string(major: u8, minor: u8) -> String {
    let mut version = String::from("version ");
    if major >> 4 != 0 {
        version.push_str(&(major >> 4).to_string());
    }
    version.push_str(&format!("{}.{}{}", major & 0x0F, minor >> 4, minor & 0x0F));
    version
}

/// Write the version and copyright strings into a block of their own
fn prepare_driver_info<M: Machine>(m: &mut M) -> Result<DriverInfo, MouseError> {
    let version = version_string(DRIVER_VERSION_MAJOR, DRIVER_VERSION_MINOR);

    let mut block = Vec::with_capacity(version.len() + DRIVER_COPYRIGHT.len() + 2);
    block.extend_from_slice(version.as_bytes());
    block.push(0);
    block.extend_from_slice(DRIVER_COPYRIGHT.as_bytes());
    block.push(0);

    let paragraphs = emu_core::memory::paragraphs_for(block.len());
    block.resize(paragraphs as usize * emu_core::memory::PARAGRAPH_SIZE as usize, 0);

    let segment = m
        .allocate_paragraphs(paragraphs)
        .filter(|&segment| segment != 0)
        .ok_or(MouseError::OutOfGuestMemory {
            paragraphs,
            purpose: "driver information",
        })?;
    m.block_write(emu_core::memory::physical(segment, 0), &block);

    Ok(DriverInfo {
        segment,
        offset_version: 0,
        offset_copyright: version.len() as u16 + 1,
        offset_ini_file: version.len() as u16,
    })
}
