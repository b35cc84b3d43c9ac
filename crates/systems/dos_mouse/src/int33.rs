//! INT 33h function dispatch.
//!
//! Each supported function is a method taking the driver and the machine;
//! [`lookup`] maps AX to it. Functions the driver knows about but does not
//! implement log a warning once, and a few vendor extensions are accepted
//! silently.

use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::memory::physical;
use emu_core::RealPtr;

use crate::driver::{mickey_counter_to_reg16, MouseDriver};
use crate::machine::Machine;
use crate::state::{CursorType, CURSOR_SIZE, INSTANCE_SIZE, NUM_BUTTONS};
use crate::{DRIVER_VERSION_MAJOR, DRIVER_VERSION_MINOR};

/// INT 33h function handler
pub type Handler<M> = fn(&mut MouseDriver, &mut M);

/// BX value of functions 05h/06h selecting the wheel instead of a button
const WHEEL_QUERY_INDEX: u16 = 0xFFFF;
/// Mouse type reported by functions 24h and 2Ah
const MOUSE_TYPE_PS2: u8 = 0x04;

/// Handler for INT 33h function `function`, `None` if it is not known
pub fn lookup<M: Machine>(function: u16) -> Option<Handler<M>> {
    let handler: Handler<M> = match function {
        0x00 => MouseDriver::reset_and_status,
        0x01 => MouseDriver::show_cursor,
        0x02 => MouseDriver::hide_cursor,
        0x03 => MouseDriver::get_position_and_buttons,
        0x04 => MouseDriver::set_cursor_position,
        0x05 => MouseDriver::get_button_press_data,
        0x06 => MouseDriver::get_button_release_data,
        0x07 => MouseDriver::set_horizontal_range,
        0x08 => MouseDriver::set_vertical_range,
        0x09 => MouseDriver::define_graphics_cursor,
        0x0A => MouseDriver::define_text_cursor,
        0x0B => MouseDriver::read_motion_counters,
        0x0C => MouseDriver::set_user_callback,
        0x0F => MouseDriver::set_mickey_ratio,
        0x10 => MouseDriver::set_update_region,
        0x11 => MouseDriver::get_wheel_capabilities,
        0x13 => MouseDriver::set_speed_threshold,
        0x14 => MouseDriver::exchange_user_callback,
        0x15 => MouseDriver::get_state_size,
        0x16 => MouseDriver::save_state,
        0x17 => MouseDriver::load_state,
        0x1A => MouseDriver::set_sensitivity_values,
        0x1B => MouseDriver::get_sensitivity_values,
        0x1C => MouseDriver::set_rate,
        0x1D => MouseDriver::set_display_page,
        0x1E => MouseDriver::get_display_page,
        0x1F => MouseDriver::disable_driver,
        0x20 => MouseDriver::enable_driver,
        0x21 => MouseDriver::software_reset,
        0x22 => MouseDriver::set_language,
        0x23 => MouseDriver::get_language,
        0x24 => MouseDriver::get_version_and_type,
        0x25 => MouseDriver::get_general_info,
        0x26 => MouseDriver::get_max_coordinates,
        0x27 => MouseDriver::get_text_masks_and_counters,
        0x2A => MouseDriver::get_hot_spot,
        0x31 => MouseDriver::get_current_range,
        0x32 => MouseDriver::get_advanced_functions,
        0x34 => MouseDriver::get_ini_file,
        0x4D => MouseDriver::get_copyright,
        0x6D => MouseDriver::get_version_string,
        0x0D | 0x12 | 0x18 | 0x19 | 0x28 | 0x29 | 0x2B..=0x30 | 0x33 | 0x35 => MouseDriver::not_implemented,
        // Light pen off: accepted, there is nothing to turn off
        0x0E => MouseDriver::ignored,
        // Third party extensions, other software must not care
        0x70 | 0x72 | 0x73 | 0x53C1 => MouseDriver::ignored,
        _ => return None,
    };
    Some(handler)
}

fn unimplemented_description(function: u16) -> &'static str {
    match function {
        0x0D => "light pen emulation",
        0x12 => "large graphics cursor block",
        0x18 | 0x19 => "alternate mouse user handler",
        0x28 => "set video mode",
        0x29 => "enumerate video modes",
        0x2B..=0x2E | 0x33 => "custom acceleration profiles",
        0x2F => "hardware reset",
        0x30 => "BallPoint information",
        0x35 => "LCD screen large pointer support",
        _ => "driver function",
    }
}

fn range_from_regs(a: u16, b: u16) -> (i16, i16) {
    let (a, b) = (a as i16, b as i16);
    (a.min(b), a.max(b))
}

impl MouseDriver {
    /// INT 33h entry point; function number in AX
    pub(crate) fn int33_handler<M: Machine>(&mut self, m: &mut M) {
        let function = m.regs().ax;
        log(LogCategory::Interrupts, LogLevel::Trace, || format!("INT 33h function {:04X}h", function));

        match lookup::<M>(function) {
            Some(handler) => handler(self, m),
            None => self.warn_unimplemented(function, unimplemented_description(function)),
        }
    }

    /// Register values passed indirectly: the caller pushed near pointers
    /// (in DS) to AX, BX, CX and DX before calling the stub
    pub(crate) fn mouse_bd_handler<M: Machine>(&mut self, m: &mut M) {
        let regs = *m.regs();
        let (ss, sp, ds) = (regs.ss, regs.sp, regs.ds);
        let ax_ptr = m.real_read_u16(ss, sp.wrapping_add(0x0A));
        let bx_ptr = m.real_read_u16(ss, sp.wrapping_add(0x08));
        let cx_ptr = m.real_read_u16(ss, sp.wrapping_add(0x06));
        let dx_ptr = m.real_read_u16(ss, sp.wrapping_add(0x04));

        let function = m.real_read_u16(ds, ax_ptr);
        let bx = m.real_read_u16(ds, bx_ptr);
        let cx = m.real_read_u16(ds, cx_ptr);
        let dx = m.real_read_u16(ds, dx_ptr);
        {
            let regs = m.regs_mut();
            regs.ax = function;
            regs.bx = bx;
            regs.cx = cx;
            regs.dx = dx;
        }

        match function {
            0x09 | 0x16 | 0x17 => m.regs_mut().es = ds,
            0x0C | 0x14 => m.regs_mut().es = if bx != 0 { bx } else { ds },
            0x10 => {
                // DX points to a block of four words
                let region: [u16; 4] =
                    std::array::from_fn(|idx| m.real_read_u16(ds, dx_ptr.wrapping_add(2 * idx as u16)));
                let regs = m.regs_mut();
                regs.cx = region[0];
                regs.dx = region[1];
                regs.si = region[2];
                regs.di = region[3];
            }
            _ => {}
        }

        self.int33_handler(m);

        let regs = *m.regs();
        m.real_write_u16(ds, ax_ptr, regs.ax);
        m.real_write_u16(ds, bx_ptr, regs.bx);
        m.real_write_u16(ds, cx_ptr, regs.cx);
        m.real_write_u16(ds, dx_ptr, regs.dx);
        match function {
            0x1F => m.real_write_u16(ds, bx_ptr, regs.es),
            0x14 => m.real_write_u16(ds, cx_ptr, regs.es),
            _ => {}
        }
    }

    fn not_implemented<M: Machine>(&mut self, m: &mut M) {
        let function = m.regs().ax;
        self.warn_unimplemented(function, unimplemented_description(function));
    }

    fn ignored<M: Machine>(&mut self, _m: &mut M) {}

    /// 00h: reset hardware and driver, AX=FFFFh if installed, BX=buttons
    fn reset_and_status<M: Machine>(&mut self, m: &mut M) {
        self.reset_hardware(m);
        self.software_reset(m);
    }

    /// 21h
    fn software_reset<M: Machine>(&mut self, m: &mut M) {
        let regs = m.regs_mut();
        regs.ax = 0xFFFF;
        regs.bx = NUM_BUTTONS as u16;
        self.reset_driver(m);
    }

    /// 01h
    fn show_cursor<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let hidden = state.hidden(m);
        if hidden != 0 {
            state.set_hidden(m, hidden - 1);
        }
        // Offscreen, nothing excluded any more
        state.set_update_region_y2(m, -1);
        self.draw_cursor(m);
    }

    /// 02h, calls nest
    fn hide_cursor<M: Machine>(&mut self, m: &mut M) {
        if m.current_mode().is_text {
            self.restore_cursor_background_text(m);
        } else {
            self.restore_cursor_background(m);
        }
        let hidden = self.state.hidden(m);
        self.state.set_hidden(m, hidden.wrapping_add(1));
    }

    /// 03h: BL=buttons, BH=wheel counter (cleared), CX/DX=position
    fn get_position_and_buttons<M: Machine>(&mut self, m: &mut M) {
        let wheel = self.reset_wheel_8bit(m);
        let (x, y) = (self.pos_x(m), self.pos_y(m));
        let regs = m.regs_mut();
        regs.set_bl(self.buttons.to_byte());
        regs.set_bh(wheel);
        regs.cx = x;
        regs.dx = y;
    }

    /// 04h
    fn set_cursor_position<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let (cx, dx) = (m.regs().cx, m.regs().dx);

        // Rounding loses precision; only move if the guest asked for a
        // different position than the one it can read back
        if cx as i16 as i32 != self.pos_x(m) as i32 {
            state.set_absolute_x(m, cx as f32);
        }
        if dx as i16 as i32 != self.pos_y(m) as i32 {
            state.set_absolute_y(m, dx as f32);
        }
        self.limit_coordinates(m);
        self.draw_cursor(m);
    }

    /// Shared body of 05h and 06h
    fn get_button_data<M: Machine>(&mut self, m: &mut M, pressed: bool) {
        let state = self.state;
        let idx = m.regs().bx;

        if idx == WHEEL_QUERY_INDEX && state.wheel_api(m) {
            let wheel = self.reset_wheel_16bit(m);
            let (x, y) = (state.last_wheel_moved_x(m), state.last_wheel_moved_y(m));
            let regs = m.regs_mut();
            regs.bx = wheel;
            regs.cx = x;
            regs.dx = y;
            return;
        }

        let buttons = self.buttons.to_word();
        let (count, x, y) = match idx as usize {
            idx if idx < NUM_BUTTONS && pressed => {
                let data = (state.times_pressed(m, idx), state.last_pressed_x(m, idx), state.last_pressed_y(m, idx));
                state.set_times_pressed(m, idx, 0);
                data
            }
            idx if idx < NUM_BUTTONS => {
                let data = (state.times_released(m, idx), state.last_released_x(m, idx), state.last_released_y(m, idx));
                state.set_times_released(m, idx, 0);
                data
            }
            _ => (0, 0, 0),
        };

        let regs = m.regs_mut();
        regs.ax = buttons;
        regs.bx = count;
        regs.cx = x;
        regs.dx = y;
    }

    /// 05h
    fn get_button_press_data<M: Machine>(&mut self, m: &mut M) {
        self.get_button_data(m, true);
    }

    /// 06h
    fn get_button_release_data<M: Machine>(&mut self, m: &mut M) {
        self.get_button_data(m, false);
    }

    /// 07h; the position is clamped, the other axis is left alone
    fn set_horizontal_range<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let (min, max) = range_from_regs(m.regs().cx, m.regs().dx);
        state.set_min_pos_x(m, min);
        state.set_max_pos_x(m, max);
        let x = state.absolute_x(m).max(min as f32).min(max as f32);
        state.set_absolute_x(m, x);
    }

    /// 08h
    fn set_vertical_range<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let (min, max) = range_from_regs(m.regs().cx, m.regs().dx);
        state.set_min_pos_y(m, min);
        state.set_max_pos_y(m, max);
        let y = state.absolute_y(m).max(min as f32).min(max as f32);
        state.set_absolute_y(m, y);
    }

    /// 09h: BX/CX hot spot, ES:DX screen mask then cursor mask
    fn define_graphics_cursor<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let regs = *m.regs();
        let src = physical(regs.es, regs.dx);

        let read_mask = |m: &M, base: u32| -> [u16; CURSOR_SIZE] {
            std::array::from_fn(|idx| m.read_u16(base + 2 * idx as u32))
        };
        let screen_mask = read_mask(&*m, src);
        let cursor_mask = read_mask(&*m, src + 2 * CURSOR_SIZE as u32);

        state.set_screen_mask(m, &screen_mask);
        state.set_cursor_mask(m, &cursor_mask);
        state.set_user_screen_mask(m, true);
        state.set_user_cursor_mask(m, true);

        let limit = CURSOR_SIZE as i16;
        state.set_hot_x(m, (regs.bx as i16).clamp(-limit, limit));
        state.set_hot_y(m, (regs.cx as i16).clamp(-limit, limit));
        state.set_cursor_type(m, CursorType::Text);
        self.draw_cursor(m);
    }

    /// 0Ah: BX=0 software (CX AND mask, DX XOR mask), else hardware
    /// (CL/DL scan lines)
    fn define_text_cursor<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let regs = *m.regs();

        let cursor_type = if regs.bx != 0 {
            CursorType::Hardware
        } else {
            CursorType::Software
        };
        state.set_cursor_type(m, cursor_type);
        state.set_text_mask_and(m, regs.cx);
        state.set_text_mask_xor(m, regs.dx);
        if regs.bx != 0 {
            m.set_cursor_shape(regs.cl(), regs.dl());
        }
        self.draw_cursor(m);
    }

    /// 0Bh: mickeys since the last call
    fn read_motion_counters<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let x = mickey_counter_to_reg16(state.mickey_counter_x(m));
        let y = mickey_counter_to_reg16(state.mickey_counter_y(m));
        state.set_mickey_counter_x(m, 0.0);
        state.set_mickey_counter_y(m, 0.0);

        let regs = m.regs_mut();
        regs.cx = x;
        regs.dx = y;
    }

    /// 27h: text masks, then as 0Bh
    fn get_text_masks_and_counters<M: Machine>(&mut self, m: &mut M) {
        let (and_mask, xor_mask) = (self.state.text_mask_and(m), self.state.text_mask_xor(m));
        let regs = m.regs_mut();
        regs.ax = and_mask;
        regs.bx = xor_mask;
        self.read_motion_counters(m);
    }

    /// 0Ch: CX event mask, ES:DX handler
    fn set_user_callback<M: Machine>(&mut self, m: &mut M) {
        let regs = *m.regs();
        self.state.set_user_callback_mask(m, regs.cx);
        self.state.set_user_callback(m, RealPtr::new(regs.es, regs.dx));
    }

    /// 14h: like 0Ch, returns the previous mask and handler
    fn exchange_user_callback<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let old_mask = state.user_callback_mask(m);
        let old_callback = state.user_callback(m);

        self.set_user_callback(m);

        let regs = m.regs_mut();
        regs.cx = old_mask;
        regs.dx = old_callback.offset();
        regs.es = old_callback.segment();
    }

    /// 0Fh
    fn set_mickey_ratio<M: Machine>(&mut self, m: &mut M) {
        let (cx, dx) = (m.regs().cx, m.regs().dx);
        self.set_mickey_pixel_rate(m, cx as i16, dx as i16);
    }

    /// 10h: CX,DX upper left, SI,DI lower right
    fn set_update_region<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let regs = *m.regs();
        state.set_update_region_x1(m, regs.cx as i16);
        state.set_update_region_y1(m, regs.dx as i16);
        state.set_update_region_x2(m, regs.si as i16);
        state.set_update_region_y2(m, regs.di as i16);
        self.draw_cursor(m);
    }

    /// 11h: CuteMouse WheelAPI detection, also enables the wheel
    fn get_wheel_capabilities<M: Machine>(&mut self, m: &mut M) {
        let regs = m.regs_mut();
        regs.ax = 0x574D;
        // Capability flags, none defined
        regs.bx = 0;
        // One wheel
        regs.cx = 1;

        self.counter_w = 0;
        self.state.set_wheel_api(m, true);
    }

    /// 13h
    fn set_speed_threshold<M: Machine>(&mut self, m: &mut M) {
        let bx = m.regs().bx;
        self.set_double_speed_threshold(m, bx);
    }

    /// 15h
    fn get_state_size<M: Machine>(&mut self, m: &mut M) {
        m.regs_mut().bx = INSTANCE_SIZE;
    }

    /// 16h: copy the driver state to ES:DX
    fn save_state<M: Machine>(&mut self, m: &mut M) {
        let regs = *m.regs();
        self.state.save_instance(m, physical(regs.es, regs.dx));
    }

    /// 17h: restore the driver state from ES:DX
    fn load_state<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let regs = *m.regs();
        state.load_instance(m, physical(regs.es, regs.dx));
        self.events.motion.reset();

        // Recompute the derived coefficients from the loaded raw values
        let (x, y, unknown) = (state.sensitivity_x(m), state.sensitivity_y(m), state.unknown_01(m));
        self.set_sensitivity(m, x as u16, y as u16, unknown as u16);
    }

    /// 1Ah: BX horizontal, CX vertical, DX (unused) third value
    fn set_sensitivity_values<M: Machine>(&mut self, m: &mut M) {
        let regs = *m.regs();
        self.set_sensitivity(m, regs.bx, regs.cx, regs.dx);
    }

    /// 1Bh
    fn get_sensitivity_values<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let (x, y, unknown) = (state.sensitivity_x(m), state.sensitivity_y(m), state.unknown_01(m));
        let regs = m.regs_mut();
        regs.bx = x as u16;
        regs.cx = y as u16;
        regs.dx = unknown as u16;
    }

    /// 1Ch: BX rate id
    fn set_rate<M: Machine>(&mut self, m: &mut M) {
        let bx = m.regs().bx;
        self.set_interrupt_rate(m, bx);
    }

    /// 1Dh
    fn set_display_page<M: Machine>(&mut self, m: &mut M) {
        let page = m.regs().bl();
        self.state.set_page(m, page);
    }

    /// 1Eh
    fn get_display_page<M: Machine>(&mut self, m: &mut M) {
        let page = self.state.page(m);
        m.regs_mut().bx = page as u16;
    }

    /// 1Fh; there is no previous driver to report, so ES:BX is null.
    /// AX is left as 001Fh, meaning success.
    fn disable_driver<M: Machine>(&mut self, m: &mut M) {
        let regs = m.regs_mut();
        regs.bx = 0;
        regs.es = 0;

        let state = self.state;
        state.set_enabled(m, false);
        let hidden = state.hidden(m);
        state.set_old_hidden(m, hidden);
        state.set_hidden(m, 1);
    }

    /// 20h
    fn enable_driver<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        state.set_enabled(m, true);
        let old_hidden = state.old_hidden(m);
        state.set_hidden(m, old_hidden);
    }

    /// 22h
    fn set_language<M: Machine>(&mut self, m: &mut M) {
        let bx = m.regs().bx;
        self.state.set_language(m, bx);
    }

    /// 23h
    fn get_language<M: Machine>(&mut self, m: &mut M) {
        let language = self.state.language(m);
        m.regs_mut().bx = language;
    }

    /// 24h: BX version, CH mouse type, CL IRQ (0 for PS/2)
    fn get_version_and_type<M: Machine>(&mut self, m: &mut M) {
        let regs = m.regs_mut();
        regs.set_bh(DRIVER_VERSION_MAJOR);
        regs.set_bl(DRIVER_VERSION_MINOR);
        regs.set_ch(MOUSE_TYPE_PS2);
        regs.set_cl(0);
    }

    /// 25h: AL display drivers, AH flags (bits 0-3 rate, 4-5 cursor
    /// type, 6 integrated driver)
    fn get_general_info<M: Machine>(&mut self, m: &mut M) {
        const INTEGRATED_DRIVER: u8 = 1 << 6;
        let cursor_type = (self.state.cursor_type(m) as u8) << 4;
        let rate = self.interrupt_rate_id(m);

        let regs = m.regs_mut();
        regs.set_al(1);
        regs.set_ah(INTEGRATED_DRIVER | cursor_type | rate);
        // OS/2 lock and busy flags
        regs.bx = 0;
        regs.cx = 0;
        regs.dx = 0;
    }

    /// 26h: BX=0 if enabled, CX/DX maximum virtual coordinates
    fn get_max_coordinates<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let enabled = state.enabled(m);
        let (max_x, max_y) = (state.max_pos_x(m), state.max_pos_y(m));

        let regs = m.regs_mut();
        regs.bx = if enabled { 0x0000 } else { 0xFFFF };
        regs.cx = max_x as u16;
        regs.dx = max_y as u16;
    }

    /// 2Ah: AL negated hidden counter, BX/CX hot spot, DX mouse type
    fn get_hot_spot<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let hidden = state.hidden(m);
        let (hot_x, hot_y) = (state.hot_x(m), state.hot_y(m));

        let regs = m.regs_mut();
        regs.set_al((hidden as u8).wrapping_neg());
        regs.bx = hot_x as u16;
        regs.cx = hot_y as u16;
        regs.dx = MOUSE_TYPE_PS2 as u16;
    }

    /// 31h
    fn get_current_range<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        let (min_x, min_y) = (state.min_pos_x(m), state.min_pos_y(m));
        let (max_x, max_y) = (state.max_pos_x(m), state.max_pos_y(m));

        let regs = m.regs_mut();
        regs.ax = min_x as u16;
        regs.bx = min_y as u16;
        regs.cx = max_x as u16;
        regs.dx = max_y as u16;
    }

    /// 32h: bitmap of supported functions 25h..34h
    fn get_advanced_functions<M: Machine>(&mut self, m: &mut M) {
        // AL bit 2: 32h, bit 3: 31h. AH bit 2: 2Ah, bit 5: 27h, bit 6:
        // 26h, bit 7: 25h. 34h works but there is no real MOUSE.INI, so
        // its bit stays clear.
        let regs = m.regs_mut();
        regs.ax = 0xE40C;
        regs.bx = 0;
        regs.cx = 0;
        regs.dx = 0;
    }

    /// 34h: ES:DX initialization file name (empty)
    fn get_ini_file<M: Machine>(&mut self, m: &mut M) {
        let info = self.info;
        let regs = m.regs_mut();
        regs.es = info.segment;
        regs.dx = info.offset_ini_file;
    }

    /// 4Dh: ES:DI copyright string
    fn get_copyright<M: Machine>(&mut self, m: &mut M) {
        let info = self.info;
        let regs = m.regs_mut();
        regs.es = info.segment;
        regs.di = info.offset_copyright;
    }

    /// 6Dh: ES:DI version string
    fn get_version_string<M: Machine>(&mut self, m: &mut M) {
        let info = self.info;
        let regs = m.regs_mut();
        regs.es = info.segment;
        regs.di = info.offset_version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::MouseButtons;
    use crate::config::MouseDosConfig;
    use crate::headless::HeadlessMachine;
    use crate::machine::{CallbackKind, Cpu, Registers};
    use emu_core::GuestMemory;

    fn start() -> (HeadlessMachine, MouseDriver) {
        let mut m = HeadlessMachine::new();
        let driver = MouseDriver::start(&mut m, &MouseDosConfig::default()).unwrap();
        (m, driver)
    }

    fn call(m: &mut HeadlessMachine, driver: &mut MouseDriver, regs: Registers) -> Registers {
        let saved = *m.regs();
        *m.regs_mut() = Registers {
            ss: saved.ss,
            sp: saved.sp,
            ..regs
        };
        driver.handle_callback(m, CallbackKind::Int33);
        *m.regs()
    }

    #[test]
    fn test_lookup() {
        assert!(lookup::<HeadlessMachine>(0x00).is_some());
        assert!(lookup::<HeadlessMachine>(0x53C1).is_some());
        assert!(lookup::<HeadlessMachine>(0x0D).is_some());
        assert!(lookup::<HeadlessMachine>(0x99).is_none());
        assert!(lookup::<HeadlessMachine>(0x3F).is_none());
    }

    #[test]
    fn test_reset_reports_installed() {
        let (mut m, mut driver) = start();
        let regs = call(&mut m, &mut driver, Registers::default());
        assert_eq!(regs.ax, 0xFFFF);
        assert_eq!(regs.bx, 3);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x21, ..Default::default() });
        assert_eq!(regs.ax, 0xFFFF);
    }

    #[test]
    fn test_show_hide_nesting() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        call(&mut m, &mut driver, Registers { ax: 0x02, ..Default::default() });
        call(&mut m, &mut driver, Registers { ax: 0x02, ..Default::default() });
        assert_eq!(state.hidden(&m), 3);

        for _ in 0..5 {
            call(&mut m, &mut driver, Registers { ax: 0x01, ..Default::default() });
        }
        assert_eq!(state.hidden(&m), 0);
        assert_eq!(state.update_region_y2(&m), -1);
    }

    #[test]
    fn test_set_and_get_position() {
        let (mut m, mut driver) = start();
        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x04,
                cx: 100,
                dx: 5000,
                ..Default::default()
            },
        );
        let regs = call(&mut m, &mut driver, Registers { ax: 0x03, ..Default::default() });
        assert_eq!(regs.cx, 96);
        assert_eq!(regs.dx, 192);
        assert_eq!(regs.bx, 0);
    }

    #[test]
    fn test_set_position_keeps_subpixel_when_unchanged() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        state.set_granularity_x(&mut m, 0xFFFF);
        state.set_absolute_x(&mut m, 100.4);

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x04,
                cx: 100,
                dx: 100,
                ..Default::default()
            },
        );
        assert_eq!(state.absolute_x(&m), 100.4);
    }

    #[test]
    fn test_button_press_counters_reset_on_read() {
        let (mut m, mut driver) = start();
        driver.update_buttons(&mut m, MouseButtons::from_byte(0x01));
        driver.update_buttons(&mut m, MouseButtons::NONE);
        driver.update_buttons(&mut m, MouseButtons::from_byte(0x01));

        let regs = call(&mut m, &mut driver, Registers { ax: 0x05, bx: 0, ..Default::default() });
        assert_eq!(regs.ax, 0x01);
        assert_eq!(regs.bx, 2);
        assert_eq!(regs.cx, 320);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x05, bx: 0, ..Default::default() });
        assert_eq!(regs.bx, 0);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x06, bx: 0, ..Default::default() });
        assert_eq!(regs.bx, 1);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x06, bx: 7, cx: 9, ..Default::default() });
        assert_eq!((regs.ax, regs.bx, regs.cx, regs.dx), (0x01, 0, 0, 0));
    }

    #[test]
    fn test_wheel_query_through_button_functions() {
        let (mut m, mut driver) = start();
        call(&mut m, &mut driver, Registers { ax: 0x11, ..Default::default() });
        driver.counter_w = -3;

        let regs = call(&mut m, &mut driver, Registers { ax: 0x05, bx: 0xFFFF, ..Default::default() });
        assert_eq!(regs.bx, (-3i16) as u16);
        assert_eq!(driver.counter_w, 0);
    }

    #[test]
    fn test_wheel_read_in_function_03() {
        let (mut m, mut driver) = start();
        driver.counter_w = 5;
        // WheelAPI off: nothing reported but the counter is not touched
        let regs = call(&mut m, &mut driver, Registers { ax: 0x03, ..Default::default() });
        assert_eq!(regs.bh(), 0);

        call(&mut m, &mut driver, Registers { ax: 0x11, ..Default::default() });
        driver.counter_w = -2;
        let regs = call(&mut m, &mut driver, Registers { ax: 0x03, ..Default::default() });
        assert_eq!(regs.bh(), 0xFE);
        assert_eq!(driver.counter_w, 0);
    }

    #[test]
    fn test_ranges_are_ordered_and_clamp() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        state.set_absolute_y(&mut m, 150.0);

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x07,
                cx: 300,
                dx: 100,
                ..Default::default()
            },
        );
        assert_eq!((state.min_pos_x(&m), state.max_pos_x(&m)), (100, 300));
        assert_eq!(state.absolute_x(&m), 300.0);
        assert_eq!(state.absolute_y(&m), 150.0);

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x08,
                cx: 0xFFF6,
                dx: 20,
                ..Default::default()
            },
        );
        assert_eq!((state.min_pos_y(&m), state.max_pos_y(&m)), (-10, 20));
        assert_eq!(state.absolute_y(&m), 20.0);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x31, ..Default::default() });
        assert_eq!((regs.ax, regs.bx, regs.cx, regs.dx), (100, 0xFFF6, 300, 20));
    }

    #[test]
    fn test_define_graphics_cursor() {
        let (mut m, mut driver) = start();
        let buffer = physical(0x3000, 0x0040);
        for idx in 0..16u32 {
            m.write_u16(buffer + 2 * idx, 0x1100 + idx as u16);
            m.write_u16(buffer + 32 + 2 * idx, 0x2200 + idx as u16);
        }

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x09,
                bx: 40,
                cx: 0xFFFE,
                dx: 0x0040,
                es: 0x3000,
                ..Default::default()
            },
        );

        let state = driver.state();
        assert_eq!(state.user_screen_mask_data(&m, 3), 0x1103);
        assert_eq!(state.user_cursor_mask_data(&m, 3), 0x2203);
        assert!(state.user_screen_mask(&m));
        assert!(state.user_cursor_mask(&m));
        assert_eq!(state.hot_x(&m), 16);
        assert_eq!(state.hot_y(&m), -2);
        assert_eq!(state.cursor_type(&m), CursorType::Text);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x2A, ..Default::default() });
        assert_eq!(regs.al(), 0xFF);
        assert_eq!(regs.bx, 16);
        assert_eq!(regs.cx, 0xFFFE);
        assert_eq!(regs.dx, 4);
    }

    #[test]
    fn test_define_text_cursor() {
        let (mut m, mut driver) = start();
        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x0A,
                bx: 1,
                cx: 0x0006,
                dx: 0x0007,
                ..Default::default()
            },
        );
        let state = driver.state();
        assert_eq!(state.cursor_type(&m), CursorType::Hardware);
        assert_eq!(m.cursor_shape, Some((6, 7)));

        let regs = call(&mut m, &mut driver, Registers { ax: 0x27, ..Default::default() });
        assert_eq!((regs.ax, regs.bx), (0x0006, 0x0007));

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x0A,
                bx: 0,
                cx: 0xFFFF,
                dx: 0x7700,
                ..Default::default()
            },
        );
        assert_eq!(state.cursor_type(&m), CursorType::Software);
        assert_eq!(state.text_mask_and(&m), 0xFFFF);
    }

    #[test]
    fn test_motion_counters_read_and_clear() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        state.set_mickey_counter_x(&mut m, -7.6);
        state.set_mickey_counter_y(&mut m, 12.4);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x0B, ..Default::default() });
        assert_eq!(regs.cx, (-8i16) as u16);
        assert_eq!(regs.dx, 12);
        assert_eq!(state.mickey_counter_x(&m), 0.0);
    }

    #[test]
    fn test_exchange_callback() {
        let (mut m, mut driver) = start();
        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x0C,
                cx: 0x0002,
                dx: 0x0100,
                es: 0x1234,
                ..Default::default()
            },
        );

        let regs = call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x14,
                cx: 0x007F,
                dx: 0x0200,
                es: 0x4321,
                ..Default::default()
            },
        );
        assert_eq!((regs.cx, regs.dx, regs.es), (0x0002, 0x0100, 0x1234));
        let state = driver.state();
        assert_eq!(state.user_callback(&m), RealPtr::new(0x4321, 0x0200));
        assert_eq!(state.user_callback_mask(&m), 0x007F);
    }

    #[test]
    fn test_state_save_and_load() {
        let (mut m, mut driver) = start();
        let regs = call(&mut m, &mut driver, Registers { ax: 0x15, ..Default::default() });
        assert_eq!(regs.bx, INSTANCE_SIZE);

        let state = driver.state();
        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x1A,
                bx: 20,
                cx: 80,
                dx: 30,
                ..Default::default()
            },
        );
        let save = Registers {
            ax: 0x16,
            dx: 0x0000,
            es: 0x5000,
            ..Default::default()
        };
        call(&mut m, &mut driver, save);

        call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x1A,
                bx: 50,
                cx: 50,
                dx: 50,
                ..Default::default()
            },
        );
        state.set_absolute_x(&mut m, 3.0);
        driver.events.motion.x_rel = 12.0;

        call(&mut m, &mut driver, Registers { ax: 0x17, ..save });
        assert_eq!(state.absolute_x(&m), 320.0);
        assert_eq!(driver.events.motion.x_rel, 0.0);
        assert_eq!(state.sensitivity_coeff_x(&m), crate::position::sensitivity_coeff(20));

        let regs = call(&mut m, &mut driver, Registers { ax: 0x1B, ..Default::default() });
        assert_eq!((regs.bx, regs.cx, regs.dx), (20, 80, 30));
    }

    #[test]
    fn test_disable_enable() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        state.set_hidden(&mut m, 0);

        let regs = call(
            &mut m,
            &mut driver,
            Registers {
                ax: 0x1F,
                es: 0x1111,
                ..Default::default()
            },
        );
        assert_eq!((regs.ax, regs.bx, regs.es), (0x1F, 0, 0));
        assert!(!state.enabled(&m));
        assert_eq!(state.hidden(&m), 1);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x26, ..Default::default() });
        assert_eq!(regs.bx, 0xFFFF);

        call(&mut m, &mut driver, Registers { ax: 0x20, ..Default::default() });
        assert!(state.enabled(&m));
        assert_eq!(state.hidden(&m), 0);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x26, ..Default::default() });
        assert_eq!((regs.bx, regs.cx, regs.dx), (0, 639, 199));
    }

    #[test]
    fn test_info_functions() {
        let (mut m, mut driver) = start();

        let regs = call(&mut m, &mut driver, Registers { ax: 0x22, bx: 3, ..Default::default() });
        assert_eq!(regs.bx, 3);
        let regs = call(&mut m, &mut driver, Registers { ax: 0x23, ..Default::default() });
        assert_eq!(regs.bx, 3);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x24, ..Default::default() });
        assert_eq!(regs.bx, 0x0805);
        assert_eq!(regs.cx, 0x0400);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x25, ..Default::default() });
        assert_eq!(regs.al(), 1);
        // Integrated driver, software cursor, 200 Hz host default
        assert_eq!(regs.ah(), 0x40 | 4);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x32, ..Default::default() });
        assert_eq!(regs.ax, 0xE40C);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x6D, ..Default::default() });
        let mut version = [0u8; 12];
        m.block_read(physical(regs.es, regs.di), &mut version);
        assert_eq!(&version, b"version 8.05");

        let regs = call(&mut m, &mut driver, Registers { ax: 0x34, ..Default::default() });
        assert_eq!(m.read_u8(physical(regs.es, regs.dx)), 0);

        let regs = call(&mut m, &mut driver, Registers { ax: 0x4D, ..Default::default() });
        let mut copyright = vec![0u8; crate::DRIVER_COPYRIGHT.len()];
        m.block_read(physical(regs.es, regs.di), &mut copyright);
        assert_eq!(copyright, crate::DRIVER_COPYRIGHT.as_bytes());
    }

    #[test]
    fn test_page_and_rate() {
        let (mut m, mut driver) = start();
        call(&mut m, &mut driver, Registers { ax: 0x1D, bx: 0x0102, ..Default::default() });
        let regs = call(&mut m, &mut driver, Registers { ax: 0x1E, ..Default::default() });
        assert_eq!(regs.bx, 2);

        call(&mut m, &mut driver, Registers { ax: 0x1C, bx: 3, ..Default::default() });
        assert_eq!(m.rate_notifications.last(), Some(&100));
        let regs = call(&mut m, &mut driver, Registers { ax: 0x25, ..Default::default() });
        assert_eq!(regs.ah() & 0x0F, 3);
    }

    #[test]
    fn test_threshold_and_mickey_ratio() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        call(&mut m, &mut driver, Registers { ax: 0x13, bx: 0, ..Default::default() });
        assert_eq!(state.double_speed_threshold(&m), 64);
        call(&mut m, &mut driver, Registers { ax: 0x13, bx: 200, ..Default::default() });
        assert_eq!(state.double_speed_threshold(&m), 200);

        call(&mut m, &mut driver, Registers { ax: 0x0F, cx: 4, dx: 8, ..Default::default() });
        assert_eq!(state.mickeys_per_pixel_x(&m), 0.5);
        assert_eq!(state.mickeys_per_pixel_y(&m), 1.0);
    }

    #[test]
    fn test_unknown_and_stub_functions_leave_registers() {
        let (mut m, mut driver) = start();
        for ax in [0x0D, 0x0E, 0x12, 0x70, 0x53C1, 0x99] {
            let regs = call(&mut m, &mut driver, Registers { ax, bx: 0x1234, ..Default::default() });
            assert_eq!((regs.ax, regs.bx), (ax, 0x1234));
        }
    }

    #[test]
    fn test_mouse_bd_indirection() {
        let (mut m, mut driver) = start();
        let ds = 0x4000u16;
        // Register block at DS:0100
        let (ax_ptr, bx_ptr, cx_ptr, dx_ptr) = (0x100u16, 0x102u16, 0x104u16, 0x106u16);
        m.real_write_u16(ds, ax_ptr, 0x07);
        m.real_write_u16(ds, bx_ptr, 0);
        m.real_write_u16(ds, cx_ptr, 10);
        m.real_write_u16(ds, dx_ptr, 600);

        {
            let regs = m.regs_mut();
            regs.ds = ds;
            regs.sp = regs.sp.wrapping_sub(12);
        }
        let (ss, sp) = (m.regs().ss, m.regs().sp);
        m.real_write_u16(ss, sp + 0x0A, ax_ptr);
        m.real_write_u16(ss, sp + 0x08, bx_ptr);
        m.real_write_u16(ss, sp + 0x06, cx_ptr);
        m.real_write_u16(ss, sp + 0x04, dx_ptr);

        driver.handle_callback(&mut m, CallbackKind::MouseBd);
        assert_eq!(driver.state().min_pos_x(&m), 10);
        assert_eq!(driver.state().max_pos_x(&m), 600);

        // Exchange handler: new ES from BX, old ES written to the CX slot
        driver.state().set_user_callback(&mut m, RealPtr::new(0x2222, 0x0010));
        m.real_write_u16(ds, ax_ptr, 0x14);
        m.real_write_u16(ds, bx_ptr, 0x3333);
        m.real_write_u16(ds, cx_ptr, 0x00FF);
        m.real_write_u16(ds, dx_ptr, 0x0020);
        driver.handle_callback(&mut m, CallbackKind::MouseBd);
        assert_eq!(driver.state().user_callback(&m), RealPtr::new(0x3333, 0x0020));
        assert_eq!(m.real_read_u16(ds, dx_ptr), 0x0010);
        assert_eq!(m.real_read_u16(ds, cx_ptr), 0x2222);
    }

    #[test]
    fn test_mouse_bd_update_region_block() {
        let (mut m, mut driver) = start();
        let ds = 0x4000u16;
        m.real_write_u16(ds, 0x100, 0x10);
        m.real_write_u16(ds, 0x200, 8);
        m.real_write_u16(ds, 0x202, 16);
        m.real_write_u16(ds, 0x204, 100);
        m.real_write_u16(ds, 0x206, 50);

        {
            let regs = m.regs_mut();
            regs.ds = ds;
            regs.sp = regs.sp.wrapping_sub(12);
        }
        let (ss, sp) = (m.regs().ss, m.regs().sp);
        m.real_write_u16(ss, sp + 0x0A, 0x100);
        m.real_write_u16(ss, sp + 0x08, 0x102);
        m.real_write_u16(ss, sp + 0x06, 0x104);
        m.real_write_u16(ss, sp + 0x04, 0x200);

        driver.handle_callback(&mut m, CallbackKind::MouseBd);
        let state = driver.state();
        assert_eq!(state.update_region_x1(&m), 8);
        assert_eq!(state.update_region_y1(&m), 16);
        assert_eq!(state.update_region_x2(&m), 100);
        assert_eq!(state.update_region_y2(&m), 50);
    }
}
