//! Cursor position model: mickey counters, sensitivity, range limiting and
//! button/wheel bookkeeping.

use emu_core::GuestMemory;

use crate::buttons::MouseButtons;
use crate::driver::MouseDriver;
use crate::events::{clamp_to_i8, MouseEventId};
use crate::machine::Machine;
use crate::state::NUM_BUTTONS;

/// Sensitivity values above this are treated as this
pub const MAX_SENSITIVITY: u8 = 100;

/// Mickey counters wrap around when they leave the signed 16-bit range
const MICKEY_WRAP_HIGH: f32 = 32767.5;
const MICKEY_WRAP_LOW: f32 = -32768.5;

/// Default double speed threshold, in mickeys per second
const DEFAULT_DOUBLE_SPEED_THRESHOLD: u16 = 64;

/// Speed multiplier for a 0..=100 sensitivity setting.
///
/// 0 stops the cursor, 50 is (almost exactly) 1.0, 100 is a bit above 3.0;
/// the curve is quadratic so the low end stays usable.
pub fn sensitivity_coeff(value: u8) -> f32 {
    if value == 0 {
        return 0.0;
    }
    let tmp = (value - 1) as f32;
    tmp * tmp / 3600.0 + 1.0 / 3.0
}

fn wrap_mickey_counter(counter: f32) -> f32 {
    if counter > MICKEY_WRAP_HIGH || counter < MICKEY_WRAP_LOW {
        counter - 65536.0_f32.copysign(counter)
    } else {
        counter
    }
}

/// `f32::clamp` panics when the range is inverted, which the guest can
/// easily arrange with functions 07h/08h
fn clamp_position(pos: f32, min: i16, max: i16) -> f32 {
    pos.max(min as f32).min(max as f32)
}

impl MouseDriver {
    /// Reported X position, with the per-mode granularity applied
    pub fn pos_x<M: GuestMemory + ?Sized>(&self, m: &M) -> u16 {
        (self.state.absolute_x(m).round() as i64 as u16) & self.state.granularity_x(m)
    }

    pub fn pos_y<M: GuestMemory + ?Sized>(&self, m: &M) -> u16 {
        (self.state.absolute_y(m).round() as i64 as u16) & self.state.granularity_y(m)
    }

    /// Function 0Fh, ratio in mickeys per 8 pixels. Non-positive values on
    /// either axis leave both ratios untouched.
    pub(crate) fn set_mickey_pixel_rate<M: GuestMemory + ?Sized>(&self, m: &mut M, ratio_x: i16, ratio_y: i16) {
        if ratio_x <= 0 || ratio_y <= 0 {
            return;
        }

        let state = self.state;
        let x_mickey = ratio_x as f32;
        let y_mickey = ratio_y as f32;

        state.set_mickeys_per_pixel_x(m, x_mickey / 8.0);
        state.set_mickeys_per_pixel_y(m, y_mickey / 8.0);
        state.set_pixels_per_mickey_x(m, 8.0 / x_mickey);
        state.set_pixels_per_mickey_y(m, 8.0 / y_mickey);
    }

    /// Function 13h; 0 selects the default threshold
    pub(crate) fn set_double_speed_threshold<M: GuestMemory + ?Sized>(&self, m: &mut M, threshold: u16) {
        let threshold = if threshold != 0 {
            threshold
        } else {
            DEFAULT_DOUBLE_SPEED_THRESHOLD
        };
        self.state.set_double_speed_threshold(m, threshold);
    }

    /// Functions 1Ah and the tail of 17h
    pub(crate) fn set_sensitivity<M: GuestMemory + ?Sized>(&self, m: &mut M, x: u16, y: u16, unknown: u16) {
        let state = self.state;
        let x = x.min(MAX_SENSITIVITY as u16) as u8;
        let y = y.min(MAX_SENSITIVITY as u16) as u8;
        let unknown = unknown.min(MAX_SENSITIVITY as u16) as u8;

        state.set_sensitivity_x(m, x);
        state.set_sensitivity_y(m, y);
        state.set_unknown_01(m, unknown);

        state.set_sensitivity_coeff_x(m, sensitivity_coeff(x));
        state.set_sensitivity_coeff_y(m, sensitivity_coeff(y));
    }

    /// Keep the absolute position inside the range set by functions 07h/08h
    pub(crate) fn limit_coordinates<M: GuestMemory + ?Sized>(&self, m: &mut M) {
        let state = self.state;
        let x = clamp_position(state.absolute_x(m), state.min_pos_x(m), state.max_pos_x(m));
        let y = clamp_position(state.absolute_y(m), state.min_pos_y(m), state.max_pos_y(m));
        state.set_absolute_x(m, x);
        state.set_absolute_y(m, y);
    }

    /// Scale one relative host movement and add it to the mickey counter.
    /// Returns the cursor delta in pixels.
    fn update_mickeys_on_move<M: GuestMemory + ?Sized>(&self, m: &mut M, x_rel: f32, y_rel: f32) -> (f32, f32) {
        let state = self.state;

        let scale = |rel: f32, pixels_per_mickey: f32, coeff: f32| {
            let mut delta = rel * pixels_per_mickey;
            // Raw single-pixel moves are left unscaled unless the guest
            // asked for a slower cursor
            if !self.is_input_raw || rel.abs() > 1.0 || coeff < 1.0 {
                delta *= coeff;
            }
            delta
        };

        let dx = scale(x_rel, state.pixels_per_mickey_x(m), state.sensitivity_coeff_x(m));
        let dy = scale(y_rel, state.pixels_per_mickey_y(m), state.sensitivity_coeff_y(m));

        let mickey_x = wrap_mickey_counter(state.mickey_counter_x(m) + dx * state.mickeys_per_pixel_x(m));
        let mickey_y = wrap_mickey_counter(state.mickey_counter_y(m) + dy * state.mickeys_per_pixel_y(m));
        state.set_mickey_counter_x(m, mickey_x);
        state.set_mickey_counter_y(m, mickey_y);

        (dx, dy)
    }

    fn move_cursor_captured<M: GuestMemory + ?Sized>(&self, m: &mut M, x_rel: f32, y_rel: f32) {
        let (dx, dy) = self.update_mickeys_on_move(m, x_rel, y_rel);

        let state = self.state;
        let x = state.absolute_x(m) + dx;
        let y = state.absolute_y(m) + dy;
        state.set_absolute_x(m, x);
        state.set_absolute_y(m, y);
    }

    fn move_cursor_seamless<M: Machine>(&self, m: &mut M, x_rel: f32, y_rel: f32, x_abs: u32, y_abs: u32) {
        // Mickeys still follow the relative motion
        self.update_mickeys_on_move(m, x_rel, y_rel);

        let state = self.state;
        let (res_x, res_y) = m.host_resolution();
        let fraction = |abs: u32, res: u32| {
            if res > 1 {
                abs as f32 / (res - 1) as f32
            } else {
                0.0
            }
        };
        let x = fraction(x_abs, res_x);
        let y = fraction(y_abs, res_y);

        if m.current_mode().is_text {
            let (columns, rows) = (m.text_columns() as f32, m.text_rows() as f32);
            state.set_absolute_x(m, x * 8.0 * columns);
            state.set_absolute_y(m, y * 8.0 * rows);
            return;
        }

        let (max_x, max_y) = (state.max_pos_x(m), state.max_pos_y(m));
        let virtual_range_usable = max_x < 2048 || max_y < 2048 || max_x != max_y;
        if virtual_range_usable && max_x > 0 && max_y > 0 {
            state.set_absolute_x(m, x * max_x as f32);
            state.set_absolute_y(m, y * max_y as f32);
            return;
        }

        // Virtual resolution not usable (or a huge square range set by an
        // application that wants relative motion), follow relative input
        let new_x = state.absolute_x(m) + x_rel;
        let new_y = state.absolute_y(m) + y_rel;
        state.set_absolute_x(m, new_x);
        state.set_absolute_y(m, new_y);
    }

    /// Apply pending motion. Returns the `MouseHasMoved` bit if the position
    /// or a mickey counter changed.
    pub(crate) fn move_cursor<M: Machine>(&mut self, m: &mut M) -> u8 {
        let state = self.state;

        let old_pos_x = self.pos_x(m);
        let old_pos_y = self.pos_y(m);
        let old_mickey_x = state.mickey_counter_x(m) as i16;
        let old_mickey_y = state.mickey_counter_y(m) as i16;

        let motion = self.events.motion;
        if self.use_relative {
            self.move_cursor_captured(m, motion.x_rel, motion.y_rel);
        } else {
            self.move_cursor_seamless(m, motion.x_rel, motion.y_rel, motion.x_abs, motion.y_abs);
        }
        self.events.motion.x_rel = 0.0;
        self.events.motion.y_rel = 0.0;

        self.limit_coordinates(m);

        let abs_changed = old_pos_x != self.pos_x(m) || old_pos_y != self.pos_y(m);
        let rel_changed = old_mickey_x as f32 != state.mickey_counter_x(m)
            || old_mickey_y as f32 != state.mickey_counter_y(m);

        if abs_changed || rel_changed {
            MouseEventId::MouseHasMoved.bit()
        } else {
            0
        }
    }

    /// Interrupt-time motion update; in immediate mode the motion was
    /// already applied when the host reported it
    pub(crate) fn update_moved<M: Machine>(&mut self, m: &mut M) -> u8 {
        if self.immediate {
            return MouseEventId::MouseHasMoved.bit();
        }
        self.move_cursor(m)
    }

    /// Compare `new` with the last dispatched state, update the press and
    /// release counters and return the edge bits
    pub(crate) fn update_buttons<M: GuestMemory + ?Sized>(&mut self, m: &mut M, new: MouseButtons) -> u8 {
        if self.buttons == new {
            return 0;
        }

        let state = self.state;
        let pos_x = self.pos_x(m);
        let pos_y = self.pos_y(m);
        let mut mask = 0u8;

        for idx in 0..NUM_BUTTONS {
            let (pressed_id, released_id) = MouseEventId::button_edges(idx);
            let (was, is) = (self.buttons.get(idx), new.get(idx));

            if is && !was {
                state.set_last_pressed_x(m, idx, pos_x);
                state.set_last_pressed_y(m, idx, pos_y);
                let count = state.times_pressed(m, idx);
                state.set_times_pressed(m, idx, count.wrapping_add(1));
                mask |= pressed_id.bit();
            } else if was && !is {
                state.set_last_released_x(m, idx, pos_x);
                state.set_last_released_y(m, idx, pos_y);
                let count = state.times_released(m, idx);
                state.set_times_released(m, idx, count.wrapping_add(1));
                mask |= released_id.bit();
            }
        }

        self.buttons = new;
        mask
    }

    /// Fold pending wheel motion into the guest-visible counter
    pub(crate) fn move_wheel<M: GuestMemory + ?Sized>(&mut self, m: &mut M) -> u8 {
        self.counter_w = clamp_to_i8(self.counter_w as i32 + self.events.motion.w_rel as i32);
        self.events.motion.w_rel = 0;

        let state = self.state;
        let (pos_x, pos_y) = (self.pos_x(m), self.pos_y(m));
        state.set_last_wheel_moved_x(m, pos_x);
        state.set_last_wheel_moved_y(m, pos_y);

        if self.counter_w != 0 {
            MouseEventId::WheelHasMoved.bit()
        } else {
            0
        }
    }

    pub(crate) fn update_wheel<M: GuestMemory + ?Sized>(&mut self, m: &mut M) -> u8 {
        if self.immediate {
            return MouseEventId::WheelHasMoved.bit();
        }
        self.move_wheel(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MouseDosConfig;
    use crate::headless::HeadlessMachine;

    fn start() -> (HeadlessMachine, MouseDriver) {
        let mut m = HeadlessMachine::new();
        let driver = MouseDriver::start(&mut m, &MouseDosConfig::default()).unwrap();
        (m, driver)
    }

    #[test]
    fn test_sensitivity_curve() {
        assert_eq!(sensitivity_coeff(0), 0.0);
        assert!((sensitivity_coeff(1) - 1.0 / 3.0).abs() < 1e-6);
        assert!((sensitivity_coeff(50) - 1.0).abs() < 0.001);
        assert!(sensitivity_coeff(100) > 3.0);
    }

    #[test]
    fn test_sensitivity_is_clamped() {
        let (mut m, driver) = start();
        driver.set_sensitivity(&mut m, 500, 101, 1000);
        let state = driver.state();
        assert_eq!(state.sensitivity_x(&m), 100);
        assert_eq!(state.sensitivity_y(&m), 100);
        assert_eq!(state.unknown_01(&m), 100);
        assert_eq!(state.sensitivity_coeff_x(&m), sensitivity_coeff(100));
    }

    #[test]
    fn test_mickey_pixel_rate() {
        let (mut m, driver) = start();
        let state = driver.state();
        assert_eq!(state.mickeys_per_pixel_x(&m), 1.0);
        assert_eq!(state.mickeys_per_pixel_y(&m), 2.0);
        assert_eq!(state.pixels_per_mickey_y(&m), 0.5);

        driver.set_mickey_pixel_rate(&mut m, 16, 0);
        assert_eq!(state.mickeys_per_pixel_x(&m), 1.0);

        driver.set_mickey_pixel_rate(&mut m, 16, 4);
        assert_eq!(state.mickeys_per_pixel_x(&m), 2.0);
        assert_eq!(state.pixels_per_mickey_x(&m), 0.5);
        assert_eq!(state.mickeys_per_pixel_y(&m), 0.5);
    }

    #[test]
    fn test_mickey_counter_wraps() {
        assert_eq!(wrap_mickey_counter(32767.0), 32767.0);
        assert_eq!(wrap_mickey_counter(32768.0), -32768.0);
        assert_eq!(wrap_mickey_counter(-32769.0), 32767.0);
    }

    #[test]
    fn test_inverted_range_does_not_panic() {
        assert_eq!(clamp_position(50.0, 100, 10), 10.0);
        assert_eq!(clamp_position(-5.0, 0, 639), 0.0);
    }

    #[test]
    fn test_captured_move_scales_by_sensitivity() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        driver.set_sensitivity(&mut m, 1, 1, 50);

        driver.events.motion.x_rel = 30.0;
        driver.events.motion.y_rel = -30.0;
        assert_eq!(driver.move_cursor(&mut m), 0x01);

        assert!((state.absolute_x(&m) - 330.0).abs() < 0.01);
        // Y moves 2 mickeys per pixel by default
        assert!((state.absolute_y(&m) - 95.0).abs() < 0.01);
        assert!((state.mickey_counter_x(&m) - 10.0).abs() < 0.01);
        assert!((state.mickey_counter_y(&m) + 10.0).abs() < 0.01);
        assert_eq!(driver.events.motion.x_rel, 0.0);
    }

    #[test]
    fn test_raw_single_pixel_not_scaled() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        driver.set_sensitivity(&mut m, 100, 100, 50);
        driver.notify_input_type(true, true);

        driver.events.motion.x_rel = 1.0;
        driver.move_cursor(&mut m);
        assert_eq!(state.absolute_x(&m), 321.0);

        driver.events.motion.x_rel = 2.0;
        driver.move_cursor(&mut m);
        assert!(state.absolute_x(&m) > 327.0);
    }

    #[test]
    fn test_zero_sensitivity_freezes_cursor() {
        let (mut m, mut driver) = start();
        driver.set_sensitivity(&mut m, 0, 0, 0);
        driver.notify_input_type(true, true);

        driver.events.motion.x_rel = 1.0;
        assert_eq!(driver.move_cursor(&mut m), 0);
        assert_eq!(driver.state().absolute_x(&m), 320.0);
    }

    #[test]
    fn test_position_limited_and_granular() {
        let (mut m, mut driver) = start();
        let state = driver.state();

        driver.events.motion.x_rel = 2048.0;
        driver.move_cursor(&mut m);
        assert_eq!(state.absolute_x(&m), 639.0);
        assert_eq!(driver.pos_x(&m), 632);

        state.set_absolute_x(&mut m, 3.6);
        assert_eq!(driver.pos_x(&m), 0);
        state.set_granularity_x(&mut m, 0xFFFF);
        assert_eq!(driver.pos_x(&m), 4);
    }

    #[test]
    fn test_seamless_uses_virtual_resolution_in_graphics() {
        let (mut m, mut driver) = start();
        m.set_video_mode(0x12);
        driver.after_new_video_mode(&mut m, true);
        driver.notify_input_type(false, true);

        driver.events.motion.x_abs = 319;
        driver.events.motion.y_abs = 399;
        assert_eq!(driver.move_cursor(&mut m), 0x01);
        let state = driver.state();
        assert!((state.absolute_x(&m) - 319.0).abs() < 0.01);
        assert_eq!(state.absolute_y(&m), 479.0);
    }

    #[test]
    fn test_seamless_falls_back_to_relative_for_square_ranges() {
        let (mut m, mut driver) = start();
        m.set_video_mode(0x12);
        driver.after_new_video_mode(&mut m, true);
        let state = driver.state();
        state.set_max_pos_x(&mut m, 4096);
        state.set_max_pos_y(&mut m, 4096);
        state.set_absolute_x(&mut m, 100.0);
        driver.notify_input_type(false, true);

        driver.events.motion.x_abs = 600;
        driver.events.motion.x_rel = 7.0;
        driver.move_cursor(&mut m);
        assert_eq!(state.absolute_x(&m), 107.0);
    }

    #[test]
    fn test_button_edges_and_counters() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        state.set_absolute_x(&mut m, 100.0);

        let mask = driver.update_buttons(&mut m, MouseButtons::from_byte(0x03));
        assert_eq!(mask, 0x02 | 0x08);
        assert_eq!(state.times_pressed(&m, 0), 1);
        assert_eq!(state.times_pressed(&m, 1), 1);
        assert_eq!(state.last_pressed_x(&m, 0), 96);

        assert_eq!(driver.update_buttons(&mut m, MouseButtons::from_byte(0x03)), 0);

        let mask = driver.update_buttons(&mut m, MouseButtons::from_byte(0x06));
        assert_eq!(mask, 0x04 | 0x20);
        assert_eq!(state.times_released(&m, 0), 1);
        assert_eq!(state.times_pressed(&m, 2), 1);
        assert_eq!(driver.buttons, MouseButtons::from_byte(0x06));
    }

    #[test]
    fn test_wheel_counter_saturates() {
        let (mut m, mut driver) = start();
        driver.counter_w = 120;
        driver.events.motion.w_rel = 20;
        assert_eq!(driver.move_wheel(&mut m), 0x80);
        assert_eq!(driver.counter_w, 127);
        assert_eq!(driver.events.motion.w_rel, 0);

        driver.counter_w = 5;
        driver.events.motion.w_rel = -5;
        assert_eq!(driver.move_wheel(&mut m), 0);
        assert_eq!(driver.state().last_wheel_moved_x(&m), 320);
    }
}
