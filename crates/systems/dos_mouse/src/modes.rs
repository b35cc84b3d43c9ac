//! Video mode tracking: per-mode coordinate ranges and granularity.

use emu_core::logging::{log, LogCategory, LogLevel};

use crate::driver::{MouseDriver, BIOS_VIDEO_MODE};
use crate::machine::{Machine, VideoAdapterType};
use crate::state::CursorType;

/// Highest standard (non-VESA) BIOS video mode
const LAST_STANDARD_MODE: u8 = 0x13;

/// Movement range class of a standard BIOS video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModeRange {
    /// 40 column text, one virtual pixel per half character
    Text40,
    /// 80 column text
    Text80,
    /// Fixed virtual screen; `coarse_x` drops the lowest X bit
    Graphics { max_x: i16, max_y: i16, coarse_x: bool },
    /// Not a mode the driver knows about
    Unknown,
}

pub(crate) fn classify_mode(mode: u8) -> ModeRange {
    match mode {
        0x00 | 0x01 => ModeRange::Text40,
        0x02 | 0x03 | 0x07 => ModeRange::Text80,
        0x0D | 0x13 => ModeRange::Graphics {
            max_x: 639,
            max_y: 199,
            coarse_x: true,
        },
        0x04 | 0x05 | 0x06 | 0x08 | 0x09 | 0x0A | 0x0E => ModeRange::Graphics {
            max_x: 639,
            max_y: 199,
            coarse_x: false,
        },
        0x0F | 0x10 => ModeRange::Graphics {
            max_x: 639,
            max_y: 349,
            coarse_x: false,
        },
        0x11 | 0x12 => ModeRange::Graphics {
            max_x: 639,
            max_y: 479,
            coarse_x: false,
        },
        _ => ModeRange::Unknown,
    }
}

/// Text screen size as recorded by the BIOS, with sane fallbacks
fn text_max<M: Machine>(m: &M) -> (i16, i16) {
    let sanitize = |value: u16, fallback: u16| {
        if (1..=250).contains(&value) {
            value
        } else {
            fallback
        }
    };
    let columns = sanitize(m.text_columns(), 80);
    let rows = sanitize(m.text_rows(), 25);
    (8 * columns as i16 - 1, 8 * rows as i16 - 1)
}

impl MouseDriver {
    /// Called by the video BIOS before it switches modes
    pub fn before_new_video_mode<M: Machine>(&mut self, m: &mut M) {
        if m.current_mode().is_text {
            self.restore_cursor_background_text(m);
        } else {
            self.restore_cursor_background(m);
        }

        let state = self.state;
        state.set_hidden(m, 1);
        state.set_old_hidden(m, 1);
        state.set_background_enabled(m, false);
    }

    /// Called by the video BIOS after a mode switch; `is_mode_changing` is
    /// set when the call comes from the BIOS itself rather than a reset
    pub fn after_new_video_mode<M: Machine>(&mut self, m: &mut M, is_mode_changing: bool) {
        let state = self.state;
        let bios_mode = m.read_u8(BIOS_VIDEO_MODE);
        let is_text = m.current_mode().is_text;

        let is_svga_mode = m.video_adapter() == VideoAdapterType::Vga && bios_mode > LAST_STANDARD_MODE;
        let is_svga_text = is_svga_mode && is_text;

        // The guest may have been in the middle of a drag
        self.events.clear_pending_events(m);

        state.set_bios_screen_mode(m, bios_mode);
        state.set_granularity_x(m, 0xFFFF);
        state.set_granularity_y(m, 0xFFFF);
        state.set_hot_x(m, 0);
        state.set_hot_y(m, 0);
        state.set_user_screen_mask(m, false);
        state.set_user_cursor_mask(m, false);
        state.set_text_mask_and(m, 0x77FF);
        state.set_text_mask_xor(m, 0x7700);
        state.set_page(m, 0);
        state.set_update_region_y2(m, -1);
        state.set_cursor_type(m, CursorType::Software);
        state.set_enabled(m, true);
        state.set_inhibit_draw(m, false);

        // Graphical SVGA modes keep the range the guest programmed; some
        // drawing libraries set it up before switching
        if is_mode_changing && is_svga_mode && !is_svga_text {
            return;
        }

        state.set_min_pos_x(m, 0);
        state.set_min_pos_y(m, 0);

        let (max_x, max_y) = if is_svga_text {
            state.set_granularity_x(m, 0xFFF8);
            state.set_granularity_y(m, 0xFFF8);
            text_max(m)
        } else if is_svga_mode {
            let mode = m.current_mode();
            (mode.swidth as i16 - 1, mode.sheight as i16 - 1)
        } else {
            match classify_mode(bios_mode) {
                ModeRange::Text40 => {
                    state.set_granularity_x(m, 0xFFF0);
                    state.set_granularity_y(m, 0xFFF8);
                    let (max_x, max_y) = text_max(m);
                    (max_x * 2 + 1, max_y)
                }
                ModeRange::Text80 => {
                    state.set_granularity_x(m, 0xFFF8);
                    state.set_granularity_y(m, 0xFFF8);
                    text_max(m)
                }
                ModeRange::Graphics { max_x, max_y, coarse_x } => {
                    if coarse_x {
                        state.set_granularity_x(m, 0xFFFE);
                    }
                    (max_x, max_y)
                }
                ModeRange::Unknown => {
                    log(LogCategory::Driver, LogLevel::Warn, || {
                        format!("unknown video mode {:02X}h, cursor drawing disabled", bios_mode)
                    });
                    state.set_inhibit_draw(m, true);
                    (639, 479)
                }
            }
        };

        state.set_max_pos_x(m, max_x);
        state.set_max_pos_y(m, max_y);

        log(LogCategory::Driver, LogLevel::Debug, || {
            format!("video mode {:02X}h, range 0..{} x 0..{}", bios_mode, max_x, max_y)
        });
    }
}
