//! Software cursor rendering.
//!
//! In text modes the cell under the cursor is saved and rewritten with the
//! AND/XOR attribute masks, or the CRTC hardware cursor is moved. In
//! graphics modes a 16x16 block of pixels is saved and the cursor bitmap is
//! composed over it. Every draw first restores what the previous one saved.

use emu_core::logging::{log, LogCategory, LogLevel};

use crate::driver::MouseDriver;
use crate::machine::{Machine, VideoAdapterType};
use crate::state::{CursorType, CURSOR_SIZE};

const VGAREG_SEQU_ADDRESS: u16 = 0x3C4;
const VGAREG_SEQU_DATA: u16 = 0x3C5;
const VGAREG_GRDC_ADDRESS: u16 = 0x3CE;
const VGAREG_GRDC_DATA: u16 = 0x3CF;

/// Sequencer map mask register
const SEQU_MAP_MASK: u8 = 2;
/// Graphics controller registers saved around a draw
const GRDC_SAVED_REGS: usize = 9;

/// BIOS data area: active display page
const BDA_CURRENT_PAGE: u32 = 0x462;
/// BIOS data area: screen columns
const BDA_SCREEN_COLUMNS: u32 = 0x44A;
/// BIOS data area: bytes per display page
const BDA_PAGE_SIZE: u32 = 0x44C;
/// BIOS data area: CRTC index port
const BDA_CRTC_ADDRESS: u32 = 0x463;

/// CRTC cursor location high/low registers
const CRTC_CURSOR_HIGH: u8 = 0x0E;
const CRTC_CURSOR_LOW: u8 = 0x0F;

pub const DEFAULT_SCREEN_MASK: [u16; CURSOR_SIZE] = [
    0x3FFF, 0x1FFF, 0x0FFF, 0x07FF, 0x03FF, 0x01FF, 0x00FF, 0x007F, //
    0x003F, 0x001F, 0x01FF, 0x00FF, 0x30FF, 0xF87F, 0xF87F, 0xFCFF,
];

pub const DEFAULT_CURSOR_MASK: [u16; CURSOR_SIZE] = [
    0x0000, 0x4000, 0x6000, 0x7000, 0x7800, 0x7C00, 0x7E00, 0x7F00, //
    0x7F80, 0x7C00, 0x6C00, 0x4600, 0x0600, 0x0300, 0x0300, 0x0000,
];

/// VGA/EGA register state that drawing through the BIOS would clobber
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VgaRegisterSave {
    sequ_address: u8,
    sequ_data: u8,
    grdc: [u8; GRDC_SAVED_REGS],
}

/// Visible part of the 16x16 cursor block after clipping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClipRect {
    x1: i16,
    y1: i16,
    x2: i16,
    y2: i16,
    /// Columns cut off on the left
    addx1: u16,
    /// Columns cut off on the right
    addx2: u16,
    /// Rows cut off at the top
    addy: u16,
}

fn clip_cursor_area(x: i16, y: i16, clip_x: i16, clip_y: i16) -> ClipRect {
    let size = CURSOR_SIZE as i16;
    let mut rect = ClipRect {
        x1: x,
        y1: y,
        x2: x.wrapping_add(size - 1),
        y2: y.wrapping_add(size - 1),
        addx1: 0,
        addx2: 0,
        addy: 0,
    };

    if rect.x1 < 0 {
        rect.addx1 = rect.x1.unsigned_abs();
        rect.x1 = 0;
    }
    if rect.x2 > clip_x {
        rect.addx2 = (rect.x2 - clip_x) as u16;
        rect.x2 = clip_x;
    }
    if rect.y1 < 0 {
        rect.addy = rect.y1.unsigned_abs();
        rect.y1 = 0;
    }
    if rect.y2 > clip_y {
        rect.y2 = clip_y;
    }
    rect
}

/// Shift that yields 0 once every bit has been shifted out
fn shl16(mask: u16, bits: u16) -> u16 {
    if bits >= 16 {
        0
    } else {
        mask << bits
    }
}

impl MouseDriver {
    fn save_vga_registers<M: Machine>(&mut self, m: &mut M) {
        match m.video_adapter() {
            VideoAdapterType::Vga => {
                for (idx, reg) in self.vga_regs.grdc.iter_mut().enumerate() {
                    m.io_write(VGAREG_GRDC_ADDRESS, idx as u8);
                    *reg = m.io_read(VGAREG_GRDC_DATA);
                }

                // Set/reset off, write mode 0
                m.io_write(VGAREG_GRDC_ADDRESS, 3);
                m.io_write(VGAREG_GRDC_DATA, 0);
                m.io_write(VGAREG_GRDC_ADDRESS, 5);
                m.io_write(VGAREG_GRDC_DATA, self.vga_regs.grdc[5] & 0xF0);

                self.vga_regs.sequ_address = m.io_read(VGAREG_SEQU_ADDRESS);
                m.io_write(VGAREG_SEQU_ADDRESS, SEQU_MAP_MASK);
                self.vga_regs.sequ_data = m.io_read(VGAREG_SEQU_DATA);
                m.io_write(VGAREG_SEQU_DATA, 0x0F);
            }
            VideoAdapterType::Ega => {
                // Registers are write-only, just enable all planes
                m.io_write(VGAREG_SEQU_ADDRESS, SEQU_MAP_MASK);
                m.io_write(VGAREG_SEQU_DATA, 0x0F);
            }
            _ => {}
        }
    }

    fn restore_vga_registers<M: Machine>(&mut self, m: &mut M) {
        if m.video_adapter() != VideoAdapterType::Vga {
            return;
        }

        for (idx, &reg) in self.vga_regs.grdc.iter().enumerate() {
            m.io_write(VGAREG_GRDC_ADDRESS, idx as u8);
            m.io_write(VGAREG_GRDC_DATA, reg);
        }

        m.io_write(VGAREG_SEQU_ADDRESS, SEQU_MAP_MASK);
        m.io_write(VGAREG_SEQU_DATA, self.vga_regs.sequ_data);
        m.io_write(VGAREG_SEQU_ADDRESS, self.vga_regs.sequ_address);
    }

    /// Put back the character cell saved by the last text cursor draw
    pub(crate) fn restore_cursor_background_text<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        if state.hidden(m) != 0 || state.inhibit_draw(m) {
            return;
        }

        if state.background_enabled(m) {
            let page = m.read_u8(BDA_CURRENT_PAGE);
            let (col, row) = (state.background_x(m), state.background_y(m));
            let chr = state.background_data(m, 0);
            let attr = state.background_data(m, 1);
            m.write_char(col, row, page, chr, attr);
            state.set_background_enabled(m, false);
        }
    }

    fn draw_cursor_text<M: Machine>(&mut self, m: &mut M) {
        self.restore_cursor_background_text(m);

        let state = self.state;
        let (pos_x, pos_y) = (self.pos_x(m) as i32, self.pos_y(m) as i32);

        // The guest is redrawing this part of the screen itself
        let in_update_region = pos_x >= state.update_region_x1(m) as i32
            && pos_x <= state.update_region_x2(m) as i32
            && pos_y >= state.update_region_y1(m) as i32
            && pos_y <= state.update_region_y2(m) as i32;
        if in_update_region {
            return;
        }

        let mut col = pos_x as u16 / 8;
        if state.bios_screen_mode(m) < 2 {
            col /= 2;
        }
        let row = pos_y as u16 / 8;
        let page = m.read_u8(BDA_CURRENT_PAGE);

        state.set_background_x(m, col);
        state.set_background_y(m, row);

        if state.cursor_type(m) == CursorType::Hardware {
            // Offset in character cells from the start of video memory
            let page_size = m.read_u16(BDA_PAGE_SIZE);
            let columns = m.read_u16(BDA_SCREEN_COLUMNS);
            let address = (page as u16)
                .wrapping_mul(page_size)
                .wrapping_add(row.wrapping_mul(columns).wrapping_add(col).wrapping_mul(2))
                / 2;

            let crtc = m.read_u16(BDA_CRTC_ADDRESS);
            m.io_write(crtc, CRTC_CURSOR_HIGH);
            m.io_write(crtc.wrapping_add(1), (address >> 8) as u8);
            m.io_write(crtc, CRTC_CURSOR_LOW);
            m.io_write(crtc.wrapping_add(1), address as u8);
            return;
        }

        let cell = m.read_char_attr(col, row, page);
        state.set_background_data(m, 0, cell as u8);
        state.set_background_data(m, 1, (cell >> 8) as u8);
        state.set_background_enabled(m, true);

        let cell = (cell & state.text_mask_and(m)) ^ state.text_mask_xor(m);
        m.write_char(col, row, page, cell as u8, (cell >> 8) as u8);
    }

    /// Put back the pixels saved by the last graphics cursor draw
    pub(crate) fn restore_cursor_background<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        if state.hidden(m) != 0 || state.inhibit_draw(m) || !state.background_enabled(m) {
            return;
        }

        self.save_vga_registers(m);

        let (x, y) = (state.background_x(m) as i16, state.background_y(m) as i16);
        let rect = clip_cursor_area(x, y, state.clip_x(m), state.clip_y(m));
        let page = state.page(m);

        let mut data_pos = rect.addy.wrapping_mul(CURSOR_SIZE as u16);
        for y in rect.y1..=rect.y2 {
            data_pos = data_pos.wrapping_add(rect.addx1);
            for x in rect.x1..=rect.x2 {
                let color = state.background_data(m, data_pos as usize);
                m.put_pixel(x as u16, y as u16, page, color);
                data_pos = data_pos.wrapping_add(1);
            }
            data_pos = data_pos.wrapping_add(rect.addx2);
        }
        state.set_background_enabled(m, false);

        self.restore_vga_registers(m);
    }

    /// Draw the cursor at the current position, if it is visible
    pub(crate) fn draw_cursor<M: Machine>(&mut self, m: &mut M) {
        let state = self.state;
        if state.hidden(m) != 0 || state.inhibit_draw(m) {
            return;
        }

        let mode = m.current_mode();
        if mode.is_text {
            self.draw_cursor_text(m);
            return;
        }

        let clip_x = mode.swidth as i16 - 1;
        let clip_y = mode.sheight as i16 - 1;
        state.set_clip_x(m, clip_x);
        state.set_clip_y(m, clip_y);

        // Virtual X is 640 wide regardless of the real width
        let xratio = if mode.swidth == 0 {
            1
        } else {
            (640 / mode.swidth as i32).max(1)
        };

        self.restore_cursor_background(m);
        self.save_vga_registers(m);

        let x = (self.pos_x(m) as i32 / xratio - state.hot_x(m) as i32) as i16;
        let y = (self.pos_y(m) as i32 - state.hot_y(m) as i32) as i16;
        let rect = clip_cursor_area(x, y, clip_x, clip_y);
        let page = state.page(m);

        // Save the background
        let mut data_pos = rect.addy.wrapping_mul(CURSOR_SIZE as u16);
        for py in rect.y1..=rect.y2 {
            data_pos = data_pos.wrapping_add(rect.addx1);
            for px in rect.x1..=rect.x2 {
                let color = m.get_pixel(px as u16, py as u16, page);
                state.set_background_data(m, data_pos as usize, color);
                data_pos = data_pos.wrapping_add(1);
            }
            data_pos = data_pos.wrapping_add(rect.addx2);
        }
        state.set_background_enabled(m, true);
        state.set_background_x(m, x as u16);
        state.set_background_y(m, y as u16);

        let screen_mask = if state.user_screen_mask(m) {
            state.screen_mask(m)
        } else {
            DEFAULT_SCREEN_MASK
        };
        let cursor_mask = if state.user_cursor_mask(m) {
            state.cursor_mask(m)
        } else {
            DEFAULT_CURSOR_MASK
        };

        // Compose the cursor over the saved background
        let mut data_pos = rect.addy.wrapping_mul(CURSOR_SIZE as u16);
        for py in rect.y1..=rect.y2 {
            let row = (rect.addy as usize + (py - rect.y1) as usize).min(CURSOR_SIZE - 1);
            let mut sc_mask = shl16(screen_mask[row], rect.addx1);
            let mut cu_mask = shl16(cursor_mask[row], rect.addx1);
            data_pos = data_pos.wrapping_add(rect.addx1);

            for px in rect.x1..=rect.x2 {
                let mut color = 0u8;
                if sc_mask & 0x8000 != 0 {
                    color = state.background_data(m, data_pos as usize);
                }
                if cu_mask & 0x8000 != 0 {
                    color ^= 0x0F;
                }
                sc_mask <<= 1;
                cu_mask <<= 1;
                m.put_pixel(px as u16, py as u16, page, color);
                data_pos = data_pos.wrapping_add(1);
            }
            data_pos = data_pos.wrapping_add(rect.addx2);
        }

        self.restore_vga_registers(m);

        log(LogCategory::Cursor, LogLevel::Trace, || format!("graphics cursor at {},{}", x, y));
    }
}
