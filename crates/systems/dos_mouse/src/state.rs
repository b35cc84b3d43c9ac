//! Guest-resident driver state record.
//!
//! The driver keeps every persistent value in one block of conventional
//! memory allocated at install time. The block has a fixed byte layout:
//!
//! | offset | contents                                          |
//! |--------|---------------------------------------------------|
//! | 0      | Windows/386 flags                                 |
//! | 2      | Windows/386 startup info block                    |
//! | 20     | Windows/386 instance data table (2 entries)       |
//! | 32     | driver instance data (saved/restored by 16h/17h)  |
//!
//! [`DriverState`] only remembers the segment; each accessor performs a
//! typed guest memory access at the field's offset. Floats are stored as
//! their IEEE-754 bit pattern, far pointers as offset word then segment word.

use emu_core::memory::{paragraphs_for, physical};
use emu_core::{GuestMemory, RealPtr};
use serde::{Deserialize, Serialize};

use crate::machine::DosServices;
use crate::MouseError;

/// Total size of the record in bytes
pub const STATE_SIZE: u16 = 498;
/// Start of the Windows/386 startup info block
pub const WIN386_STARTUP_OFFSET: u16 = 2;
/// Start of the Windows/386 instance data table
pub const WIN386_INSTANCES_OFFSET: u16 = 20;
/// Start of the instance data, which runs to the end of the record
pub const INSTANCE_OFFSET: u16 = 32;
/// Size of the blob handled by INT 33h functions 15h/16h/17h
pub const INSTANCE_SIZE: u16 = STATE_SIZE - INSTANCE_OFFSET;

pub const NUM_BUTTONS: usize = 3;
/// Graphics cursor is `CURSOR_SIZE` x `CURSOR_SIZE` pixels
pub const CURSOR_SIZE: usize = 16;

/// How the cursor is rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CursorType {
    /// Attribute AND/XOR in text modes, bitmap in graphics modes
    #[default]
    Software = 0,
    /// CRTC text cursor
    Hardware = 1,
    /// Set by function 09h, drawn like a software cursor
    Text = 2,
}

impl CursorType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => CursorType::Hardware,
            2 => CursorType::Text,
            _ => CursorType::Software,
        }
    }
}

/// Values that can live in the record
pub trait StateValue: Copy {
    const SIZE: u16;
    const ALIGN: u16;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self;
    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32);
}

impl StateValue for u8 {
    const SIZE: u16 = 1;
    const ALIGN: u16 = 1;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        mem.read_u8(addr)
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u8(addr, self);
    }
}

impl StateValue for bool {
    const SIZE: u16 = 1;
    const ALIGN: u16 = 1;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        mem.read_u8(addr) != 0
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u8(addr, self as u8);
    }
}

impl StateValue for CursorType {
    const SIZE: u16 = 1;
    const ALIGN: u16 = 1;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        CursorType::from_u8(mem.read_u8(addr))
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u8(addr, self as u8);
    }
}

impl StateValue for u16 {
    const SIZE: u16 = 2;
    const ALIGN: u16 = 2;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        mem.read_u16(addr)
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u16(addr, self);
    }
}

impl StateValue for i16 {
    const SIZE: u16 = 2;
    const ALIGN: u16 = 2;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        mem.read_u16(addr) as i16
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u16(addr, self as u16);
    }
}

impl StateValue for f32 {
    const SIZE: u16 = 4;
    const ALIGN: u16 = 4;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        f32::from_bits(mem.read_u32(addr))
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u32(addr, self.to_bits());
    }
}

impl StateValue for RealPtr {
    const SIZE: u16 = 4;
    // The startup and instance tables are packed
    const ALIGN: u16 = 2;

    fn load<M: GuestMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        RealPtr(mem.read_u32(addr))
    }

    fn store<M: GuestMemory + ?Sized>(self, mem: &mut M, addr: u32) {
        mem.write_u32(addr, self.0);
    }
}

/// Handle to the driver record in guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverState {
    segment: u16,
}

/// Generates a getter/setter pair per field, plus compile-time layout checks
macro_rules! scalar_fields {
    ($($(#[$doc:meta])* $get:ident, $set:ident: $ty:ty = $offset:literal;)*) => {
        impl DriverState {
            $(
                $(#[$doc])*
                pub fn $get<M: GuestMemory + ?Sized>(&self, mem: &M) -> $ty {
                    <$ty as StateValue>::load(mem, self.field_addr($offset))
                }

                pub fn $set<M: GuestMemory + ?Sized>(&self, mem: &mut M, value: $ty) {
                    value.store(mem, self.field_addr($offset));
                }
            )*
        }

        const _: () = {
            $(
                assert!(
                    $offset % <$ty as StateValue>::ALIGN == 0,
                    concat!("misaligned driver state field ", stringify!($get))
                );
                assert!(
                    $offset + <$ty as StateValue>::SIZE <= STATE_SIZE,
                    concat!("driver state field out of range ", stringify!($get))
                );
            )*
        };

        #[cfg(test)]
        const SCALAR_LAYOUT: &[(&str, u16, u16)] = &[
            $((stringify!($get), $offset, <$ty as StateValue>::SIZE)),*
        ];
    };
}

/// Like `scalar_fields!`, for fixed-size arrays addressed by index
macro_rules! array_fields {
    ($($(#[$doc:meta])* $get:ident, $set:ident: [$ty:ty; $len:expr] = $offset:literal;)*) => {
        impl DriverState {
            $(
                $(#[$doc])*
                pub fn $get<M: GuestMemory + ?Sized>(&self, mem: &M, idx: usize) -> $ty {
                    let addr = self.element_addr($offset, <$ty as StateValue>::SIZE, $len, idx);
                    <$ty as StateValue>::load(mem, addr)
                }

                pub fn $set<M: GuestMemory + ?Sized>(&self, mem: &mut M, idx: usize, value: $ty) {
                    let addr = self.element_addr($offset, <$ty as StateValue>::SIZE, $len, idx);
                    value.store(mem, addr);
                }
            )*
        }

        const _: () = {
            $(
                assert!(
                    $offset % <$ty as StateValue>::ALIGN == 0,
                    concat!("misaligned driver state array ", stringify!($get))
                );
                assert!(
                    $offset + <$ty as StateValue>::SIZE * ($len as u16) <= STATE_SIZE,
                    concat!("driver state array out of range ", stringify!($get))
                );
            )*
        };

        #[cfg(test)]
        const ARRAY_LAYOUT: &[(&str, u16, u16)] = &[
            $((stringify!($get), $offset, <$ty as StateValue>::SIZE * ($len as u16))),*
        ];
    };
}

scalar_fields! {
    /// Windows/386 enhanced mode is running
    win386_running, set_win386_running: bool = 0;
    /// Windows draws the cursor itself
    win386_drawing_cursor, set_win386_drawing_cursor: bool = 1;

    startup_version_minor, set_startup_version_minor: u8 = 2;
    startup_version_major, set_startup_version_major: u8 = 3;
    startup_next_info, set_startup_next_info: RealPtr = 4;
    startup_device_driver, set_startup_device_driver: RealPtr = 8;
    startup_device_driver_data, set_startup_device_driver_data: RealPtr = 12;
    startup_instance_data, set_startup_instance_data: RealPtr = 16;
    instance0_data, set_instance0_data: RealPtr = 20;
    instance0_size, set_instance0_size: u16 = 24;
    instance1_data, set_instance1_data: RealPtr = 26;
    instance1_size, set_instance1_size: u16 = 30;

    mickeys_per_pixel_x, set_mickeys_per_pixel_x: f32 = 32;
    mickeys_per_pixel_y, set_mickeys_per_pixel_y: f32 = 36;
    pixels_per_mickey_x, set_pixels_per_mickey_x: f32 = 40;
    pixels_per_mickey_y, set_pixels_per_mickey_y: f32 = 44;
    /// Derived from `sensitivity_x`, recomputed on every sensitivity change
    sensitivity_coeff_x, set_sensitivity_coeff_x: f32 = 48;
    sensitivity_coeff_y, set_sensitivity_coeff_y: f32 = 52;

    /// Sub-pixel cursor position
    absolute_x, set_absolute_x: f32 = 56;
    absolute_y, set_absolute_y: f32 = 60;
    /// Accumulated motion, wraps like a signed 16-bit counter
    mickey_counter_x, set_mickey_counter_x: f32 = 64;
    mickey_counter_y, set_mickey_counter_y: f32 = 68;

    last_wheel_moved_x, set_last_wheel_moved_x: u16 = 108;
    last_wheel_moved_y, set_last_wheel_moved_y: u16 = 110;

    enabled, set_enabled: bool = 112;
    /// CuteMouse WheelAPI activated by function 11h
    wheel_api, set_wheel_api: bool = 113;
    /// Mickeys per second
    double_speed_threshold, set_double_speed_threshold: u16 = 114;
    /// Masks applied to the reported position
    granularity_x, set_granularity_x: u16 = 116;
    granularity_y, set_granularity_y: u16 = 118;

    /// Region (function 10h) where the guest manages the screen itself
    update_region_x1, set_update_region_x1: i16 = 120;
    update_region_y1, set_update_region_y1: i16 = 122;
    update_region_x2, set_update_region_x2: i16 = 124;
    update_region_y2, set_update_region_y2: i16 = 126;

    language, set_language: u16 = 128;
    bios_screen_mode, set_bios_screen_mode: u8 = 130;
    /// Raw 0..=100 sensitivity values
    sensitivity_x, set_sensitivity_x: u8 = 131;
    sensitivity_y, set_sensitivity_y: u8 = 132;
    /// Third sensitivity value of functions 1Ah/1Bh, stored but unused
    unknown_01, set_unknown_01: u8 = 133;

    min_pos_x, set_min_pos_x: i16 = 134;
    max_pos_x, set_max_pos_x: i16 = 136;
    min_pos_y, set_min_pos_y: i16 = 138;
    max_pos_y, set_max_pos_y: i16 = 140;

    /// Display page the graphics cursor is drawn on
    page, set_page: u8 = 142;
    inhibit_draw, set_inhibit_draw: bool = 143;
    /// Cursor is drawn only while this is zero
    hidden, set_hidden: u16 = 144;
    old_hidden, set_old_hidden: u16 = 146;
    clip_x, set_clip_x: i16 = 148;
    clip_y, set_clip_y: i16 = 150;
    hot_x, set_hot_x: i16 = 152;
    hot_y, set_hot_y: i16 = 154;
    cursor_type, set_cursor_type: CursorType = 156;

    /// `background_data` holds pixels (or a char/attr pair) under the cursor
    background_enabled, set_background_enabled: bool = 157;
    background_x, set_background_x: u16 = 158;
    background_y, set_background_y: u16 = 160;

    text_mask_and, set_text_mask_and: u16 = 418;
    text_mask_xor, set_text_mask_xor: u16 = 420;
    user_screen_mask, set_user_screen_mask: bool = 422;
    user_cursor_mask, set_user_cursor_mask: bool = 423;

    callback_return_segment, set_callback_return_segment: u16 = 488;
    callback_return_offset, set_callback_return_offset: u16 = 490;
    user_callback_segment, set_user_callback_segment: u16 = 492;
    user_callback_offset, set_user_callback_offset: u16 = 494;
    /// Event types (see `MouseEventId`) the user callback wants
    user_callback_mask, set_user_callback_mask: u16 = 496;
}

array_fields! {
    times_pressed, set_times_pressed: [u16; NUM_BUTTONS] = 72;
    times_released, set_times_released: [u16; NUM_BUTTONS] = 78;
    last_pressed_x, set_last_pressed_x: [u16; NUM_BUTTONS] = 84;
    last_pressed_y, set_last_pressed_y: [u16; NUM_BUTTONS] = 90;
    last_released_x, set_last_released_x: [u16; NUM_BUTTONS] = 96;
    last_released_y, set_last_released_y: [u16; NUM_BUTTONS] = 102;
    background_data, set_background_data: [u8; CURSOR_SIZE * CURSOR_SIZE] = 162;
    user_screen_mask_data, set_user_screen_mask_data: [u16; CURSOR_SIZE] = 424;
    user_cursor_mask_data, set_user_cursor_mask_data: [u16; CURSOR_SIZE] = 456;
}

impl DriverState {
    /// Wrap an already allocated record
    pub fn at(segment: u16) -> Self {
        Self { segment }
    }

    /// Allocate the record from DOS memory and write the defaults
    pub fn allocate<M: GuestMemory + DosServices>(m: &mut M) -> Result<Self, MouseError> {
        let paragraphs = paragraphs_for(STATE_SIZE as usize);
        let segment = m
            .allocate_paragraphs(paragraphs)
            .filter(|&segment| segment != 0)
            .ok_or(MouseError::OutOfGuestMemory {
                paragraphs,
                purpose: "driver state",
            })?;

        let state = Self::at(segment);
        state.initialize(m);
        Ok(state)
    }

    pub fn segment(&self) -> u16 {
        self.segment
    }

    /// Far pointer to byte `offset` of the record
    pub fn ptr(&self, offset: u16) -> RealPtr {
        RealPtr::new(self.segment, offset)
    }

    fn field_addr(&self, offset: u16) -> u32 {
        physical(self.segment, offset)
    }

    fn element_addr(&self, offset: u16, size: u16, len: usize, idx: usize) -> u32 {
        debug_assert!(idx < len, "driver state index {} out of bounds ({})", idx, len);
        let idx = idx.min(len - 1) as u16;
        self.field_addr(offset + idx * size)
    }

    /// Write the power-on defaults over the whole record
    pub fn initialize<M: GuestMemory + ?Sized>(&self, mem: &mut M) {
        mem.block_write(self.field_addr(0), &[0u8; STATE_SIZE as usize]);

        // Everything else defaults to zero / false / Software cursor
        self.clear_windows_struct(mem);
        self.set_unknown_01(mem, 50);
        self.set_cursor_type(mem, CursorType::Software);
    }

    /// Zero the Windows/386 startup block and instance table
    pub fn clear_windows_struct<M: GuestMemory + ?Sized>(&self, mem: &mut M) {
        let len = (INSTANCE_OFFSET - WIN386_STARTUP_OFFSET) as usize;
        mem.block_write(self.field_addr(WIN386_STARTUP_OFFSET), &vec![0u8; len]);
    }

    /// Fill in the Windows/386 startup block, chained to `link`, and return
    /// its address
    pub fn setup_windows_struct<M: GuestMemory + ?Sized>(&self, mem: &mut M, link: RealPtr) -> RealPtr {
        self.set_startup_version_minor(mem, 0);
        self.set_startup_version_major(mem, 3);
        self.set_startup_next_info(mem, link);
        self.set_startup_device_driver(mem, RealPtr::NULL);
        self.set_startup_device_driver_data(mem, self.ptr(WIN386_INSTANCES_OFFSET));
        self.set_startup_instance_data(mem, RealPtr::NULL);

        // The whole record is instance data, the second entry terminates
        self.set_instance0_data(mem, self.ptr(0));
        self.set_instance0_size(mem, STATE_SIZE);
        self.set_instance1_data(mem, RealPtr::NULL);
        self.set_instance1_size(mem, 0);

        self.ptr(WIN386_STARTUP_OFFSET)
    }

    pub fn user_callback<M: GuestMemory + ?Sized>(&self, mem: &M) -> RealPtr {
        RealPtr::new(self.user_callback_segment(mem), self.user_callback_offset(mem))
    }

    pub fn set_user_callback<M: GuestMemory + ?Sized>(&self, mem: &mut M, ptr: RealPtr) {
        self.set_user_callback_segment(mem, ptr.segment());
        self.set_user_callback_offset(mem, ptr.offset());
    }

    pub fn callback_return<M: GuestMemory + ?Sized>(&self, mem: &M) -> RealPtr {
        RealPtr::new(self.callback_return_segment(mem), self.callback_return_offset(mem))
    }

    pub fn set_callback_return<M: GuestMemory + ?Sized>(&self, mem: &mut M, ptr: RealPtr) {
        self.set_callback_return_segment(mem, ptr.segment());
        self.set_callback_return_offset(mem, ptr.offset());
    }

    pub fn screen_mask<M: GuestMemory + ?Sized>(&self, mem: &M) -> [u16; CURSOR_SIZE] {
        std::array::from_fn(|idx| self.user_screen_mask_data(mem, idx))
    }

    pub fn set_screen_mask<M: GuestMemory + ?Sized>(&self, mem: &mut M, mask: &[u16; CURSOR_SIZE]) {
        for (idx, &word) in mask.iter().enumerate() {
            self.set_user_screen_mask_data(mem, idx, word);
        }
    }

    pub fn cursor_mask<M: GuestMemory + ?Sized>(&self, mem: &M) -> [u16; CURSOR_SIZE] {
        std::array::from_fn(|idx| self.user_cursor_mask_data(mem, idx))
    }

    pub fn set_cursor_mask<M: GuestMemory + ?Sized>(&self, mem: &mut M, mask: &[u16; CURSOR_SIZE]) {
        for (idx, &word) in mask.iter().enumerate() {
            self.set_user_cursor_mask_data(mem, idx, word);
        }
    }

    /// Copy the instance data to guest address `dest`
    pub fn save_instance<M: GuestMemory + ?Sized>(&self, mem: &mut M, dest: u32) {
        let mut blob = vec![0u8; INSTANCE_SIZE as usize];
        mem.block_read(self.field_addr(INSTANCE_OFFSET), &mut blob);
        mem.block_write(dest, &blob);
    }

    /// Overwrite the instance data from guest address `src`
    pub fn load_instance<M: GuestMemory + ?Sized>(&self, mem: &mut M, src: u32) {
        let mut blob = vec![0u8; INSTANCE_SIZE as usize];
        mem.block_read(src, &mut blob);
        mem.block_write(self.field_addr(INSTANCE_OFFSET), &blob);
    }
}
