//! In-memory PC implementing every trait the driver needs.
//!
//! Used by the tests and the benchmark, and usable as a starting point when
//! wiring the driver into a real machine: it shows which BIOS data area
//! fields the driver reads and how the delay timer has to be reported back.

use std::collections::HashMap;

use emu_core::memory::physical;
use emu_core::{FlatMemory, GuestMemory, RealPtr, IRQ_PS2_MOUSE};

use crate::driver::MouseDriver;
use crate::machine::{
    CallbackKind, Cpu, DosServices, HostMouse, Pic, Registers, TimerEvent, VideoAdapterType, VideoBios, VideoModeInfo,
};

const BDA_VIDEO_MODE: u32 = 0x449;
const BDA_SCREEN_COLUMNS: u32 = 0x44A;
const BDA_PAGE_SIZE: u32 = 0x44C;
const BDA_CURRENT_PAGE: u32 = 0x462;
const BDA_CRTC_ADDRESS: u32 = 0x463;
const BDA_SCREEN_ROWS: u32 = 0x484;

/// First segment handed out by the paragraph allocator
const FIRST_FREE_SEGMENT: u16 = 0x0C00;
/// End of conventional memory
const TOP_OF_MEMORY: u16 = 0xA000;
/// Where callbacks without a fixed location are placed
const CALLBACK_SEGMENT: u16 = 0xF100;
/// Bytes reserved per callback stub
const CALLBACK_STUB_SIZE: u16 = 4;

/// Indexed VGA register file (address port, data port)
#[derive(Debug, Clone, Default)]
struct IndexedRegisters {
    index: u8,
    regs: Vec<u8>,
}

impl IndexedRegisters {
    fn new(count: usize) -> Self {
        Self {
            index: 0,
            regs: vec![0; count],
        }
    }

    fn read(&self) -> u8 {
        self.regs.get(self.index as usize).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, val: u8) {
        if let Some(reg) = self.regs.get_mut(self.index as usize) {
            *reg = val;
        }
    }
}

/// Headless PC: memory, registers, PIC, video BIOS, DOS and host mouse
pub struct HeadlessMachine {
    pub memory: FlatMemory,
    pub regs: Registers,
    pub adapter: VideoAdapterType,
    pub mode: VideoModeInfo,

    /// IRQs asserted since the last [`HeadlessMachine::take_irqs`]
    irqs: Vec<u8>,
    /// Emulated milliseconds since power on
    now_ms: u64,
    timers: Vec<(TimerEvent, u64)>,

    pixels: HashMap<(u8, u16, u16), u8>,
    pub cursor_shape: Option<(u8, u8)>,

    ports: HashMap<u16, u8>,
    grdc: IndexedRegisters,
    sequencer: IndexedRegisters,
    crtc: IndexedRegisters,

    next_segment: u16,
    memory_limit: u16,
    callbacks: HashMap<CallbackKind, RealPtr>,
    next_callback_offset: u16,

    pub host_resolution: (u32, u32),
    pub interface_rate_hz: u16,
    /// Every rate passed to [`HostMouse::notify_interface_rate`]
    pub rate_notifications: Vec<u16>,
}

impl Default for HeadlessMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessMachine {
    /// VGA machine in 80x25 color text mode
    pub fn new() -> Self {
        let mut machine = Self {
            memory: FlatMemory::new(),
            regs: Registers {
                ss: 0x9000,
                sp: 0xFFF0,
                ..Default::default()
            },
            adapter: VideoAdapterType::Vga,
            mode: VideoModeInfo {
                is_text: true,
                swidth: 640,
                sheight: 200,
            },
            irqs: Vec::new(),
            now_ms: 0,
            timers: Vec::new(),
            pixels: HashMap::new(),
            cursor_shape: None,
            ports: HashMap::new(),
            grdc: IndexedRegisters::new(9),
            sequencer: IndexedRegisters::new(5),
            crtc: IndexedRegisters::new(0x19),
            next_segment: FIRST_FREE_SEGMENT,
            memory_limit: TOP_OF_MEMORY - FIRST_FREE_SEGMENT,
            callbacks: HashMap::new(),
            next_callback_offset: 0,
            host_resolution: (640, 400),
            interface_rate_hz: 200,
            rate_notifications: Vec::new(),
        };
        machine.set_video_mode(0x03);
        machine
    }

    /// Switch to a standard BIOS mode, updating the BIOS data area the way
    /// INT 10h function 00h does
    pub fn set_video_mode(&mut self, mode: u8) {
        let (is_text, swidth, sheight) = match mode {
            0x00 | 0x01 => (true, 320, 200),
            0x02 | 0x03 | 0x07 => (true, 640, 200),
            0x08 => (false, 160, 200),
            0x04 | 0x05 | 0x09 | 0x0D | 0x13 => (false, 320, 200),
            0x06 | 0x0A | 0x0E => (false, 640, 200),
            0x0F | 0x10 => (false, 640, 350),
            _ => (false, 640, 480),
        };
        let columns = swidth / 8;
        // 2 KiB or 4 KiB per text page, one page in graphics modes
        let page_size: u16 = match (is_text, columns) {
            (true, 40) => 0x0800,
            (true, _) => 0x1000,
            (false, _) => 0,
        };

        self.set_custom_mode(
            mode,
            VideoModeInfo {
                is_text,
                swidth,
                sheight,
            },
        );
        self.memory.write_u16(BDA_SCREEN_COLUMNS, columns);
        self.memory.write_u16(BDA_PAGE_SIZE, page_size);
        self.memory.write_u8(BDA_CURRENT_PAGE, 0);
        self.memory.write_u16(BDA_CRTC_ADDRESS, if mode == 0x07 { 0x3B4 } else { 0x3D4 });
        self.set_text_rows(25);
    }

    /// Enter an arbitrary (for example VESA) mode without touching the
    /// text geometry
    pub fn set_custom_mode(&mut self, mode: u8, info: VideoModeInfo) {
        self.memory.write_u8(BDA_VIDEO_MODE, mode);
        self.mode = info;
        self.pixels.clear();
    }

    pub fn set_text_columns(&mut self, columns: u16) {
        self.memory.write_u16(BDA_SCREEN_COLUMNS, columns);
    }

    /// The BIOS data area stores rows minus one
    pub fn set_text_rows(&mut self, rows: u16) {
        self.memory.write_u8(BDA_SCREEN_ROWS, rows.wrapping_sub(1) as u8);
    }

    fn text_cell_addr(&self, col: u16, row: u16, page: u8) -> u32 {
        let base = if self.memory.read_u8(BDA_VIDEO_MODE) == 0x07 {
            0xB_0000
        } else {
            0xB_8000
        };
        let page_size = self.memory.read_u16(BDA_PAGE_SIZE) as u32;
        let columns = self.memory.read_u16(BDA_SCREEN_COLUMNS) as u32;
        base + page as u32 * page_size + (row as u32 * columns + col as u32) * 2
    }

    pub fn write_text_cell(&mut self, col: u16, row: u16, page: u8, chr: u8, attr: u8) {
        let addr = self.text_cell_addr(col, row, page);
        self.memory.write_u8(addr, chr);
        self.memory.write_u8(addr + 1, attr);
    }

    /// Character and attribute at a text position
    pub fn text_cell(&self, col: u16, row: u16, page: u8) -> (u8, u8) {
        let addr = self.text_cell_addr(col, row, page);
        (self.memory.read_u8(addr), self.memory.read_u8(addr + 1))
    }

    pub fn grdc_register(&self, idx: u8) -> u8 {
        self.grdc.regs.get(idx as usize).copied().unwrap_or(0xFF)
    }

    pub fn sequencer_register(&self, idx: u8) -> u8 {
        self.sequencer.regs.get(idx as usize).copied().unwrap_or(0xFF)
    }

    pub fn crtc_register(&self, idx: u8) -> u8 {
        self.crtc.regs.get(idx as usize).copied().unwrap_or(0xFF)
    }

    /// Limit the DOS memory still available, in paragraphs
    pub fn set_memory_limit(&mut self, paragraphs: u16) {
        self.memory_limit = paragraphs;
    }

    /// Where a callback kind has been installed
    pub fn callback_at(&self, kind: CallbackKind) -> Option<RealPtr> {
        self.callbacks.get(&kind).copied()
    }

    /// Drain the list of asserted IRQs
    pub fn take_irqs(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.irqs)
    }

    pub fn has_timer(&self, event: TimerEvent) -> bool {
        self.timers.iter().any(|&(pending, _)| pending == event)
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Run emulated time forward, firing expired timers in order
    pub fn advance_time(&mut self, driver: &mut MouseDriver, ms: u32) {
        let target = self.now_ms + ms as u64;
        loop {
            let next = self
                .timers
                .iter()
                .enumerate()
                .filter(|&(_, &(_, due))| due <= target)
                .min_by_key(|&(_, &(_, due))| due)
                .map(|(idx, _)| idx);
            let Some(idx) = next else {
                break;
            };

            let (event, due) = self.timers.remove(idx);
            self.now_ms = due;
            match event {
                TimerEvent::MouseDelay => driver.delay_expired(self),
            }
        }
        self.now_ms = target;
    }

    /// Run the IRQ 12 service routine once if IRQ 12 has been asserted:
    /// collect events, enter and leave the guest handler, re-arm the delay.
    /// Returns the event mask delivered to the guest handler.
    pub fn service_mouse_irq(&mut self, driver: &mut MouseDriver) -> u8 {
        let Some(pos) = self.irqs.iter().position(|&irq| irq == IRQ_PS2_MOUSE) else {
            return 0;
        };
        self.irqs.remove(pos);

        let saved = self.regs;
        let mask = driver.do_interrupt(self);
        if mask != 0 {
            driver.do_callback(self, mask);
            // The guest handler far-returns into the trampoline
            driver.handle_callback(self, CallbackKind::CallbackReturn);
        }
        self.regs = saved;
        driver.finalize_interrupt(self);
        mask
    }
}

impl GuestMemory for HeadlessMachine {
    fn read_u8(&self, addr: u32) -> u8 {
        self.memory.read_u8(addr)
    }

    fn write_u8(&mut self, addr: u32, val: u8) {
        self.memory.write_u8(addr, val);
    }

    fn block_read(&self, addr: u32, buf: &mut [u8]) {
        self.memory.block_read(addr, buf);
    }

    fn block_write(&mut self, addr: u32, data: &[u8]) {
        self.memory.block_write(addr, data);
    }
}

impl Cpu for HeadlessMachine {
    fn regs(&self) -> &Registers {
        &self.regs
    }

    fn regs_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }
}

impl Pic for HeadlessMachine {
    fn activate_irq(&mut self, irq: u8) {
        self.irqs.push(irq);
    }

    fn lower_irq(&mut self, irq: u8) {
        self.irqs.retain(|&pending| pending != irq);
    }

    fn add_timer_event(&mut self, event: TimerEvent, delay_ms: u32) {
        self.timers.push((event, self.now_ms + delay_ms as u64));
    }

    fn remove_timer_events(&mut self, event: TimerEvent) {
        self.timers.retain(|&(pending, _)| pending != event);
    }
}

impl VideoBios for HeadlessMachine {
    fn video_adapter(&self) -> VideoAdapterType {
        self.adapter
    }

    fn current_mode(&self) -> VideoModeInfo {
        self.mode
    }

    fn text_columns(&self) -> u16 {
        self.memory.read_u16(BDA_SCREEN_COLUMNS)
    }

    fn text_rows(&self) -> u16 {
        self.memory.read_u8(BDA_SCREEN_ROWS) as u16 + 1
    }

    fn get_pixel(&mut self, x: u16, y: u16, page: u8) -> u8 {
        self.pixels.get(&(page, x, y)).copied().unwrap_or(0)
    }

    fn put_pixel(&mut self, x: u16, y: u16, page: u8, color: u8) {
        if x < self.mode.swidth && y < self.mode.sheight {
            self.pixels.insert((page, x, y), color);
        }
    }

    fn read_char_attr(&mut self, col: u16, row: u16, page: u8) -> u16 {
        let (chr, attr) = self.text_cell(col, row, page);
        chr as u16 | (attr as u16) << 8
    }

    fn write_char(&mut self, col: u16, row: u16, page: u8, chr: u8, attr: u8) {
        self.write_text_cell(col, row, page, chr, attr);
    }

    fn set_cursor_shape(&mut self, first: u8, last: u8) {
        self.cursor_shape = Some((first, last));
    }

    fn io_read(&mut self, port: u16) -> u8 {
        match port {
            0x3C4 => self.sequencer.index,
            0x3C5 => self.sequencer.read(),
            0x3CE => self.grdc.index,
            0x3CF => self.grdc.read(),
            0x3B4 | 0x3D4 => self.crtc.index,
            0x3B5 | 0x3D5 => self.crtc.read(),
            _ => self.ports.get(&port).copied().unwrap_or(0xFF),
        }
    }

    fn io_write(&mut self, port: u16, val: u8) {
        match port {
            0x3C4 => self.sequencer.index = val,
            0x3C5 => self.sequencer.write(val),
            0x3CE => self.grdc.index = val,
            0x3CF => self.grdc.write(val),
            0x3B4 | 0x3D4 => self.crtc.index = val,
            0x3B5 | 0x3D5 => self.crtc.write(val),
            _ => {
                self.ports.insert(port, val);
            }
        }
    }
}

impl DosServices for HeadlessMachine {
    fn allocate_paragraphs(&mut self, paragraphs: u16) -> Option<u16> {
        if paragraphs > self.memory_limit {
            return None;
        }
        let segment = self.next_segment;
        self.next_segment += paragraphs;
        self.memory_limit -= paragraphs;
        Some(segment)
    }

    fn install_callback(&mut self, kind: CallbackKind, location: Option<RealPtr>) -> RealPtr {
        let ptr = location.unwrap_or_else(|| {
            let ptr = RealPtr::new(CALLBACK_SEGMENT, self.next_callback_offset);
            self.next_callback_offset += CALLBACK_STUB_SIZE;
            ptr
        });
        // IRET, in case the guest ever jumps there directly
        self.memory.write_u8(physical(ptr.segment(), ptr.offset()), 0xCF);
        self.callbacks.insert(kind, ptr);
        ptr
    }
}

impl HostMouse for HeadlessMachine {
    fn host_resolution(&self) -> (u32, u32) {
        self.host_resolution
    }

    fn notify_interface_rate(&mut self, rate_hz: u16) {
        self.interface_rate_hz = rate_hz;
        self.rate_notifications.push(rate_hz);
    }

    fn interface_rate(&self) -> u16 {
        self.interface_rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::MouseButtons;
    use crate::config::MouseDosConfig;

    #[test]
    fn test_bios_data_area_after_mode_set() {
        let mut m = HeadlessMachine::new();
        assert_eq!(m.read_u8(BDA_VIDEO_MODE), 0x03);
        assert_eq!(m.text_columns(), 80);
        assert_eq!(m.text_rows(), 25);
        assert_eq!(m.read_u16(BDA_PAGE_SIZE), 0x1000);

        m.set_video_mode(0x07);
        assert_eq!(m.read_u16(BDA_CRTC_ADDRESS), 0x3B4);
        m.write_text_cell(1, 0, 0, b'x', 0x07);
        assert_eq!(m.read_u8(0xB_0002), b'x');

        m.set_video_mode(0x12);
        assert!(!m.current_mode().is_text);
        assert_eq!(m.current_mode().sheight, 480);
    }

    #[test]
    fn test_paragraph_allocator() {
        let mut m = HeadlessMachine::new();
        assert_eq!(m.allocate_paragraphs(2), Some(FIRST_FREE_SEGMENT));
        assert_eq!(m.allocate_paragraphs(1), Some(FIRST_FREE_SEGMENT + 2));
        m.set_memory_limit(3);
        assert_eq!(m.allocate_paragraphs(4), None);
        assert_eq!(m.allocate_paragraphs(3), Some(FIRST_FREE_SEGMENT + 3));
        assert_eq!(m.allocate_paragraphs(1), None);
    }

    #[test]
    fn test_indexed_vga_registers() {
        let mut m = HeadlessMachine::new();
        m.io_write(0x3CE, 4);
        m.io_write(0x3CF, 0x02);
        assert_eq!(m.grdc_register(4), 0x02);
        assert_eq!(m.io_read(0x3CE), 4);
        assert_eq!(m.io_read(0x3CF), 0x02);

        m.io_write(0x61, 0x30);
        assert_eq!(m.io_read(0x61), 0x30);
        assert_eq!(m.io_read(0x60), 0xFF);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut m = HeadlessMachine::new();
        let mut driver = MouseDriver::start(&mut m, &MouseDosConfig::default()).unwrap();
        assert!(m.has_timer(TimerEvent::MouseDelay));

        m.advance_time(&mut driver, 4);
        assert!(m.has_timer(TimerEvent::MouseDelay));
        m.advance_time(&mut driver, 1);
        assert!(!m.has_timer(TimerEvent::MouseDelay));
        assert_eq!(m.now_ms(), 5);
    }

    #[test]
    fn test_service_routine_restores_registers() {
        let mut m = HeadlessMachine::new();
        let mut driver = MouseDriver::start(&mut m, &MouseDosConfig::default()).unwrap();
        driver.state().set_user_callback_mask(&mut m, 0xFF);
        m.advance_time(&mut driver, 10);
        m.take_irqs();

        let before = m.regs;
        assert_eq!(m.service_mouse_irq(&mut driver), 0);

        driver.notify_button(&mut m, MouseButtons::from_byte(0x01));
        assert_eq!(m.service_mouse_irq(&mut driver), 0x02);
        assert_eq!(m.regs, before);
        assert!(!driver.is_callback_running());
    }
}
