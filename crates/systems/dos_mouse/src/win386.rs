//! Windows 3.x enhanced mode cooperation (INT 2Fh multiplex and the
//! virtual mouse device callout).

use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::RealPtr;

use crate::driver::MouseDriver;
use crate::machine::Machine;

/// Device id of the virtual mouse device (VMD)
const VMD_DEVICE_ID: u16 = 0x000C;

impl MouseDriver {
    /// INT 2Fh multiplex handler. Returns `true` if the call was addressed
    /// to this driver; broadcast notifications return `false` so the rest
    /// of the chain sees them too.
    pub fn int2f_handler<M: Machine>(&mut self, m: &mut M) -> bool {
        let state = self.state;
        let regs = *m.regs();

        match regs.ax {
            0x1605 => {
                let (major, minor) = ((regs.di >> 8) as u8, regs.di as u8);
                log(LogCategory::Windows, LogLevel::Info, || format!("Starting Windows {}.{}", major, minor));

                let link = state.setup_windows_struct(m, RealPtr::new(regs.es, regs.bx));
                let regs = m.regs_mut();
                regs.es = link.segment();
                regs.bx = link.offset();

                state.set_win386_running(m, true);
                state.set_win386_drawing_cursor(m, false);
                false
            }
            0x1606 => {
                log(LogCategory::Windows, LogLevel::Info, || String::from("Shutting down Windows"));
                state.clear_windows_struct(m);
                state.set_win386_running(m, false);
                state.set_win386_drawing_cursor(m, false);
                false
            }
            0x1607 if regs.bx == VMD_DEVICE_ID => {
                match regs.cx {
                    // Installation check
                    0x0000 => m.regs_mut().cx = 1,
                    // Callout address request
                    0x0001 => {
                        let callout = self.entry_points.win386_callout;
                        let regs = m.regs_mut();
                        regs.ds = callout.segment();
                        regs.si = callout.offset();
                        regs.ax = 0;
                    }
                    function => log(LogCategory::Windows, LogLevel::Warn, || {
                        format!("VMD device callout {:04X}h not implemented", function)
                    }),
                }
                true
            }
            // Task switches, nothing to save
            0x4001 | 0x4002 => false,
            _ => false,
        }
    }

    /// Entry point Windows calls once it owns the mouse; AX selects the
    /// request
    pub(crate) fn win386_callout<M: Machine>(&mut self, m: &mut M) {
        let regs = m.regs_mut();
        regs.bp = regs.sp;
        let function = regs.ax;

        match function {
            1 => log(LogCategory::Windows, LogLevel::Debug, || String::from("Windows mouse event")),
            2 => self.state.set_win386_drawing_cursor(m, true),
            3 => self.state.set_win386_drawing_cursor(m, false),
            _ => log(LogCategory::Windows, LogLevel::Warn, || {
                format!("Windows callout function {:04X}h not implemented", function)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MouseDosConfig;
    use crate::headless::HeadlessMachine;
    use crate::machine::{CallbackKind, Cpu, Registers};
    use crate::state::STATE_SIZE;
    use emu_core::memory::physical;
    use emu_core::GuestMemory;

    fn start() -> (HeadlessMachine, MouseDriver) {
        let mut m = HeadlessMachine::new();
        let driver = MouseDriver::start(&mut m, &MouseDosConfig::default()).unwrap();
        (m, driver)
    }

    fn set_regs(m: &mut HeadlessMachine, regs: Registers) {
        let saved = *m.regs();
        *m.regs_mut() = Registers {
            ss: saved.ss,
            sp: saved.sp,
            ..regs
        };
    }

    #[test]
    fn test_windows_startup_and_shutdown() {
        let (mut m, mut driver) = start();
        let state = driver.state();
        set_regs(
            &mut m,
            Registers {
                ax: 0x1605,
                di: 0x030A,
                es: 0x0070,
                bx: 0x0123,
                ..Default::default()
            },
        );

        assert!(!driver.int2f_handler(&mut m));
        let regs = *m.regs();
        assert_eq!((regs.es, regs.bx), (state.segment(), 2));
        assert!(state.win386_running(&m));
        assert!(!state.win386_drawing_cursor(&m));

        // Startup block chains to the previous ES:BX
        let block = physical(regs.es, regs.bx);
        assert_eq!(m.read_u8(block + 1), 3);
        assert_eq!(RealPtr(m.read_u32(block + 2)), RealPtr::new(0x0070, 0x0123));
        assert_eq!(m.read_u16(physical(state.segment(), 24)), STATE_SIZE);

        set_regs(&mut m, Registers { ax: 0x1606, ..Default::default() });
        driver.int2f_handler(&mut m);
        assert!(!state.win386_running(&m));
        assert_eq!(m.read_u32(block + 2), 0);
    }

    #[test]
    fn test_vmd_callout_queries() {
        let (mut m, mut driver) = start();
        set_regs(
            &mut m,
            Registers {
                ax: 0x1607,
                bx: 0x000C,
                cx: 0,
                ..Default::default()
            },
        );
        assert!(driver.int2f_handler(&mut m));
        assert_eq!(m.regs().cx, 1);

        set_regs(
            &mut m,
            Registers {
                ax: 0x1607,
                bx: 0x000C,
                cx: 1,
                ..Default::default()
            },
        );
        assert!(driver.int2f_handler(&mut m));
        let regs = *m.regs();
        assert_eq!(regs.ax, 0);
        assert_eq!(RealPtr::new(regs.ds, regs.si), driver.win386_callout_entry());
        assert_eq!(m.callback_at(CallbackKind::Win386Callout), Some(driver.win386_callout_entry()));
    }

    #[test]
    fn test_other_devices_and_task_switches_pass_through() {
        let (mut m, mut driver) = start();
        for (ax, bx) in [(0x1607, 0x0001), (0x4001, 0), (0x4002, 0), (0x1234, 0)] {
            set_regs(&mut m, Registers { ax, bx, cx: 0x55, ..Default::default() });
            assert!(!driver.int2f_handler(&mut m));
            assert_eq!(m.regs().cx, 0x55);
        }
    }

    #[test]
    fn test_callout_cursor_ownership() {
        let (mut m, mut driver) = start();
        let state = driver.state();

        set_regs(&mut m, Registers { ax: 2, ..Default::default() });
        driver.handle_callback(&mut m, CallbackKind::Win386Callout);
        assert!(state.win386_drawing_cursor(&m));
        assert_eq!(m.regs().bp, m.regs().sp);

        set_regs(&mut m, Registers { ax: 3, ..Default::default() });
        driver.handle_callback(&mut m, CallbackKind::Win386Callout);
        assert!(!state.win386_drawing_cursor(&m));

        set_regs(&mut m, Registers { ax: 9, ..Default::default() });
        driver.handle_callback(&mut m, CallbackKind::Win386Callout);
        assert!(!state.win386_drawing_cursor(&m));
    }
}
