//! Three-button state as seen by the INT 33h interface

use serde::{Deserialize, Serialize};

/// Mouse button state
///
/// Hosts with more than three buttons fold the extra ones into `middle`
/// before notifying the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseButtons {
    /// Left button pressed
    pub left: bool,
    /// Right button pressed
    pub right: bool,
    /// Middle button pressed
    pub middle: bool,
}

impl MouseButtons {
    pub const NONE: MouseButtons = MouseButtons {
        left: false,
        right: false,
        middle: false,
    };

    /// Bit 0: left, bit 1: right, bit 2: middle
    pub fn to_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.left {
            byte |= 0x01;
        }
        if self.right {
            byte |= 0x02;
        }
        if self.middle {
            byte |= 0x04;
        }
        byte
    }

    pub fn to_word(self) -> u16 {
        self.to_byte() as u16
    }

    /// Higher bits are ignored
    pub fn from_byte(byte: u8) -> Self {
        Self {
            left: (byte & 0x01) != 0,
            right: (byte & 0x02) != 0,
            middle: (byte & 0x04) != 0,
        }
    }

    pub fn any_pressed(self) -> bool {
        self.left || self.right || self.middle
    }

    /// State of button `idx` (0 = left, 1 = right, 2 = middle)
    pub fn get(self, idx: usize) -> bool {
        match idx {
            0 => self.left,
            1 => self.right,
            2 => self.middle,
            _ => false,
        }
    }
}
