//! Lamp driver: five daisy-chained 74HC595 shift registers.
//!
//! Ports D, E and F carry the main groups, H and J the auxiliary ones. The
//! chain is clocked MSB first starting with port J, so port D ends up in the
//! register nearest the MCU. The persisted output-enable mask can hold
//! individual ports dark; bit 0 is port D, an erased byte enables all.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use signal_core::store::PortFrame;
use signal_core::store::records::{AUX_PORTS, MAIN_PORTS};

pub const PORT_COUNT: usize = MAIN_PORTS + AUX_PORTS;

/// Port bytes in chain order D, E, F, H, J with disabled ports cleared.
#[must_use]
pub fn port_bytes(frame: &PortFrame, enable_mask: u8) -> [u8; PORT_COUNT] {
    let mut bytes = [0u8; PORT_COUNT];
    let ports = frame.main.iter().chain(frame.aux.iter());
    for (index, (slot, value)) in bytes.iter_mut().zip(ports).enumerate() {
        if enable_mask & (1 << index) != 0 {
            *slot = *value;
        }
    }
    bytes
}

#[cfg(target_os = "none")]
pub use driver::ShiftRegisterOutputs;

#[cfg(target_os = "none")]
mod driver {
    use embassy_stm32::gpio::Output;
    use signal_core::engine::SignalOutputs;
    use signal_core::store::PortFrame;

    use super::port_bytes;

    pub struct ShiftRegisterOutputs {
        data: Output<'static>,
        clock: Output<'static>,
        latch: Output<'static>,
        /// Active-low output enable, released after the first latched frame.
        enable: Output<'static>,
        enable_mask: u8,
    }

    impl ShiftRegisterOutputs {
        pub fn new(
            data: Output<'static>,
            clock: Output<'static>,
            latch: Output<'static>,
            enable: Output<'static>,
        ) -> Self {
            Self {
                data,
                clock,
                latch,
                enable,
                enable_mask: 0xFF,
            }
        }

        pub fn set_enable_mask(&mut self, mask: u8) {
            self.enable_mask = mask;
        }

        fn shift_byte(&mut self, byte: u8) {
            for bit in (0..8).rev() {
                if byte & (1 << bit) != 0 {
                    self.data.set_high();
                } else {
                    self.data.set_low();
                }
                self.clock.set_high();
                self.clock.set_low();
            }
        }
    }

    impl SignalOutputs for ShiftRegisterOutputs {
        fn apply(&mut self, frame: &PortFrame) {
            let bytes = port_bytes(frame, self.enable_mask);
            for byte in bytes.iter().rev() {
                self.shift_byte(*byte);
            }
            self.latch.set_high();
            self.latch.set_low();
            self.enable.set_low();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_mask_drives_every_port() {
        let frame = PortFrame::ALL_RED;
        assert_eq!(port_bytes(&frame, 0xFF), [0x92, 0x49, 0x24, 0x12, 0x14]);
    }

    #[test]
    fn disabled_ports_stay_dark() {
        let frame = PortFrame::new([0x11, 0x22, 0x33], [0x44, 0x55]);
        assert_eq!(port_bytes(&frame, 0b0_0101), [0x11, 0x00, 0x33, 0x00, 0x00]);
        assert_eq!(port_bytes(&frame, 0b1_1000), [0x00, 0x00, 0x00, 0x44, 0x55]);
        assert_eq!(port_bytes(&frame, 0), [0; PORT_COUNT]);
    }
}
