use crate::interrupts::{Interrupt, Interrupts};

/// CPU cycles per bit at the normal 8192 Hz internal clock.
const SLOW_BIT_CYCLES: u32 = 512;
/// CPU cycles per bit with the color-only fast clock (SC bit 1).
const FAST_BIT_CYCLES: u32 = 16;

/// SB/SC registers with nothing plugged into the link port.
///
/// Incoming bits are all 1, so every internally clocked transfer receives
/// 0xFF. Externally clocked transfers wait for a partner that never arrives.
pub struct Serial {
    sb: u8,
    sc: u8,
    cgb: bool,
    transfer: Option<Transfer>,
}

struct Transfer {
    remaining_bits: u8,
    countdown: u32,
    bit_cycles: u32,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: 0,
            cgb,
            transfer: None,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 if self.cgb => self.sc | 0x7C,
            0xFF02 => self.sc | 0x7E,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val & if self.cgb { 0x83 } else { 0x81 };
                self.transfer = None;
                if self.sc & 0x81 == 0x81 {
                    let bit_cycles = if self.sc & 0x02 != 0 {
                        FAST_BIT_CYCLES
                    } else {
                        SLOW_BIT_CYCLES
                    };
                    self.transfer = Some(Transfer {
                        remaining_bits: 8,
                        countdown: bit_cycles,
                        bit_cycles,
                    });
                }
            }
            _ => {}
        }
    }

    pub fn transfer_active(&self) -> bool {
        self.transfer.is_some()
    }

    /// Advance an internally clocked transfer by `cycles` CPU cycles.
    pub fn step(&mut self, cycles: u32, interrupts: &mut Interrupts) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let mut cycles = cycles;
        while cycles > 0 {
            let spent = cycles.min(transfer.countdown);
            transfer.countdown -= spent;
            cycles -= spent;
            if transfer.countdown > 0 {
                break;
            }
            self.sb = (self.sb << 1) | 1;
            transfer.remaining_bits -= 1;
            if transfer.remaining_bits == 0 {
                self.sc &= 0x7F;
                self.transfer = None;
                interrupts.raise(Interrupt::Serial);
                return;
            }
            transfer.countdown = transfer.bit_cycles;
        }
    }
}
