use crate::interrupts::{Interrupt, Interrupts};

/// Divider value the boot ROM leaves behind when it hands over at 0x0100.
pub const POST_BOOT_DIV: u16 = 0xABCC;

/// T-cycles between TIMA overflow and the TMA reload.
const RELOAD_DELAY: u8 = 3;

pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div: u16,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    /// Output of the edge detector on the previous cycle.
    last_signal: bool,
    /// TMA as it was before a write in the current cycle.
    tma_latch: Option<u8>,
    /// Value TIMA is reloaded with once the overflow delay elapses.
    pending_reload: Option<u8>,
    reload_delay: u8,
    /// Set on the cycle the reload lands.
    reloading: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            last_signal: false,
            tma_latch: None,
            pending_reload: None,
            reload_delay: 0,
            reloading: false,
        }
    }

    pub fn post_boot() -> Self {
        Self {
            div: POST_BOOT_DIV,
            ..Self::new()
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, interrupts: &mut Interrupts) {
        match addr {
            0xFF04 => self.reset_div(interrupts),
            0xFF05 => {
                // Writes on the reload cycle lose against TMA.
                if self.reloading || (self.pending_reload.is_some() && self.reload_delay == 0) {
                    return;
                }
                self.tima = val;
                // A write while TIMA still reads zero cancels the reload.
                self.pending_reload = None;
                self.reload_delay = 0;
            }
            0xFF06 => {
                self.tma_latch = Some(self.tma);
                self.tma = val;
                if self.pending_reload.is_some() {
                    self.pending_reload = Some(val);
                }
                if self.reloading {
                    self.tima = val;
                }
            }
            0xFF07 => {
                let prev = Self::signal_with(self.div, self.tac);
                self.tac = val & 0x07;
                let new = Self::signal_with(self.div, self.tac);
                if prev && !new {
                    let tma_old = self.tma_latch.take();
                    self.increment(tma_old);
                }
                self.last_signal = new;
            }
            _ => {}
        }
    }

    /// Advance the timer by `cycles` CPU cycles, requesting the timer
    /// interrupt when a TIMA reload lands.
    pub fn step(&mut self, cycles: u32, interrupts: &mut Interrupts) {
        for _ in 0..cycles {
            self.advance_reload(interrupts);
            let prev = self.last_signal;
            let tma_old = self.tma_latch.take();
            self.div = self.div.wrapping_add(1);
            let new = self.signal();
            if prev && !new {
                self.increment(tma_old);
            }
            self.last_signal = new;
        }
    }

    /// Reset the internal divider counter. The selected bit dropping to zero
    /// counts as a falling edge.
    pub fn reset_div(&mut self, interrupts: &mut Interrupts) {
        self.advance_reload(interrupts);
        let prev = Self::signal_with(self.div, self.tac);
        self.div = 0;
        let new = Self::signal_with(self.div, self.tac);
        if prev && !new {
            let tma_old = self.tma_latch.take();
            self.increment(tma_old);
        }
        self.last_signal = new;
    }

    /// True while TIMA reads zero after an overflow and before the reload.
    pub fn reload_pending(&self) -> bool {
        self.pending_reload.is_some()
    }

    fn advance_reload(&mut self, interrupts: &mut Interrupts) {
        self.reloading = false;
        let Some(val) = self.pending_reload else {
            return;
        };
        if self.reload_delay == 0 {
            self.tima = val;
            interrupts.raise(Interrupt::Timer);
            self.pending_reload = None;
            self.reloading = true;
        } else {
            self.reload_delay -= 1;
        }
    }

    fn increment(&mut self, tma_old: Option<u8>) {
        if self.tima == 0xFF {
            self.tima = 0;
            self.pending_reload = Some(tma_old.unwrap_or(self.tma));
            self.reload_delay = RELOAD_DELAY;
        } else {
            self.tima += 1;
        }
    }

    fn signal(&self) -> bool {
        Self::signal_with(self.div, self.tac)
    }

    /// Selected divider bit AND-ed with the enable bit.
    fn signal_with(div: u16, tac: u8) -> bool {
        if tac & 0x04 == 0 {
            return false;
        }
        let bit = match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        (div >> bit) & 1 != 0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
