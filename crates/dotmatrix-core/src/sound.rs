/// Register contents after the boot ROM, FF10-FF3F.
const POST_BOOT_REGS: [u8; 0x30] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const NR52: u16 = 0xFF26;
const POWER: u8 = 0x80;

/// Bits that always read back as 1.
fn read_mask(addr: u16) -> u8 {
    match addr {
        0xFF10 => 0x80,
        0xFF11 | 0xFF16 => 0x3F,
        0xFF12 | 0xFF17 | 0xFF21 | 0xFF22 | 0xFF24 | 0xFF25 => 0x00,
        0xFF14 | 0xFF19 | 0xFF1E | 0xFF23 => 0xBF,
        0xFF1A => 0x7F,
        0xFF1C => 0x9F,
        0xFF26 => 0x70,
        0xFF30..=0xFF3F => 0x00,
        _ => 0xFF,
    }
}

/// Channel index triggered by a write to `addr`, with the register holding its DAC bits.
fn channel_of_trigger(addr: u16) -> Option<(u8, u16)> {
    match addr {
        0xFF14 => Some((0, 0xFF12)),
        0xFF19 => Some((1, 0xFF17)),
        0xFF1E => Some((2, 0xFF1A)),
        0xFF23 => Some((3, 0xFF21)),
        _ => None,
    }
}

/// Sound register file. Values are stored and read back through the
/// hardware masks; no audio is produced.
pub struct Sound {
    regs: [u8; 0x30],
    /// Channel on/off bits reported in NR52.
    channels: u8,
}

impl Sound {
    pub fn new() -> Self {
        Self {
            regs: [0; 0x30],
            channels: 0,
        }
    }

    pub fn post_boot() -> Self {
        Self {
            regs: POST_BOOT_REGS,
            channels: POST_BOOT_REGS[(NR52 - 0xFF10) as usize] & 0x0F,
        }
    }

    fn powered(&self) -> bool {
        self.regs[(NR52 - 0xFF10) as usize] & POWER != 0
    }

    fn dac_enabled(&self, channel: u8, dac_reg: u16) -> bool {
        let val = self.regs[(dac_reg - 0xFF10) as usize];
        if channel == 2 {
            val & 0x80 != 0
        } else {
            val & 0xF8 != 0
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        if !(0xFF10..=0xFF3F).contains(&addr) {
            return 0xFF;
        }
        let stored = self.regs[(addr - 0xFF10) as usize];
        if addr == NR52 {
            return (stored & POWER) | self.channels | read_mask(addr);
        }
        stored | read_mask(addr)
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        if !(0xFF10..=0xFF3F).contains(&addr) {
            return;
        }
        let idx = (addr - 0xFF10) as usize;
        if addr == NR52 {
            if val & POWER == 0 {
                self.regs[..0x20].fill(0);
                self.channels = 0;
            } else {
                self.regs[idx] = POWER;
            }
            return;
        }
        // Wave RAM stays writable while powered down.
        if !self.powered() && addr < 0xFF30 {
            return;
        }
        self.regs[idx] = val;

        if let Some((channel, dac_reg)) = channel_of_trigger(addr)
            && val & 0x80 != 0
            && self.dac_enabled(channel, dac_reg)
        {
            self.channels |= 1 << channel;
        }
        for (channel, dac_reg) in [(0, 0xFF12), (1, 0xFF17), (2, 0xFF1A), (3, 0xFF21)] {
            if addr == dac_reg && !self.dac_enabled(channel, dac_reg) {
                self.channels &= !(1 << channel);
            }
        }
    }
}

impl Default for Sound {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_apply_masks() {
        let mut sound = Sound::post_boot();
        sound.write(0xFF11, 0x00);
        assert_eq!(sound.read(0xFF11), 0x3F);
        assert_eq!(sound.read(0xFF13), 0xFF);
        assert_eq!(sound.read(0xFF26), 0xF1);
        assert_eq!(sound.read(0xFF27), 0xFF);
    }

    #[test]
    fn power_off_clears_and_blocks_writes() {
        let mut sound = Sound::post_boot();
        sound.write(0xFF26, 0x00);
        assert_eq!(sound.read(0xFF26), 0x70);
        assert_eq!(sound.read(0xFF24), 0x00);
        sound.write(0xFF24, 0x77);
        assert_eq!(sound.read(0xFF24), 0x00);
        sound.write(0xFF30, 0x5A);
        assert_eq!(sound.read(0xFF30), 0x5A);
    }

    #[test]
    fn trigger_sets_status_when_dac_on() {
        let mut sound = Sound::new();
        sound.write(0xFF26, 0x80);
        sound.write(0xFF17, 0xF0);
        sound.write(0xFF19, 0x80);
        assert_eq!(sound.read(0xFF26), 0xF2);
        sound.write(0xFF17, 0x00);
        assert_eq!(sound.read(0xFF26), 0xF0);
    }
}
