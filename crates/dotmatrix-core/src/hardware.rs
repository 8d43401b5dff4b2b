/// Console variant being emulated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HardwareMode {
    /// Original monochrome handheld.
    #[default]
    Dmg,
    /// Color handheld.
    Cgb,
}

impl HardwareMode {
    pub const fn is_cgb(self) -> bool {
        matches!(self, HardwareMode::Cgb)
    }

    /// Number of 8 KiB VRAM banks.
    pub const fn vram_banks(self) -> usize {
        match self {
            HardwareMode::Dmg => 1,
            HardwareMode::Cgb => 2,
        }
    }

    /// Number of 4 KiB WRAM banks.
    pub const fn wram_banks(self) -> usize {
        match self {
            HardwareMode::Dmg => 2,
            HardwareMode::Cgb => 8,
        }
    }

    /// Exact size a boot image must have for this variant.
    pub const fn boot_rom_len(self) -> usize {
        match self {
            HardwareMode::Dmg => 0x100,
            HardwareMode::Cgb => 0x900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_counts_follow_variant() {
        assert_eq!(HardwareMode::Dmg.vram_banks(), 1);
        assert_eq!(HardwareMode::Cgb.vram_banks(), 2);
        assert_eq!(HardwareMode::Dmg.wram_banks(), 2);
        assert_eq!(HardwareMode::Cgb.wram_banks(), 8);
        assert_eq!(HardwareMode::default(), HardwareMode::Dmg);
    }
}
