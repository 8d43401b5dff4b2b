mod header;

pub use header::{CartridgeHeader, ControllerKind, HEADER_END, header_checksum};

use log::warn;

use crate::error::{LoadError, UnsupportedBankController};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

/// Bank registers of the emulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BankState {
    None,
    Mbc1 {
        bank_low: u8,
        bank_high: u8,
        advanced: bool,
        ram_enable: bool,
        multicart: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_select: u8,
        ram_enable: bool,
        mbc30: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
        rumble: bool,
    },
}

impl BankState {
    fn for_header(header: &CartridgeHeader, rom: &[u8]) -> Result<Self, UnsupportedBankController> {
        let state = match header.controller {
            ControllerKind::None => BankState::None,
            ControllerKind::Mbc1 => BankState::Mbc1 {
                bank_low: 1,
                bank_high: 0,
                advanced: false,
                ram_enable: false,
                multicart: detect_mbc1_multicart(rom),
            },
            ControllerKind::Mbc2 => BankState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            kind @ (ControllerKind::Mbc3 | ControllerKind::Mbc30) => BankState::Mbc3 {
                rom_bank: 1,
                ram_select: 0,
                ram_enable: false,
                mbc30: kind == ControllerKind::Mbc30,
            },
            ControllerKind::Mbc5 => BankState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rumble: header.has_rumble(),
            },
            kind => {
                return Err(UnsupportedBankController {
                    kind,
                    code: header.cartridge_type,
                });
            }
        };
        Ok(state)
    }
}

/// Cartridge ROM image, external RAM and the bank controller in front of them.
#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    header: CartridgeHeader,
    state: BankState,
    /// Banks physically present in the image.
    rom_banks: usize,
    ram_banks: usize,
}

impl Cartridge {
    pub fn from_bytes(rom: &[u8]) -> Result<Self, LoadError> {
        let header = CartridgeHeader::parse(rom)?;
        let state = BankState::for_header(&header, rom)?;

        if !header.checksum_valid() {
            warn!(
                "header checksum mismatch: stored {:#04x}, computed {:#04x}",
                header.header_checksum, header.computed_checksum
            );
        }
        if rom.len() < header.rom_banks * ROM_BANK_SIZE {
            warn!(
                "ROM image is {} bytes but the header declares {} banks",
                rom.len(),
                header.rom_banks
            );
        }
        if header.has_timer() {
            warn!("cartridge clock registers are not emulated; they read 0xFF");
        }

        let ram_size = match header.controller {
            // Boards without a controller can only decode a single RAM bank.
            ControllerKind::None => header.ram_size.min(RAM_BANK_SIZE),
            _ => header.ram_size,
        };

        Ok(Self {
            rom_banks: rom.len().div_ceil(ROM_BANK_SIZE).max(1),
            ram_banks: ram_size.div_ceil(RAM_BANK_SIZE).max(1),
            rom: rom.to_vec(),
            ram: vec![0; ram_size],
            header,
            state,
        })
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    pub fn rom_bank_count(&self) -> usize {
        self.rom_banks
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Overwrite external RAM with a saved snapshot. Returns false when the
    /// snapshot size does not match the cartridge.
    pub fn load_ram(&mut self, data: &[u8]) -> bool {
        if data.len() != self.ram.len() {
            return false;
        }
        self.ram.copy_from_slice(data);
        true
    }

    /// Return the bank registers to their power-on values. RAM contents survive.
    pub fn reset_banking(&mut self) {
        if let Ok(state) = BankState::for_header(&self.header, &self.rom) {
            self.state = state;
        }
    }

    /// Physical bank visible in the 0x4000-0x7FFF window.
    pub fn selected_rom_bank(&self) -> usize {
        self.rom_bank_for(0x4000)
    }

    fn rom_bank_for(&self, addr: u16) -> usize {
        let fixed = addr < 0x4000;
        let bank = match &self.state {
            BankState::None => usize::from(!fixed),
            BankState::Mbc1 {
                bank_low,
                bank_high,
                advanced,
                multicart,
                ..
            } => {
                let (shift, low_mask) = if *multicart { (4, 0x0F) } else { (5, 0x1F) };
                let high = (*bank_high as usize) << shift;
                if fixed {
                    if *advanced { high } else { 0 }
                } else {
                    // The zero check sees all five register bits, even when
                    // only four are wired on multicarts.
                    let low = if bank_low & 0x1F == 0 { 1 } else { *bank_low };
                    high | (low & low_mask) as usize
                }
            }
            BankState::Mbc2 { rom_bank, .. } => {
                if fixed {
                    0
                } else {
                    *rom_bank as usize
                }
            }
            BankState::Mbc3 { rom_bank, .. } => {
                if fixed {
                    0
                } else {
                    (*rom_bank).max(1) as usize
                }
            }
            BankState::Mbc5 { rom_bank, .. } => {
                if fixed {
                    0
                } else {
                    *rom_bank as usize
                }
            }
        };
        bank % self.rom_banks
    }

    /// Offset into the ROM image for a CPU address in 0x0000-0x7FFF.
    pub fn translate_rom(&self, addr: u16) -> usize {
        let offset = self.rom_bank_for(addr) * ROM_BANK_SIZE + (addr as usize & (ROM_BANK_SIZE - 1));
        debug_assert!(offset < self.rom_banks * ROM_BANK_SIZE);
        offset
    }

    /// Bank mapped at 0xA000-0xBFFF, or `None` when RAM is disabled or absent.
    pub fn selected_ram_bank(&self) -> Option<usize> {
        if self.ram.is_empty() {
            return None;
        }
        let bank = match &self.state {
            BankState::None => 0,
            BankState::Mbc1 {
                ram_enable,
                bank_high,
                advanced,
                ..
            } => {
                if !*ram_enable {
                    return None;
                }
                if *advanced { *bank_high as usize } else { 0 }
            }
            BankState::Mbc2 { ram_enable, .. } => {
                if !*ram_enable {
                    return None;
                }
                0
            }
            BankState::Mbc3 {
                ram_select,
                ram_enable,
                mbc30,
                ..
            } => {
                let last = if *mbc30 { 0x07 } else { 0x03 };
                // Selects 0x08-0x0C address the clock registers.
                if !*ram_enable || *ram_select > last {
                    return None;
                }
                *ram_select as usize
            }
            BankState::Mbc5 {
                ram_bank,
                ram_enable,
                rumble,
                ..
            } => {
                if !*ram_enable {
                    return None;
                }
                // Rumble boards drive the motor from bit 3.
                let mask = if *rumble { 0x07 } else { 0x0F };
                (ram_bank & mask) as usize
            }
        };
        Some(bank % self.ram_banks)
    }

    /// Offset into external RAM for a CPU address in 0xA000-0xBFFF.
    pub fn translate_ram(&self, addr: u16) -> Option<usize> {
        let bank = self.selected_ram_bank()?;
        let offset = addr.wrapping_sub(0xA000) as usize & (RAM_BANK_SIZE - 1);
        if matches!(self.state, BankState::Mbc2 { .. }) {
            return Some(offset & 0x1FF);
        }
        Some((bank * RAM_BANK_SIZE + offset) % self.ram.len())
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self
                .rom
                .get(self.translate_rom(addr))
                .copied()
                .unwrap_or(0xFF),
            0xA000..=0xBFFF => match self.translate_ram(addr) {
                Some(idx) if matches!(self.state, BankState::Mbc2 { .. }) => 0xF0 | self.ram[idx],
                Some(idx) => self.ram[idx],
                None => 0xFF,
            },
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        if (0xA000..=0xBFFF).contains(&addr) {
            if let Some(idx) = self.translate_ram(addr) {
                self.ram[idx] = if matches!(self.state, BankState::Mbc2 { .. }) {
                    val & 0x0F
                } else {
                    val
                };
            }
            return;
        }

        match (&mut self.state, addr) {
            (BankState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF)
            | (BankState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF)
            | (BankState::Mbc5 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (BankState::Mbc1 { bank_low, .. }, 0x2000..=0x3FFF) => {
                *bank_low = val & 0x1F;
            }
            (BankState::Mbc1 { bank_high, .. }, 0x4000..=0x5FFF) => {
                *bank_high = val & 0x03;
            }
            (BankState::Mbc1 { advanced, .. }, 0x6000..=0x7FFF) => {
                *advanced = val & 0x01 != 0;
            }
            (
                BankState::Mbc2 {
                    rom_bank,
                    ram_enable,
                },
                0x0000..=0x3FFF,
            ) => {
                // Address bit 8 picks between the two registers.
                if addr & 0x0100 == 0 {
                    *ram_enable = val & 0x0F == 0x0A;
                } else {
                    *rom_bank = (val & 0x0F).max(1);
                }
            }
            (BankState::Mbc3 { rom_bank, mbc30, .. }, 0x2000..=0x3FFF) => {
                let mask = if *mbc30 { 0xFF } else { 0x7F };
                *rom_bank = (val & mask).max(1);
            }
            (BankState::Mbc3 { ram_select, .. }, 0x4000..=0x5FFF) => {
                *ram_select = val;
            }
            (BankState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                *rom_bank = (*rom_bank & 0x100) | val as u16;
            }
            (BankState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                *rom_bank = (*rom_bank & 0xFF) | (((val & 0x01) as u16) << 8);
            }
            (BankState::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            _ => {}
        }
    }
}

/// Multicart boards wire only four ROM bank bits and repeat the boot logo at
/// the start of every 16-bank game.
fn detect_mbc1_multicart(rom: &[u8]) -> bool {
    if rom.len() / ROM_BANK_SIZE != 64 {
        return false;
    }
    let logo = match rom.get(0x0104..0x0134) {
        Some(s) if !s.iter().all(|&b| b == 0) => s,
        _ => return false,
    };
    let start = 0x10 * ROM_BANK_SIZE + 0x0104;
    rom.get(start..start + logo.len()) == Some(logo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let banks = 2usize << rom_code;
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        for bank in 0..banks {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
            rom[bank * ROM_BANK_SIZE + 1] = (bank >> 8) as u8;
        }
        rom[0x0147] = cart_type;
        rom[0x0148] = rom_code;
        rom[0x0149] = ram_code;
        rom[0x014D] = header_checksum(&rom);
        rom
    }

    #[test]
    fn mbc1_zero_selects_one() {
        let mut cart = Cartridge::from_bytes(&image(0x01, 0x04, 0x00)).unwrap();
        cart.write(0x2000, 0x00);
        assert_eq!(cart.selected_rom_bank(), 1);
        assert_eq!(cart.read(0x4000), 1);
        cart.write(0x2000, 0x1F);
        assert_eq!(cart.read(0x4000), 0x1F);
    }

    #[test]
    fn mbc1_high_bits_and_advanced_mode() {
        let mut cart = Cartridge::from_bytes(&image(0x01, 0x06, 0x00)).unwrap();
        cart.write(0x4000, 0x01);
        cart.write(0x2000, 0x00);
        assert_eq!(cart.selected_rom_bank(), 0x21);
        assert_eq!(cart.read(0x0000), 0);
        cart.write(0x6000, 0x01);
        assert_eq!(cart.read(0x0000), 0x20);
    }

    #[test]
    fn bank_index_wraps_to_image_size() {
        let mut cart = Cartridge::from_bytes(&image(0x19, 0x01, 0x00)).unwrap();
        cart.write(0x2000, 0x05);
        assert_eq!(cart.selected_rom_bank(), 1);
        cart.write(0x2000, 0x00);
        assert_eq!(cart.selected_rom_bank(), 0);
    }

    #[test]
    fn mbc5_ninth_bit() {
        let mut cart = Cartridge::from_bytes(&image(0x19, 0x08, 0x00)).unwrap();
        cart.write(0x2000, 0x02);
        cart.write(0x3000, 0x01);
        assert_eq!(cart.selected_rom_bank(), 0x102);
        assert_eq!(cart.read(0x4001), 0x01);
    }

    #[test]
    fn ram_requires_enable() {
        let mut cart = Cartridge::from_bytes(&image(0x03, 0x01, 0x03)).unwrap();
        cart.write(0xA000, 0x42);
        assert_eq!(cart.read(0xA000), 0xFF);
        cart.write(0x0000, 0x0A);
        cart.write(0xA000, 0x42);
        assert_eq!(cart.read(0xA000), 0x42);
        cart.write(0x0000, 0x00);
        assert_eq!(cart.read(0xA000), 0xFF);
    }

    #[test]
    fn mbc2_nibble_ram_mirrors() {
        let mut cart = Cartridge::from_bytes(&image(0x06, 0x02, 0x00)).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0xA005, 0xAB);
        assert_eq!(cart.read(0xA005), 0xFB);
        assert_eq!(cart.read(0xA205), 0xFB);
        cart.write(0x0100, 0x03);
        assert_eq!(cart.selected_rom_bank(), 3);
    }

    #[test]
    fn mbc3_clock_select_reads_open_bus() {
        let mut cart = Cartridge::from_bytes(&image(0x10, 0x02, 0x03)).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0x4000, 0x08);
        cart.write(0xA000, 0x12);
        assert_eq!(cart.read(0xA000), 0xFF);
        cart.write(0x4000, 0x02);
        cart.write(0xA000, 0x12);
        assert_eq!(cart.selected_ram_bank(), Some(2));
        assert_eq!(cart.read(0xA000), 0x12);
    }

    #[test]
    fn unsupported_controller_is_rejected() {
        let err = Cartridge::from_bytes(&image(0xFE, 0x00, 0x00)).unwrap_err();
        assert_eq!(
            err,
            LoadError::UnsupportedBankController(UnsupportedBankController {
                kind: ControllerKind::Huc3,
                code: 0xFE,
            })
        );
    }

    #[test]
    fn ram_snapshot_round_trip() {
        let mut cart = Cartridge::from_bytes(&image(0x1B, 0x01, 0x02)).unwrap();
        let mut save = vec![0u8; 0x2000];
        save[0x10] = 0x99;
        assert!(cart.load_ram(&save));
        cart.write(0x0000, 0x0A);
        assert_eq!(cart.read(0xA010), 0x99);
        assert!(!cart.load_ram(&[0u8; 4]));
    }
}
