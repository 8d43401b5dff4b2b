use std::fmt;

use crate::error::LoadError;

/// First byte past the cartridge header.
pub const HEADER_END: usize = 0x0150;

const TITLE_START: usize = 0x0134;
const TITLE_END: usize = 0x0144;
const CGB_FLAG: usize = 0x0143;
const NEW_LICENSEE: usize = 0x0144;
const SGB_FLAG: usize = 0x0146;
const CARTRIDGE_TYPE: usize = 0x0147;
const ROM_SIZE: usize = 0x0148;
const RAM_SIZE: usize = 0x0149;
const OLD_LICENSEE: usize = 0x014B;
const HEADER_CHECKSUM: usize = 0x014D;

/// Bank controller family named by the cartridge type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc30,
    Mbc5,
    Mmm01,
    Mbc6,
    Mbc7,
    PocketCamera,
    Tama5,
    Huc3,
    Huc1,
}

impl ControllerKind {
    /// Map the type byte at 0x0147 to a controller. MBC3 boards with 64 KiB
    /// of RAM are the MBC30 variant.
    pub fn from_codes(cartridge_type: u8, ram_size_code: u8) -> Result<Self, LoadError> {
        let kind = match cartridge_type {
            0x00 | 0x08 | 0x09 => ControllerKind::None,
            0x01..=0x03 => ControllerKind::Mbc1,
            0x05 | 0x06 => ControllerKind::Mbc2,
            0x0B..=0x0D => ControllerKind::Mmm01,
            0x0F..=0x13 if ram_size_code == 0x05 => ControllerKind::Mbc30,
            0x0F..=0x13 => ControllerKind::Mbc3,
            0x19..=0x1E => ControllerKind::Mbc5,
            0x20 => ControllerKind::Mbc6,
            0x22 => ControllerKind::Mbc7,
            0xFC => ControllerKind::PocketCamera,
            0xFD => ControllerKind::Tama5,
            0xFE => ControllerKind::Huc3,
            0xFF => ControllerKind::Huc1,
            code => return Err(LoadError::InvalidCartridgeType { code }),
        };
        Ok(kind)
    }

    pub fn is_supported(self) -> bool {
        matches!(
            self,
            ControllerKind::None
                | ControllerKind::Mbc1
                | ControllerKind::Mbc2
                | ControllerKind::Mbc3
                | ControllerKind::Mbc30
                | ControllerKind::Mbc5
        )
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerKind::None => "ROM only",
            ControllerKind::Mbc1 => "MBC1",
            ControllerKind::Mbc2 => "MBC2",
            ControllerKind::Mbc3 => "MBC3",
            ControllerKind::Mbc30 => "MBC30",
            ControllerKind::Mbc5 => "MBC5",
            ControllerKind::Mmm01 => "MMM01",
            ControllerKind::Mbc6 => "MBC6",
            ControllerKind::Mbc7 => "MBC7",
            ControllerKind::PocketCamera => "Pocket Camera",
            ControllerKind::Tama5 => "TAMA5",
            ControllerKind::Huc3 => "HuC3",
            ControllerKind::Huc1 => "HuC1",
        };
        f.write_str(name)
    }
}

/// Decoded cartridge header (0x0100-0x014F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub title: String,
    /// 0x0134-0x0143 as stored, CGB flag included.
    pub title_bytes: [u8; 16],
    pub cgb_flag: u8,
    /// Two ASCII characters, meaningful when `old_licensee` is 0x33.
    pub new_licensee: [u8; 2],
    pub old_licensee: u8,
    pub sgb_flag: u8,
    pub cartridge_type: u8,
    pub controller: ControllerKind,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    /// ROM size declared by the header, in 16 KiB banks.
    pub rom_banks: usize,
    /// External RAM size in bytes. MBC2 reports its 512 built-in cells.
    pub ram_size: usize,
    pub header_checksum: u8,
    pub computed_checksum: u8,
}

impl CartridgeHeader {
    pub fn parse(rom: &[u8]) -> Result<Self, LoadError> {
        if rom.is_empty() {
            return Err(LoadError::EmptyImage);
        }
        if rom.len() < HEADER_END {
            return Err(LoadError::TruncatedHeader { len: rom.len() });
        }

        let cgb_flag = rom[CGB_FLAG];
        let cartridge_type = rom[CARTRIDGE_TYPE];
        let rom_size_code = rom[ROM_SIZE];
        let ram_size_code = rom[RAM_SIZE];
        let controller = ControllerKind::from_codes(cartridge_type, ram_size_code)?;

        let rom_banks = match rom_size_code {
            0x00..=0x08 => 2usize << rom_size_code,
            0x52 => 72,
            0x53 => 80,
            0x54 => 96,
            code => return Err(LoadError::UnsupportedRomSize { code }),
        };
        let ram_size = match (controller, ram_size_code) {
            (ControllerKind::Mbc2, _) => 0x200,
            (_, 0x00) => 0,
            (_, 0x01) => 0x800,
            (_, 0x02) => 0x2000,
            (_, 0x03) => 0x8000,
            (_, 0x04) => 0x20000,
            (_, 0x05) => 0x10000,
            (_, code) => return Err(LoadError::UnsupportedRamSize { code }),
        };

        // Color cartridges reuse the last title byte as the CGB flag.
        let title_end = if cgb_flag & 0x80 != 0 {
            CGB_FLAG
        } else {
            TITLE_END
        };
        let mut title_bytes = [0u8; 16];
        title_bytes.copy_from_slice(&rom[TITLE_START..TITLE_END]);
        let mut title = &rom[TITLE_START..title_end];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }

        Ok(Self {
            title: String::from_utf8_lossy(title).trim().to_string(),
            title_bytes,
            cgb_flag,
            new_licensee: [rom[NEW_LICENSEE], rom[NEW_LICENSEE + 1]],
            old_licensee: rom[OLD_LICENSEE],
            sgb_flag: rom[SGB_FLAG],
            cartridge_type,
            controller,
            rom_size_code,
            ram_size_code,
            rom_banks,
            ram_size,
            header_checksum: rom[HEADER_CHECKSUM],
            computed_checksum: header_checksum(rom),
        })
    }

    pub fn supports_cgb(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }

    pub fn requires_cgb(&self) -> bool {
        self.cgb_flag == 0xC0
    }

    pub fn supports_sgb(&self) -> bool {
        self.sgb_flag == 0x03
    }

    /// Nintendo as licensee, by either the old code or the new one.
    pub fn licensed_by_nintendo(&self) -> bool {
        match self.old_licensee {
            0x01 => true,
            0x33 => {
                &self.new_licensee == b"01" || u16::from_le_bytes(self.new_licensee) == 0x0001
            }
            _ => false,
        }
    }

    /// Wrapping sum of the 16 title bytes, as the color boot ROM hashes it.
    pub fn title_checksum(&self) -> u8 {
        self.title_bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    pub fn checksum_valid(&self) -> bool {
        self.header_checksum == self.computed_checksum
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cartridge_type,
            0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0x22 | 0xFF
        )
    }

    pub fn has_timer(&self) -> bool {
        matches!(self.cartridge_type, 0x0F | 0x10)
    }

    pub fn has_rumble(&self) -> bool {
        matches!(self.cartridge_type, 0x1C..=0x1E)
    }
}

/// Checksum over 0x0134-0x014C as computed by the boot ROM.
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[TITLE_START..HEADER_CHECKSUM]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[TITLE_START..TITLE_START + 4].copy_from_slice(b"TEST");
        rom[CARTRIDGE_TYPE] = cart_type;
        rom[ROM_SIZE] = rom_code;
        rom[RAM_SIZE] = ram_code;
        rom[HEADER_CHECKSUM] = header_checksum(&rom);
        rom
    }

    #[test]
    fn decodes_sizes_and_title() {
        let header = CartridgeHeader::parse(&image(0x03, 0x05, 0x03)).unwrap();
        assert_eq!(header.title, "TEST");
        assert_eq!(header.controller, ControllerKind::Mbc1);
        assert_eq!(header.rom_banks, 64);
        assert_eq!(header.ram_size, 0x8000);
        assert!(header.has_battery());
        assert!(header.checksum_valid());
    }

    #[test]
    fn mbc30_selected_by_ram_size() {
        let header = CartridgeHeader::parse(&image(0x13, 0x07, 0x05)).unwrap();
        assert_eq!(header.controller, ControllerKind::Mbc30);
        let header = CartridgeHeader::parse(&image(0x13, 0x06, 0x03)).unwrap();
        assert_eq!(header.controller, ControllerKind::Mbc3);
    }

    #[test]
    fn mbc2_ram_is_built_in() {
        let header = CartridgeHeader::parse(&image(0x06, 0x03, 0x00)).unwrap();
        assert_eq!(header.ram_size, 0x200);
    }

    #[test]
    fn cgb_flag_shortens_title() {
        let mut rom = image(0x00, 0x00, 0x00);
        rom[TITLE_START..TITLE_END].copy_from_slice(b"ABCDEFGHIJKLMNOP");
        rom[CGB_FLAG] = 0xC0;
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(header.title, "ABCDEFGHIJKLMNO");
        assert!(header.requires_cgb());
    }

    #[test]
    fn rejects_bad_images() {
        assert_eq!(CartridgeHeader::parse(&[]), Err(LoadError::EmptyImage));
        assert_eq!(
            CartridgeHeader::parse(&[0u8; 0x100]),
            Err(LoadError::TruncatedHeader { len: 0x100 })
        );
        assert_eq!(
            CartridgeHeader::parse(&image(0x04, 0x00, 0x00)),
            Err(LoadError::InvalidCartridgeType { code: 0x04 })
        );
        assert_eq!(
            CartridgeHeader::parse(&image(0x00, 0x09, 0x00)),
            Err(LoadError::UnsupportedRomSize { code: 0x09 })
        );
        assert_eq!(
            CartridgeHeader::parse(&image(0x00, 0x00, 0x06)),
            Err(LoadError::UnsupportedRamSize { code: 0x06 })
        );
    }

    #[test]
    fn licensee_codes() {
        let mut rom = image(0x00, 0x00, 0x00);
        rom[OLD_LICENSEE] = 0x01;
        assert!(CartridgeHeader::parse(&rom).unwrap().licensed_by_nintendo());

        rom[OLD_LICENSEE] = 0x33;
        rom[NEW_LICENSEE..NEW_LICENSEE + 2].copy_from_slice(b"01");
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(&header.new_licensee, b"01");
        assert!(header.licensed_by_nintendo());

        rom[NEW_LICENSEE..NEW_LICENSEE + 2].copy_from_slice(b"08");
        assert!(!CartridgeHeader::parse(&rom).unwrap().licensed_by_nintendo());

        rom[OLD_LICENSEE] = 0x08;
        assert!(!CartridgeHeader::parse(&rom).unwrap().licensed_by_nintendo());
    }

    #[test]
    fn title_checksum_covers_all_sixteen_bytes() {
        let mut rom = image(0x00, 0x00, 0x00);
        rom[TITLE_START..TITLE_END].copy_from_slice(&[0x10; 16]);
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(header.title_checksum(), 0x00);
        rom[CGB_FLAG] = 0x11;
        assert_eq!(CartridgeHeader::parse(&rom).unwrap().title_checksum(), 0x01);
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let mut rom = image(0x00, 0x00, 0x00);
        rom[HEADER_CHECKSUM] ^= 0xFF;
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert!(!header.checksum_valid());
    }
}
