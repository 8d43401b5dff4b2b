//! Palettes the color boot ROM assigns to monochrome cartridges.
//!
//! Nintendo-licensed titles are identified by the sum of their title bytes
//! (and, for a few colliding sums, by the fourth title character) and mapped
//! to one of the built-in palette combinations. Everything else gets the
//! default combination.

use crate::cartridge::CartridgeHeader;

/// Built-in BGR555 colors, four per palette.
#[rustfmt::skip]
const COLORS: [u16; 120] = [
    0x7FFF, 0x32BF, 0x00D0, 0x0000,
    0x639F, 0x4279, 0x15B0, 0x04CB,
    0x7FFF, 0x6E31, 0x454A, 0x0000,
    0x7FFF, 0x1BEF, 0x0200, 0x0000,
    0x7FFF, 0x421F, 0x1CF2, 0x0000,
    0x7FFF, 0x5294, 0x294A, 0x0000,
    0x7FFF, 0x03FF, 0x012F, 0x0000,
    0x7FFF, 0x03EF, 0x01D6, 0x0000,
    0x7FFF, 0x42B5, 0x3DC8, 0x0000,
    0x7E74, 0x03FF, 0x0180, 0x0000,
    0x67FF, 0x77AC, 0x1A13, 0x2D6B,
    0x7ED6, 0x4BFF, 0x2175, 0x0000,
    0x53FF, 0x4A5F, 0x7E52, 0x0000,
    0x4FFF, 0x7ED2, 0x3A4C, 0x1CE0,
    0x03ED, 0x7FFF, 0x255F, 0x0000,
    0x036A, 0x021F, 0x03FF, 0x7FFF,
    0x7FFF, 0x01DF, 0x0112, 0x0000,
    0x231F, 0x035F, 0x00F2, 0x0009,
    0x7FFF, 0x03EA, 0x011F, 0x0000,
    0x299F, 0x001A, 0x000C, 0x0000,
    0x7FFF, 0x027F, 0x001F, 0x0000,
    0x7FFF, 0x03E0, 0x0206, 0x0120,
    0x7FFF, 0x7EEB, 0x001F, 0x7C00,
    0x7FFF, 0x3FFF, 0x7E00, 0x001F,
    0x7FFF, 0x03FF, 0x001F, 0x0000,
    0x03FF, 0x001F, 0x000C, 0x0000,
    0x7FFF, 0x033F, 0x0193, 0x0000,
    0x0000, 0x4200, 0x037F, 0x7FFF,
    0x7FFF, 0x7E8C, 0x7C00, 0x0000,
    0x7FFF, 0x1BEF, 0x6180, 0x0000,
];

/// Where a combination's palettes start in `COLORS`.
#[derive(Clone, Copy)]
enum Combination {
    /// Whole palette numbers: OBJ0, OBJ1, BG.
    Palettes(usize, usize, usize),
    /// Color offsets, for combinations that straddle two palettes.
    Offsets(usize, usize, usize),
}

impl Combination {
    const fn offsets(self) -> (usize, usize, usize) {
        match self {
            Combination::Palettes(obj0, obj1, bg) => (obj0 * 4, obj1 * 4, bg * 4),
            Combination::Offsets(obj0, obj1, bg) => (obj0, obj1, bg),
        }
    }
}

use Combination::{Offsets, Palettes};

const COMBINATIONS: [Combination; 51] = [
    Palettes(4, 4, 29),
    Palettes(18, 18, 18),
    Palettes(20, 20, 20),
    Palettes(24, 24, 24),
    Palettes(9, 9, 9),
    Palettes(0, 0, 0),
    Palettes(27, 27, 27),
    Palettes(5, 5, 5),
    Palettes(12, 12, 12),
    Palettes(26, 26, 26),
    Palettes(16, 8, 8),
    Palettes(4, 28, 28),
    Palettes(4, 2, 2),
    Palettes(3, 4, 4),
    Palettes(4, 29, 29),
    Palettes(28, 4, 28),
    Palettes(2, 17, 2),
    Palettes(16, 16, 8),
    Palettes(4, 4, 7),
    Palettes(4, 4, 18),
    Palettes(4, 4, 20),
    Palettes(19, 19, 9),
    Offsets(4 * 4 - 1, 4 * 4 - 1, 11 * 4),
    Palettes(17, 17, 2),
    Palettes(4, 4, 2),
    Palettes(4, 4, 3),
    Palettes(28, 28, 0),
    Palettes(3, 3, 0),
    Palettes(0, 0, 1),
    Palettes(18, 22, 18),
    Palettes(20, 22, 20),
    Palettes(24, 22, 24),
    Palettes(16, 22, 8),
    Palettes(17, 4, 13),
    Offsets(28 * 4 - 1, 0, 14 * 4),
    Offsets(28 * 4 - 1, 4 * 4, 15 * 4),
    Palettes(19, 22, 9),
    Palettes(16, 28, 10),
    Palettes(4, 23, 28),
    Palettes(17, 22, 2),
    Palettes(4, 0, 2),
    Palettes(4, 28, 3),
    Palettes(28, 3, 0),
    Palettes(3, 28, 4),
    Palettes(21, 28, 4),
    Palettes(3, 28, 0),
    Palettes(25, 3, 28),
    Palettes(0, 28, 8),
    Palettes(4, 3, 28),
    Palettes(28, 3, 6),
    Palettes(4, 28, 29),
];

/// Title sums the boot ROM recognises. Entries past `UNAMBIGUOUS_SUMS` are
/// shared by several titles and need the fourth title byte.
#[rustfmt::skip]
const TITLE_SUMS: [u8; 79] = [
    0x00, 0x88, 0x16, 0x36, 0xD1, 0xDB, 0xF2, 0x3C, 0x8C, 0x92, 0x3D, 0x5C, 0x58, 0xC9, 0x3E, 0x70,
    0x1D, 0x59, 0x69, 0x19, 0x35, 0xA8, 0x14, 0xAA, 0x75, 0x95, 0x99, 0x34, 0x6F, 0x15, 0xFF, 0x97,
    0x4B, 0x90, 0x17, 0x10, 0x39, 0xF7, 0xF6, 0xA2, 0x49, 0x4E, 0x43, 0x68, 0xE0, 0x8B, 0xF0, 0xCE,
    0x0C, 0x29, 0xE8, 0xB7, 0x86, 0x9A, 0x52, 0x01, 0x9D, 0x71, 0x9C, 0xBD, 0x5D, 0x6D, 0x67, 0x3F,
    0x6B,
    0xB3, 0x46, 0x28, 0xA5, 0xC6, 0xD3, 0x27, 0x61, 0x18, 0x66, 0x6A, 0xBF, 0x0D, 0xF4,
];

const UNAMBIGUOUS_SUMS: usize = 65;

/// Fourth title byte per ambiguous sum, one row per candidate.
const FOURTH_BYTE_ROWS: [&[u8]; 3] = [b"BEFAARBEKEK R-", b"URAR INAILICE ", b"R"];

/// Combination per title, indexed by sum position plus 14 per row.
#[rustfmt::skip]
const COMBINATION_IDS: [u8; 94] = [
    0, 4, 5, 35, 34, 3, 31, 15, 10, 5, 19, 36, 7, 37, 30, 44,
    21, 32, 31, 20, 5, 33, 13, 14, 5, 29, 5, 18, 9, 3, 2, 26,
    25, 25, 41, 42, 26, 45, 42, 45, 36, 38, 26, 42, 30, 41, 34, 34,
    5, 42, 6, 5, 33, 25, 42, 42, 40, 2, 16, 25, 42, 42, 5, 0,
    39, 36, 22, 25, 6, 32, 12, 36, 11, 39, 18, 39, 24, 31, 50, 17,
    46, 6, 27, 0, 47, 41, 41, 0, 0, 19, 34, 23, 18, 29,
];

/// BG palette 0 and OBJ palettes 0-1 as BGR555 colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityPalettes {
    pub bg0: [u16; 4],
    pub obj0: [u16; 4],
    pub obj1: [u16; 4],
}

impl CompatibilityPalettes {
    pub const DEFAULT: Self = Self::from_combination(0);

    /// Palettes the boot ROM would choose for `header`.
    pub fn for_header(header: &CartridgeHeader) -> Self {
        if !header.licensed_by_nintendo() {
            return Self::DEFAULT;
        }
        combination_id(header.title_checksum(), header.title_bytes[3])
            .map_or(Self::DEFAULT, Self::from_combination)
    }

    const fn from_combination(id: usize) -> Self {
        let (obj0, obj1, bg0) = COMBINATIONS[id].offsets();
        Self {
            bg0: palette_at(bg0),
            obj0: palette_at(obj0),
            obj1: palette_at(obj1),
        }
    }
}

impl Default for CompatibilityPalettes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const fn palette_at(offset: usize) -> [u16; 4] {
    [
        COLORS[offset],
        COLORS[offset + 1],
        COLORS[offset + 2],
        COLORS[offset + 3],
    ]
}

fn combination_id(title_sum: u8, fourth_byte: u8) -> Option<usize> {
    let position = TITLE_SUMS.iter().position(|&sum| sum == title_sum)?;
    let index = if position < UNAMBIGUOUS_SUMS {
        position
    } else {
        let column = position - UNAMBIGUOUS_SUMS;
        let row = FOURTH_BYTE_ROWS
            .iter()
            .position(|row| row.get(column) == Some(&fourth_byte))
            .unwrap_or(0);
        position + 14 * row
    };
    Some(COMBINATION_IDS[index] as usize)
}
