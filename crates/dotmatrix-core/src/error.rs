use thiserror::Error;

use crate::cartridge::ControllerKind;

/// A cartridge uses a bank controller that is recognised but not emulated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported bank controller {kind} (cartridge type {code:#04x})")]
pub struct UnsupportedBankController {
    pub kind: ControllerKind,
    pub code: u8,
}

/// Reasons a cartridge or boot image is rejected by `Machine::load`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("cartridge image is empty")]
    EmptyImage,
    #[error("cartridge image is {len} bytes, too short to hold a header")]
    TruncatedHeader { len: usize },
    #[error("invalid cartridge type {code:#04x}")]
    InvalidCartridgeType { code: u8 },
    #[error("unsupported ROM size code {code:#04x}")]
    UnsupportedRomSize { code: u8 },
    #[error("unsupported RAM size code {code:#04x}")]
    UnsupportedRamSize { code: u8 },
    #[error("boot image is {len} bytes, expected {expected}")]
    InvalidBootRom { len: usize, expected: usize },
    #[error(transparent)]
    UnsupportedBankController(#[from] UnsupportedBankController),
}
