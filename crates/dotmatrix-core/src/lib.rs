//! Core emulation library for dotmatrix.
//!
//! Modules are organized by hardware component.

/// Cartridge header parsing and bank controller implementations.
pub mod cartridge;
/// SM83 CPU core and opcode descriptor tables.
pub mod cpu;
/// Load-time error types.
pub mod error;
/// Hardware variant selection.
pub mod hardware;
/// Joypad latch (P1 register).
pub mod input;
/// Interrupt request and enable registers.
pub mod interrupts;
/// Top-level machine owning every component.
pub mod machine;
/// Memory management unit and address decoding.
pub mod mmu;
/// Pixel processing unit.
pub mod ppu;
/// Serial port without a link partner.
pub mod serial;
/// Sound register file.
pub mod sound;
/// Divider and programmable timer.
pub mod timer;

pub use cartridge::{Cartridge, CartridgeHeader, ControllerKind};
pub use error::{LoadError, UnsupportedBankController};
pub use hardware::HardwareMode;
pub use input::Button;
pub use machine::Machine;
