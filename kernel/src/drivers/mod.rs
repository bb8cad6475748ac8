//! Device drivers consumed by the core: the text console, the PS/2
//! keyboard, and (bare metal only) ATA PIO storage.

pub mod console;
pub mod keyboard;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod ata;
