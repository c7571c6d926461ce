//! Dual-bank firmware storage for parts that pick their boot bank from an
//! option-byte flag (STM32U5 `SWAP_BANK`).
//!
//! - [`FlashAccess`]: bank-aware erase/program with scoped unlock, refusing
//!   to touch the image area of the running bank
//! - [`IdentityRegistry`]: firmware id and board name record of each bank
//! - [`swap_now`]: flip the boot bank and launch the option bytes
//! - [`fault`]: blink-forever halt for unrecoverable flash faults

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod fault;
pub mod flash;
pub mod identity;
mod layout;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod swap;

pub use flash::{Error, FlashAccess, FlashControl, ERASED, QUAD_WORD};
pub use identity::{board_name, FirmwareIdentity, IdentityRegistry, BOARD_NAME_LEN, FW_ID_NOT_VALID};
pub use layout::{Bank, BankLayout, BootState};
pub use swap::{swap_now, Reset};
