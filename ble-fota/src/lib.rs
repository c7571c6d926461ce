//! Firmware-over-the-air receiver for the BLE console characteristic.
//!
//! A [`FotaController`] owns the bank flash and handles every write to the
//! characteristic: console commands, the `upgradeFw` start frame and the raw
//! image bytes that follow it. Received images land in the inactive bank and
//! are checked with the STM32 hardware CRC before the bank is marked valid.
//! Bank swaps and reboots are deferred until the central disconnects and run
//! from [`FotaController::poll`].

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod checksum;
pub mod command;
pub mod config;
pub mod console;
pub mod consts;
mod controller;
pub mod session;

pub use checksum::{bank_crc, image_crc, ImageCrc};
pub use command::{Command, UpgradeRequest};
pub use config::{FotaConfig, Version};
pub use console::DeviceId;
pub use controller::{DeferredAction, Fatal, FotaController, Notifier};
pub use session::{AbortReason, SessionEvent, SessionState, StartOutcome, TransferSession};
