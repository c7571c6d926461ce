//! Wire constants of the console characteristic protocol.

pub const CMD_HELP: &[u8] = b"help";
pub const CMD_INFO: &[u8] = b"info";
pub const CMD_VERSION_FW: &[u8] = b"versionFw";
pub const CMD_UID: &[u8] = b"uid";
pub const CMD_UPGRADE_FW: &[u8] = b"upgradeFw";
pub const CMD_READ_BANKS_FW_ID: &[u8] = b"readBanksFwId";
pub const CMD_BANKS_SWAP: &[u8] = b"banksSwap";
pub const CMD_SET_NAME: &[u8] = b"setName";

/// `upgradeFw` frame: opcode, then size and CRC as little-endian u32.
pub const UPGRADE_SIZE_OFFSET: usize = 9;
pub const UPGRADE_CRC_OFFSET: usize = 13;
pub const UPGRADE_FRAME_LEN: usize = 17;

/// Sent after the last image byte when the CRC matched.
pub const STATUS_OK: u8 = 0x01;
/// Sent after the last image byte on CRC mismatch or overflow (-1).
pub const STATUS_FAILED: u8 = 0xFF;

/// Largest single console reply.
pub const REPLY_CAPACITY: usize = 256;
