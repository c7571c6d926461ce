//! Text replies of the console commands.

use core::fmt::Write;

use dual_bank::Bank;
use heapless::String;

use crate::config::FotaConfig;
use crate::consts::REPLY_CAPACITY;

/// Factory identifiers of the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId {
    /// 96-bit unique id, as laid out in memory.
    pub uid: [u8; 12],
    /// `DBGMCU_IDCODE`, only the low 12 bits are reported.
    pub mcu_id: u32,
}

/// Text reply of at most [`REPLY_CAPACITY`] bytes.
pub type Reply = String<REPLY_CAPACITY>;

/// Logs when `out` filled up before the reply was complete.
fn finish(out: Reply, written: core::fmt::Result) -> Reply {
    if written.is_err() {
        warn!("console reply truncated at {} bytes", out.len());
    }
    out
}

/// Command list.
pub fn help() -> Reply {
    let mut out = Reply::new();
    let written = out
        .push_str("help\nversionFw\ninfo\nuid\nreadBanksFwId\nbanksSwap\nsetName<name>\n")
        .map_err(|_| core::fmt::Error);
    finish(out, written)
}

/// `<mcu>_<package>_<major>.<minor>.<patch>`
pub fn version_fw(config: &FotaConfig) -> Reply {
    let mut out = Reply::new();
    let v = config.version;
    let written = write!(
        out,
        "{}_{}_{}.{}.{}\r\n",
        config.mcu_name, config.package_name, v.major, v.minor, v.patch
    );
    finish(out, written)
}

/// Banner with package, version, board and running bank.
pub fn info(config: &FotaConfig, active: Bank) -> Reply {
    let mut out = Reply::new();
    let v = config.version;
    let written = write!(
        out,
        "\r\nSTMicroelectronics {}:\n\tVersion {}.{}.{}\n\t{} board\nCurrent Bank ={}\n",
        config.package_name,
        v.major,
        v.minor,
        v.patch,
        config.board_description,
        active.number()
    );
    finish(out, written)
}

/// Unique id as three byte-swapped words, then the 12-bit device id.
pub fn uid(device: &DeviceId) -> Reply {
    let mut out = Reply::new();
    let mut written = Ok(());
    for word in device.uid.chunks_exact(4) {
        for byte in word.iter().rev() {
            written = written.and(write!(out, "{:02X}", byte));
        }
    }
    written = written.and(write!(out, "_{:03X}\n", device.mcu_id & 0xFFF));
    finish(out, written)
}

/// Answer to `banksSwap`.
pub fn swap_reply(accepted: bool, target: Bank) -> Reply {
    let mut out = Reply::new();
    let written = if accepted {
        write!(out, "Swapping to bank {} after disconnection\n", target.number())
    } else {
        write!(out, "Bank {} holds no valid firmware\n", target.number())
    };
    finish(out, written)
}
