//! Parsing of writes to the console characteristic.

use crate::consts::*;

/// Start frame of a firmware upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpgradeRequest {
    pub size: u32,
    pub crc: u32,
    /// CRC exactly as sent by the client, echoed back in the reply.
    pub crc_bytes: [u8; 4],
}

impl UpgradeRequest {
    /// Echo of the client's CRC, telling it to start streaming.
    pub fn accept_reply(&self) -> [u8; 4] {
        self.crc_bytes
    }

    /// Echo with the second byte forced to differ, which the client reads as
    /// a refused upload.
    pub fn reject_reply(&self) -> [u8; 4] {
        let [b0, b1, b2, b3] = self.crc_bytes;
        [b0, if b1 != 0 { 0 } else { 1 }, b2, b3]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command<'a> {
    Help,
    Info,
    VersionFw,
    Uid,
    UpgradeFw(UpgradeRequest),
    ReadBanksFwId,
    BanksSwap,
    /// New board name, line terminators stripped.
    SetName(&'a [u8]),
    Unknown(&'a [u8]),
}

impl<'a> Command<'a> {
    /// Prefix match, as the console does. Only valid outside an upload.
    pub fn parse(data: &'a [u8]) -> Self {
        if data.starts_with(CMD_UPGRADE_FW) {
            return match parse_upgrade(data) {
                Some(request) => Command::UpgradeFw(request),
                None => Command::Unknown(data),
            };
        }
        if let Some(name) = data.strip_prefix(CMD_SET_NAME) {
            return Command::SetName(trim_line(name));
        }

        if data.starts_with(CMD_HELP) {
            Command::Help
        } else if data.starts_with(CMD_INFO) {
            Command::Info
        } else if data.starts_with(CMD_VERSION_FW) {
            Command::VersionFw
        } else if data.starts_with(CMD_UID) {
            Command::Uid
        } else if data.starts_with(CMD_READ_BANKS_FW_ID) {
            Command::ReadBanksFwId
        } else if data.starts_with(CMD_BANKS_SWAP) {
            Command::BanksSwap
        } else {
            Command::Unknown(data)
        }
    }
}

fn parse_upgrade(data: &[u8]) -> Option<UpgradeRequest> {
    if data.len() < UPGRADE_FRAME_LEN {
        return None;
    }
    let size_bytes: [u8; 4] = data[UPGRADE_SIZE_OFFSET..UPGRADE_CRC_OFFSET].try_into().ok()?;
    let crc_bytes: [u8; 4] = data[UPGRADE_CRC_OFFSET..UPGRADE_FRAME_LEN].try_into().ok()?;
    Some(UpgradeRequest {
        size: u32::from_le_bytes(size_bytes),
        crc: u32::from_le_bytes(crc_bytes),
        crc_bytes,
    })
}

fn trim_line(mut data: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n' | 0] = data {
        data = rest;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_frame(size: u32, crc: u32) -> [u8; UPGRADE_FRAME_LEN] {
        let mut frame = [0u8; UPGRADE_FRAME_LEN];
        frame[..9].copy_from_slice(CMD_UPGRADE_FW);
        frame[9..13].copy_from_slice(&size.to_le_bytes());
        frame[13..17].copy_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn parses_upgrade_frame() {
        let frame = upgrade_frame(1024, 0xDEAD_BEEF);
        let Command::UpgradeFw(request) = Command::parse(&frame) else {
            panic!("not an upgrade command");
        };
        assert_eq!(request.size, 1024);
        assert_eq!(request.crc, 0xDEAD_BEEF);
        assert_eq!(request.accept_reply(), [0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn short_upgrade_frame_is_unknown() {
        let frame = upgrade_frame(1024, 0);
        assert_eq!(Command::parse(&frame[..16]), Command::Unknown(&frame[..16]));
    }

    #[test]
    fn reject_reply_differs_in_second_byte() {
        let frame = upgrade_frame(1, 0xDEAD_BEEF);
        let Command::UpgradeFw(request) = Command::parse(&frame) else {
            panic!("not an upgrade command");
        };
        assert_eq!(request.reject_reply(), [0xEF, 0x00, 0xAD, 0xDE]);

        let frame = upgrade_frame(1, 0x1234_0078);
        let Command::UpgradeFw(request) = Command::parse(&frame) else {
            panic!("not an upgrade command");
        };
        assert_eq!(request.reject_reply(), [0x78, 0x01, 0x34, 0x12]);
    }

    #[test]
    fn text_commands_match_by_prefix() {
        assert_eq!(Command::parse(b"help\r\n"), Command::Help);
        assert_eq!(Command::parse(b"info"), Command::Info);
        assert_eq!(Command::parse(b"versionFw\n"), Command::VersionFw);
        assert_eq!(Command::parse(b"uid"), Command::Uid);
        assert_eq!(Command::parse(b"readBanksFwId"), Command::ReadBanksFwId);
        assert_eq!(Command::parse(b"banksSwap"), Command::BanksSwap);
        assert_eq!(Command::parse(b"setNameBOXPRO\r\n"), Command::SetName(b"BOXPRO"));
        assert_eq!(Command::parse(b"hello"), Command::Unknown(b"hello"));
    }
}
