//! Per-bank firmware identity records.
//!
//! Each bank carries one 16-byte record at the start of its reserved data
//! area: `firmware_id` (u16 LE), `board_name` (8 bytes), 6 padding bytes left
//! erased. An erased record reads back as [`FW_ID_NOT_VALID`].

use embedded_storage::nor_flash::NorFlash;

use crate::flash::{Error, FlashAccess, FlashControl, ERASED, QUAD_WORD};
use crate::layout::{Bank, BankLayout};

/// Firmware id of an empty or erased record.
pub const FW_ID_NOT_VALID: u16 = 0xFFFF;

/// Stored board name length, NUL padded.
pub const BOARD_NAME_LEN: usize = 8;

/// Identity of the image stored in one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareIdentity {
    pub firmware_id: u16,
    pub board_name: [u8; BOARD_NAME_LEN],
}

impl FirmwareIdentity {
    /// Record for `firmware_id` with a raw, padded board name.
    pub const fn new(firmware_id: u16, board_name: [u8; BOARD_NAME_LEN]) -> Self {
        Self {
            firmware_id,
            board_name,
        }
    }

    /// The 16-byte record as programmed into flash.
    pub fn to_bytes(&self) -> [u8; QUAD_WORD] {
        let mut record = [ERASED; QUAD_WORD];
        record[0..2].copy_from_slice(&self.firmware_id.to_le_bytes());
        record[2..2 + BOARD_NAME_LEN].copy_from_slice(&self.board_name);
        record
    }

    /// `None` for an erased or sentinel record.
    pub fn from_bytes(record: &[u8; QUAD_WORD]) -> Option<Self> {
        let firmware_id = u16::from_le_bytes([record[0], record[1]]);
        if firmware_id == FW_ID_NOT_VALID {
            return None;
        }
        let mut board_name = [0; BOARD_NAME_LEN];
        board_name.copy_from_slice(&record[2..2 + BOARD_NAME_LEN]);
        Some(Self {
            firmware_id,
            board_name,
        })
    }

    /// Stored board name, without NUL or erased padding. `None` if never set.
    pub fn name(&self) -> Option<&[u8]> {
        if self.board_name[0] == ERASED || self.board_name[0] == 0 {
            return None;
        }
        let len = self
            .board_name
            .iter()
            .position(|&b| b == 0 || b == ERASED)
            .unwrap_or(BOARD_NAME_LEN);
        Some(&self.board_name[..len])
    }
}

/// Build a fixed-size board name, truncating at 8 bytes and padding with NUL.
pub fn board_name(name: &[u8]) -> [u8; BOARD_NAME_LEN] {
    let mut out = [0; BOARD_NAME_LEN];
    let len = name.len().min(BOARD_NAME_LEN);
    out[..len].copy_from_slice(&name[..len]);
    out
}

/// Reads and writes the identity record of each bank.
pub struct IdentityRegistry {
    slot_offset: u32,
}

impl IdentityRegistry {
    /// Records placed at the start of each bank's reserved data area.
    pub const fn new(layout: &BankLayout) -> Self {
        Self {
            slot_offset: layout.data_offset(),
        }
    }

    /// Record of `bank`, `None` when erased.
    pub fn read<C: FlashControl, F: NorFlash>(
        &self,
        flash: &mut FlashAccess<C, F>,
        bank: Bank,
    ) -> Result<Option<FirmwareIdentity>, Error> {
        let mut record = [0; QUAD_WORD];
        flash.read(bank, self.slot_offset, &mut record)?;
        Ok(FirmwareIdentity::from_bytes(&record))
    }

    /// Firmware ids of bank 1 and bank 2, [`FW_ID_NOT_VALID`] when empty.
    pub fn firmware_ids<C: FlashControl, F: NorFlash>(
        &self,
        flash: &mut FlashAccess<C, F>,
    ) -> Result<(u16, u16), Error> {
        let id = |identity: Option<FirmwareIdentity>| identity.map_or(FW_ID_NOT_VALID, |i| i.firmware_id);
        let bank1 = id(self.read(flash, Bank::One)?);
        let bank2 = id(self.read(flash, Bank::Two)?);
        Ok((bank1, bank2))
    }

    /// Erase and reprogram the record of `bank`.
    pub fn write<C: FlashControl, F: NorFlash>(
        &self,
        flash: &mut FlashAccess<C, F>,
        bank: Bank,
        firmware_id: u16,
        board_name: [u8; BOARD_NAME_LEN],
    ) -> Result<(), Error> {
        let record = FirmwareIdentity::new(firmware_id, board_name).to_bytes();
        flash.erase(bank, self.slot_offset, self.slot_offset + QUAD_WORD as u32 - 1)?;
        flash.write(bank, self.slot_offset, &record)?;
        info!("bank {} identity set to fw id {:#x}", bank.number(), firmware_id);
        Ok(())
    }

    /// Erase the record of `bank`, leaving it without a valid firmware id.
    pub fn invalidate<C: FlashControl, F: NorFlash>(
        &self,
        flash: &mut FlashAccess<C, F>,
        bank: Bank,
    ) -> Result<(), Error> {
        flash.erase(bank, self.slot_offset, self.slot_offset + QUAD_WORD as u32 - 1)?;
        debug!("bank {} identity cleared", bank.number());
        Ok(())
    }

    /// Rewrite the running bank's record if it does not match `firmware_id`
    /// or `board_name`. A `None` name keeps the stored one.
    ///
    /// Returns whether flash was written.
    pub fn update_active<C: FlashControl, F: NorFlash>(
        &self,
        flash: &mut FlashAccess<C, F>,
        firmware_id: u16,
        board_name: Option<[u8; BOARD_NAME_LEN]>,
    ) -> Result<bool, Error> {
        let bank = flash.active_bank();
        let stored = self.read(flash, bank)?;

        let name = match (board_name, stored) {
            (Some(name), _) => name,
            (None, Some(stored)) => stored.board_name,
            (None, None) => [ERASED; BOARD_NAME_LEN],
        };
        if let Some(stored) = stored {
            if stored.firmware_id == firmware_id && stored.board_name == name {
                return Ok(false);
            }
        }

        debug!("updating identity of running bank {}", bank.number());
        self.write(flash, bank, firmware_id, name)?;
        Ok(true)
    }
}
