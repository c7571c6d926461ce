//! Reception of one firmware image into the inactive bank.

use dual_bank::{Bank, Error, FlashAccess, FlashControl, IdentityRegistry, ERASED, QUAD_WORD};
use embassy_time::{Duration, Instant};
use embedded_storage::nor_flash::NorFlash;

use crate::checksum::bank_crc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Receiving,
    /// Last byte received, flushing and checking the image.
    Completing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartOutcome {
    /// Target bank erased, ready for image bytes.
    Accepted,
    /// Zero-length image. Acknowledged like an accepted one, but nothing is
    /// erased and the session stays idle.
    Empty,
    /// Above the size limit. Nothing was erased.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEvent {
    Progress { received: u32 },
    /// Whole image written and its CRC matched.
    Completed { bank: Bank, crc: u32 },
    CrcMismatch { expected: u32, computed: u32 },
    /// More bytes than announced. The session was dropped.
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    Disconnected,
    Timeout,
}

pub struct TransferSession {
    state: SessionState,
    bank: Bank,
    expected_size: u32,
    expected_crc: u32,
    bytes_received: u32,
    staged: [u8; QUAD_WORD],
    staged_len: usize,
    last_activity: Option<Instant>,
}

impl TransferSession {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
            bank: Bank::Two,
            expected_size: 0,
            expected_crc: 0,
            bytes_received: 0,
            staged: [ERASED; QUAD_WORD],
            staged_len: 0,
            last_activity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while writes are image bytes rather than commands.
    pub fn is_active(&self) -> bool {
        self.expected_size != 0
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    /// Erase the inactive bank for an image of `size` bytes and start receiving.
    ///
    /// The bank's identity record is erased first, so the bank stays ineligible
    /// for a swap until this upload completes. An erase failure leaves the
    /// session idle and is returned as is.
    pub fn start<C: FlashControl, F: NorFlash>(
        &mut self,
        flash: &mut FlashAccess<C, F>,
        identity: &IdentityRegistry,
        size: u32,
        crc: u32,
        max_size: u32,
        now: Instant,
    ) -> Result<StartOutcome, Error> {
        self.reset();
        if size > max_size {
            warn!("refusing image of {} bytes (max {})", size, max_size);
            return Ok(StartOutcome::Rejected);
        }
        if size == 0 {
            debug!("empty upload, staying idle");
            return Ok(StartOutcome::Empty);
        }

        let bank = flash.target_bank();
        info!("receiving {} bytes into bank {}, crc {:#x}", size, bank.number(), crc);
        identity.invalidate(flash, bank)?;
        flash.erase(bank, 0, size - 1)?;

        self.state = SessionState::Receiving;
        self.bank = bank;
        self.expected_size = size;
        self.expected_crc = crc;
        self.last_activity = Some(now);
        Ok(StartOutcome::Accepted)
    }

    /// Append one chunk of image bytes.
    pub fn receive<C: FlashControl, F: NorFlash>(
        &mut self,
        flash: &mut FlashAccess<C, F>,
        data: &[u8],
        now: Instant,
    ) -> Result<SessionEvent, Error> {
        let remaining = self.expected_size - self.bytes_received;
        if data.len() as u32 > remaining {
            warn!(
                "chunk of {} bytes overflows image ({} of {} received)",
                data.len(),
                self.bytes_received,
                self.expected_size
            );
            self.reset();
            return Ok(SessionEvent::Overflow);
        }

        if let Err(e) = self.stage(flash, data) {
            self.reset();
            return Err(e);
        }
        self.last_activity = Some(now);

        if self.bytes_received < self.expected_size {
            trace!("{}/{} bytes", self.bytes_received, self.expected_size);
            return Ok(SessionEvent::Progress {
                received: self.bytes_received,
            });
        }

        self.state = SessionState::Completing;
        let result = self.complete(flash);
        self.reset();
        result
    }

    fn stage<C: FlashControl, F: NorFlash>(&mut self, flash: &mut FlashAccess<C, F>, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let take = (QUAD_WORD - self.staged_len).min(data.len());
            self.staged[self.staged_len..self.staged_len + take].copy_from_slice(&data[..take]);
            self.staged_len += take;
            self.bytes_received += take as u32;
            data = &data[take..];
            if self.staged_len == QUAD_WORD {
                self.flush(flash)?;
            }
        }
        Ok(())
    }

    /// Program the staged quad-word, padding it with the erased value.
    fn flush<C: FlashControl, F: NorFlash>(&mut self, flash: &mut FlashAccess<C, F>) -> Result<(), Error> {
        self.staged[self.staged_len..].fill(ERASED);
        let offset = self.bytes_received - self.staged_len as u32;
        flash.write(self.bank, offset, &self.staged)?;
        self.staged_len = 0;
        Ok(())
    }

    fn complete<C: FlashControl, F: NorFlash>(&mut self, flash: &mut FlashAccess<C, F>) -> Result<SessionEvent, Error> {
        if self.staged_len > 0 {
            self.flush(flash)?;
        }
        let computed = bank_crc(flash, self.bank, self.expected_size)?;
        if computed == self.expected_crc {
            info!("image crc {:#x} ok, bank {} is valid", computed, self.bank.number());
            Ok(SessionEvent::Completed {
                bank: self.bank,
                crc: computed,
            })
        } else {
            warn!("image crc {:#x} does not match {:#x}", computed, self.expected_crc);
            Ok(SessionEvent::CrcMismatch {
                expected: self.expected_crc,
                computed,
            })
        }
    }

    /// Drop an unfinished upload. Returns whether one was in progress.
    pub fn abort(&mut self, reason: AbortReason) -> bool {
        if !self.is_active() {
            return false;
        }
        warn!(
            "upload aborted ({:?}) after {} of {} bytes",
            reason, self.bytes_received, self.expected_size
        );
        self.reset();
        true
    }

    /// Whether no chunk arrived within `timeout` of the last one.
    pub fn expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.last_activity {
            Some(last) if self.is_active() => now.saturating_duration_since(last) >= timeout,
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.expected_size = 0;
        self.expected_crc = 0;
        self.bytes_received = 0;
        self.staged_len = 0;
        self.last_activity = None;
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}
