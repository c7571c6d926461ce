//! RAM-backed stand-ins for the flash controller, used by host tests.

use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::flash::{Error, FlashControl, ERASED, QUAD_WORD};
use crate::swap::Reset;

/// One flash bank of `N` bytes with `PAGE`-byte erase pages.
///
/// Programming only succeeds on erased bytes, as on the real part.
pub struct RamFlash<const N: usize, const PAGE: usize> {
    bytes: [u8; N],
    fail_erase: bool,
    fail_program_at: Option<u32>,
    erase_calls: usize,
}

impl<const N: usize, const PAGE: usize> RamFlash<N, PAGE> {
    /// A fully erased bank.
    pub fn new() -> Self {
        Self {
            bytes: [ERASED; N],
            fail_erase: false,
            fail_program_at: None,
            erase_calls: 0,
        }
    }

    /// Make every following erase fail.
    pub fn fail_erase(&mut self, fail: bool) {
        self.fail_erase = fail;
    }

    /// Make the program operation covering `offset` fail.
    pub fn fail_program_at(&mut self, offset: Option<u32>) {
        self.fail_program_at = offset;
    }

    /// Erase operations seen by the driver, failed ones included.
    pub fn erase_calls(&self) -> usize {
        self.erase_calls
    }

    /// Raw bank contents.
    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const N: usize, const PAGE: usize> Default for RamFlash<N, PAGE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const PAGE: usize> ErrorType for RamFlash<N, PAGE> {
    type Error = NorFlashErrorKind;
}

impl<const N: usize, const PAGE: usize> ReadNorFlash for RamFlash<N, PAGE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > N {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        bytes.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize, const PAGE: usize> NorFlash for RamFlash<N, PAGE> {
    const WRITE_SIZE: usize = QUAD_WORD;
    const ERASE_SIZE: usize = PAGE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % PAGE != 0 || to % PAGE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if from > to || to > N {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.erase_calls += 1;
        if self.fail_erase {
            return Err(NorFlashErrorKind::Other);
        }
        self.bytes[from..to].fill(ERASED);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if start % QUAD_WORD != 0 || bytes.len() % QUAD_WORD != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if end > N {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        if let Some(fail) = self.fail_program_at {
            if (start..end).contains(&(fail as usize)) {
                return Err(NorFlashErrorKind::Other);
            }
        }
        if self.bytes[start..end].iter().any(|&b| b != ERASED) {
            return Err(NorFlashErrorKind::Other);
        }
        self.bytes[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// Flash control registers, option bytes and instruction cache.
pub struct SimControl {
    unlock_depth: i32,
    options_unlocked: bool,
    icache_enabled: bool,
    swap_bank: bool,
    pending_swap_bank: Option<bool>,
    launches: usize,
    fail_option_program: bool,
}

impl SimControl {
    /// Locked, cache on, running from bank 1.
    pub fn new() -> Self {
        Self {
            unlock_depth: 0,
            options_unlocked: false,
            icache_enabled: true,
            swap_bank: false,
            pending_swap_bank: None,
            launches: 0,
            fail_option_program: false,
        }
    }

    /// Preset the `SWAP_BANK` option byte.
    pub fn set_swap_bank(&mut self, swapped: bool) {
        self.swap_bank = swapped;
    }

    /// Make option-byte programming fail.
    pub fn fail_option_program(&mut self, fail: bool) {
        self.fail_option_program = fail;
    }

    /// Unlocks not yet matched by a lock.
    pub fn unlock_depth(&self) -> i32 {
        self.unlock_depth
    }

    /// Whether option bytes are currently unlocked.
    pub fn options_unlocked(&self) -> bool {
        self.options_unlocked
    }

    /// Whether the instruction cache is on.
    pub fn icache_enabled(&self) -> bool {
        self.icache_enabled
    }

    /// Number of option-byte launches, i.e. resets caused by a swap.
    pub fn launches(&self) -> usize {
        self.launches
    }
}

impl Default for SimControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashControl for SimControl {
    fn unlock(&mut self) {
        self.unlock_depth += 1;
    }

    fn lock(&mut self) {
        self.unlock_depth -= 1;
    }

    fn disable_icache(&mut self) -> Result<(), Error> {
        self.icache_enabled = false;
        Ok(())
    }

    fn enable_icache(&mut self) -> Result<(), Error> {
        self.icache_enabled = true;
        Ok(())
    }

    fn unlock_option_bytes(&mut self) {
        self.options_unlocked = true;
    }

    fn lock_option_bytes(&mut self) {
        self.options_unlocked = false;
    }

    fn swap_bank(&mut self) -> bool {
        self.swap_bank
    }

    fn program_swap_bank(&mut self, swapped: bool) -> Result<(), Error> {
        if self.fail_option_program || !self.options_unlocked || self.unlock_depth <= 0 {
            return Err(Error::OptionBytes);
        }
        self.pending_swap_bank = Some(swapped);
        Ok(())
    }

    fn launch_option_bytes(&mut self) -> Result<(), Error> {
        if !self.options_unlocked {
            return Err(Error::OptionBytes);
        }
        if let Some(swapped) = self.pending_swap_bank.take() {
            self.swap_bank = swapped;
        }
        self.launches += 1;
        Ok(())
    }
}

/// Counts requested system resets.
#[derive(Default)]
pub struct SimReset {
    resets: usize,
}

impl SimReset {
    /// Resets requested so far.
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Reset for SimReset {
    fn sys_reset(&mut self) {
        self.resets += 1;
    }
}
