//! Bank-aware erase/program access to the two firmware banks.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::layout::{Bank, BankLayout, BootState};

/// Program unit of the flash controller.
pub const QUAD_WORD: usize = 16;

/// Value of an erased flash byte.
pub const ERASED: u8 = 0xFF;

/// Flash and option-byte failures. All of them leave flash in an unknown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Erase,
    Program,
    Read,
    /// Offset or length is not a multiple of [`QUAD_WORD`] or of the page size.
    NotAligned,
    /// Range falls outside the bank.
    OutOfBounds,
    /// Attempt to erase or program the image area of the running bank.
    ActiveBank,
    /// Instruction cache could not be disabled or re-enabled.
    Cache,
    OptionBytes,
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

impl From<NorFlashErrorKind> for Error {
    fn from(kind: NorFlashErrorKind) -> Self {
        Error::from_kind(kind, Error::Program)
    }
}

impl Error {
    fn from_kind(kind: NorFlashErrorKind, fallback: Error) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => Error::NotAligned,
            NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
            _ => fallback,
        }
    }
}

/// Flash controller registers that the `NorFlash` traits do not cover.
pub trait FlashControl {
    /// Enable writes to the flash control register.
    fn unlock(&mut self);
    /// Disable writes again. Must be safe to call while already locked.
    fn lock(&mut self);

    /// The instruction cache must be off while cacheable flash is modified.
    fn disable_icache(&mut self) -> Result<(), Error>;
    fn enable_icache(&mut self) -> Result<(), Error>;

    /// Enable option-byte writes. Flash must already be unlocked.
    fn unlock_option_bytes(&mut self);
    fn lock_option_bytes(&mut self);

    /// Current `SWAP_BANK` option-byte flag.
    fn swap_bank(&mut self) -> bool;
    /// Stage a new `SWAP_BANK` value, applied by [`launch_option_bytes`](Self::launch_option_bytes).
    fn program_swap_bank(&mut self, swapped: bool) -> Result<(), Error>;

    /// Reload option bytes. On real parts this resets the MCU and does not return.
    fn launch_option_bytes(&mut self) -> Result<(), Error>;
}

/// Flash unlocked for programming with the instruction cache disabled.
///
/// Locks again and re-enables the cache when released or dropped.
pub(crate) struct Unlocked<'a, C: FlashControl> {
    control: &'a mut C,
}

impl<'a, C: FlashControl> Unlocked<'a, C> {
    pub(crate) fn new(control: &'a mut C) -> Result<Self, Error> {
        control.disable_icache()?;
        control.unlock();
        Ok(Self { control })
    }

    pub(crate) fn release(self) -> Result<(), Error> {
        let mut this = core::mem::ManuallyDrop::new(self);
        this.control.lock();
        this.control.enable_icache()
    }
}

impl<C: FlashControl> Drop for Unlocked<'_, C> {
    fn drop(&mut self) {
        self.control.lock();
        if self.control.enable_icache().is_err() {
            error!("failed to re-enable instruction cache");
        }
    }
}

/// Flash and option bytes unlocked together.
pub(crate) struct OptionsUnlocked<'a, C: FlashControl> {
    pub(crate) control: &'a mut C,
}

impl<'a, C: FlashControl> OptionsUnlocked<'a, C> {
    pub(crate) fn new(control: &'a mut C) -> Self {
        control.unlock();
        control.unlock_option_bytes();
        Self { control }
    }
}

impl<C: FlashControl> Drop for OptionsUnlocked<'_, C> {
    fn drop(&mut self) {
        self.control.lock_option_bytes();
        self.control.lock();
    }
}

/// Access to both banks of a dual-bank part.
///
/// The boot state is sampled once at construction, matching the fact that the
/// active bank only changes across a reset.
pub struct FlashAccess<C, F> {
    control: C,
    banks: [F; 2],
    layout: BankLayout,
    boot: BootState,
}

impl<C: FlashControl, F: NorFlash> FlashAccess<C, F> {
    /// Take over the flash controller and both banks, sampling the boot bank.
    ///
    /// Fails with [`Error::NotAligned`] when `layout` pages are not a multiple of
    /// the driver's erase size, and [`Error::OutOfBounds`] when a bank driver is
    /// smaller than `layout.bank_size`.
    pub fn new(mut control: C, bank1: F, bank2: F, layout: BankLayout) -> Result<Self, Error> {
        if layout.page_size as usize % F::ERASE_SIZE != 0 || QUAD_WORD % F::WRITE_SIZE != 0 {
            error!(
                "flash geometry mismatch: page {} erase {} write {}",
                layout.page_size,
                F::ERASE_SIZE,
                F::WRITE_SIZE
            );
            return Err(Error::NotAligned);
        }
        if bank1.capacity() < layout.bank_size as usize || bank2.capacity() < layout.bank_size as usize {
            return Err(Error::OutOfBounds);
        }

        let swapped = {
            let mut unlocked = OptionsUnlocked::new(&mut control);
            unlocked.control.swap_bank()
        };
        let boot = BootState::from_swap_flag(swapped);
        info!("running from bank {}", boot.active.number());

        Ok(Self {
            control,
            banks: [bank1, bank2],
            layout,
            boot,
        })
    }

    /// Geometry the banks were opened with.
    pub fn layout(&self) -> &BankLayout {
        &self.layout
    }

    /// Boot state sampled at construction.
    pub fn boot_state(&self) -> BootState {
        self.boot
    }

    /// Bank the running firmware executes from.
    pub fn active_bank(&self) -> Bank {
        self.boot.active
    }

    /// Always the inactive bank.
    pub fn target_bank(&self) -> Bank {
        self.boot.target()
    }

    pub(crate) fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Give back the underlying parts, e.g. to rebuild after a reset.
    pub fn release(self) -> (C, F, F) {
        let [bank1, bank2] = self.banks;
        (self.control, bank1, bank2)
    }

    fn check_range(&self, bank: Bank, start: u32, end: u32) -> Result<(), Error> {
        if start > end || end > self.layout.bank_size {
            return Err(Error::OutOfBounds);
        }
        if bank == self.boot.active && start < self.layout.image_capacity() {
            error!("refusing to modify image area of running bank {}", bank.number());
            return Err(Error::ActiveBank);
        }
        Ok(())
    }

    /// Erase the whole pages covering `[start, end]` (offsets inside `bank`).
    pub fn erase(&mut self, bank: Bank, start: u32, end: u32) -> Result<(), Error> {
        self.check_range(bank, start, end.saturating_add(1))?;

        let first = self.layout.page_of(start);
        let last = self.layout.page_of(end);
        let from = first * self.layout.page_size;
        let to = (last + 1) * self.layout.page_size;

        let unlocked = Unlocked::new(&mut self.control)?;
        let result = self.banks[bank.index()]
            .erase(from, to)
            .map_err(|e| Error::from_kind(e.kind(), Error::Erase));
        unlocked.release()?;

        match result {
            Ok(()) => {
                info!("erased {} pages of bank {}", last - first + 1, bank.number());
                Ok(())
            }
            Err(e) => {
                error!("erase of bank {} pages {}..={} failed: {:?}", bank.number(), first, last, e);
                Err(e)
            }
        }
    }

    /// Program `data` at `offset` inside `bank`, one quad-word at a time.
    ///
    /// `offset` and `data.len()` must be multiples of [`QUAD_WORD`]. The first
    /// failing quad-word aborts the call.
    pub fn write(&mut self, bank: Bank, offset: u32, data: &[u8]) -> Result<(), Error> {
        if offset as usize % QUAD_WORD != 0 || data.len() % QUAD_WORD != 0 {
            return Err(Error::NotAligned);
        }
        let end = u32::try_from(data.len())
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or(Error::OutOfBounds)?;
        self.check_range(bank, offset, end)?;

        let unlocked = Unlocked::new(&mut self.control)?;
        let flash = &mut self.banks[bank.index()];
        let mut result = Ok(());
        for (i, quad) in data.chunks_exact(QUAD_WORD).enumerate() {
            let address = offset + (i * QUAD_WORD) as u32;
            if let Err(e) = flash.write(address, quad) {
                error!(
                    "quad-word program failed at {:#x}",
                    self.layout.bank_address(bank, address)
                );
                result = Err(Error::from_kind(e.kind(), Error::Program));
                break;
            }
        }
        unlocked.release()?;
        result
    }

    /// Read `buf.len()` bytes at `offset` inside `bank`. Either bank may be read.
    pub fn read(&mut self, bank: Bank, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        let end = (offset as usize).checked_add(buf.len()).ok_or(Error::OutOfBounds)?;
        if end > self.layout.bank_size as usize {
            return Err(Error::OutOfBounds);
        }
        self.banks[bank.index()]
            .read(offset, buf)
            .map_err(|e| Error::from_kind(e.kind(), Error::Read))
    }
}
