//! Bank numbering, boot-bank state and flash geometry.

/// One of the two symmetric firmware banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Bank {
    One = 1,
    Two = 2,
}

impl Bank {
    /// The opposite bank (`3 - n`).
    pub const fn other(self) -> Self {
        match self {
            Bank::One => Bank::Two,
            Bank::Two => Bank::One,
        }
    }

    /// Bank number as reported to clients (1 or 2).
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Bank::number`]. `None` for anything but 1 or 2.
    pub const fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Bank::One),
            2 => Some(Bank::Two),
            _ => None,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize - 1
    }
}

/// Which bank the core executes from, derived from the `SWAP_BANK` option-byte flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootState {
    /// Bank executed after the last reset.
    pub active: Bank,
}

impl BootState {
    /// Bank 2 runs when the flag is set.
    pub const fn from_swap_flag(swapped: bool) -> Self {
        Self {
            active: if swapped { Bank::Two } else { Bank::One },
        }
    }

    /// The bank an update is written to. Never the active one.
    pub const fn target(&self) -> Bank {
        self.active.other()
    }
}

/// Geometry of a dual-bank flash part.
///
/// Each bank holds an image area starting at offset 0, followed by
/// `data_pages` reserved pages. The firmware identity record sits at the
/// start of that reserved area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BankLayout {
    /// Physical address of bank 1. Only used for logging.
    pub flash_base: u32,
    /// Bytes per bank.
    pub bank_size: u32,
    /// Erase granularity in bytes.
    pub page_size: u32,
    /// Pages at the end of each bank kept out of the image area.
    pub data_pages: u32,
}

impl BankLayout {
    /// STM32U585AI: 2 x 1 MiB banks of 8 KiB pages.
    pub const STM32U585: Self = Self::new(0x0800_0000, 0x0010_0000, 0x2000, 1);

    /// Geometry for banks of `bank_size` bytes split into `page_size` pages.
    pub const fn new(flash_base: u32, bank_size: u32, page_size: u32, data_pages: u32) -> Self {
        Self {
            flash_base,
            bank_size,
            page_size,
            data_pages,
        }
    }

    /// Largest image that fits in front of the reserved data pages.
    pub const fn image_capacity(&self) -> u32 {
        self.bank_size - self.data_pages * self.page_size
    }

    /// Offset of the reserved data area inside a bank.
    pub const fn data_offset(&self) -> u32 {
        self.image_capacity()
    }

    /// Page index holding `offset`.
    pub const fn page_of(&self, offset: u32) -> u32 {
        offset / self.page_size
    }

    /// Physical address of `offset` in `bank` with no swap applied.
    pub const fn bank_address(&self, bank: Bank, offset: u32) -> u32 {
        self.flash_base + bank.index() as u32 * self.bank_size + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_never_active() {
        for swapped in [false, true] {
            let state = BootState::from_swap_flag(swapped);
            assert_ne!(state.target(), state.active);
            assert_eq!(state.target().number(), 3 - state.active.number());
        }
    }

    #[test]
    fn bank_numbers() {
        assert_eq!(Bank::from_number(1), Some(Bank::One));
        assert_eq!(Bank::from_number(2), Some(Bank::Two));
        assert_eq!(Bank::from_number(0), None);
        assert_eq!(Bank::One.other().other(), Bank::One);
    }

    #[test]
    fn stm32u585_geometry() {
        let layout = BankLayout::STM32U585;
        assert_eq!(layout.image_capacity(), 0x000F_E000);
        assert_eq!(layout.page_of(layout.data_offset()), 127);
        assert_eq!(layout.bank_address(Bank::Two, 0), 0x0810_0000);
    }
}
