//! Boot bank swap through the `SWAP_BANK` option byte.

use embedded_storage::nor_flash::NorFlash;

use crate::flash::{Error, FlashAccess, FlashControl, OptionsUnlocked};
use crate::layout::{Bank, BootState};

/// System reset, supplied by the board (e.g. `cortex_m::peripheral::SCB::sys_reset`).
pub trait Reset {
    fn sys_reset(&mut self);
}

/// Invert the `SWAP_BANK` flag and launch the option bytes.
///
/// On hardware the launch resets the MCU, so this only returns on failure or on
/// a simulated controller, in which case it returns the bank that will run
/// after the reset. Option bytes and flash are relocked on every path that
/// returns.
pub fn swap_now<C: FlashControl, F: NorFlash>(flash: &mut FlashAccess<C, F>) -> Result<Bank, Error> {
    let mut unlocked = OptionsUnlocked::new(flash.control_mut());
    let control = &mut *unlocked.control;

    let swapped = control.swap_bank();
    if swapped {
        info!("->Disable DualBoot");
    } else {
        info!("->Enable DualBoot");
    }

    if let Err(e) = control.program_swap_bank(!swapped) {
        error!("option byte program failed: {:?}", e);
        return Err(e);
    }
    if let Err(e) = control.launch_option_bytes() {
        error!("option byte launch failed: {:?}", e);
        return Err(e);
    }

    Ok(BootState::from_swap_flag(!swapped).active)
}
