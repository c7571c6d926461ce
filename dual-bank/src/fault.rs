//! Safe-halt loop entered after an unrecoverable flash fault.

/// Error classes, blinked out as a count of red flashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FaultCode {
    /// Clock or peripheral bring-up failed.
    HwInit = 1,
    /// BLE coprocessor or stack failure.
    Ble = 2,
    /// Erase, program or read of a bank failed.
    Flash = 3,
    /// Option-byte program or launch failed.
    OptionBytes = 4,
}

/// Board status LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    Red,
    Green,
    Yellow,
}

/// LEDs and a blocking delay. Must not depend on flash or BLE state.
pub trait FaultIndicator {
    fn set(&mut self, led: Led, on: bool);
    fn delay_ms(&mut self, ms: u32);
}

/// One period of the error pattern: `code` red blinks, then green and yellow together.
pub fn blink_code<I: FaultIndicator>(indicator: &mut I, code: FaultCode) {
    for _ in 0..code as u8 {
        indicator.set(Led::Red, true);
        indicator.delay_ms(500);
        indicator.set(Led::Red, false);
        indicator.delay_ms(2000);
    }
    indicator.set(Led::Green, true);
    indicator.set(Led::Yellow, true);
    indicator.delay_ms(2000);
    indicator.set(Led::Green, false);
    indicator.set(Led::Yellow, false);
}

/// Never returns. Flash contents are of unknown consistency at this point.
pub fn halt<I: FaultIndicator>(indicator: &mut I, code: FaultCode) -> ! {
    error!("halting with fault code {:?}", code);
    indicator.set(Led::Red, false);
    loop {
        blink_code(indicator, code);
    }
}
