use dual_bank::{board_name, BankLayout, BOARD_NAME_LEN};
use embassy_time::Duration;

/// Firmware version reported by `versionFw` and `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    /// `major.minor.patch`
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }
}

/// Static description of the running firmware and the upload limits.
#[derive(Debug, Clone, Copy)]
pub struct FotaConfig {
    /// Largest accepted image. Clamped to the layout's image capacity.
    pub max_prog_size: u32,
    /// Id of the running firmware, and of images it receives.
    pub firmware_id: u16,
    /// Used until a name is stored with `setName`.
    pub default_board_name: [u8; BOARD_NAME_LEN],
    /// Prefix of the `versionFw` reply.
    pub mcu_name: &'static str,
    /// Board line of the `info` reply.
    pub board_description: &'static str,
    /// Application name shown by `versionFw` and `info`.
    pub package_name: &'static str,
    pub version: Version,
    /// Abort an upload when no chunk arrives for this long.
    pub inactivity_timeout: Option<Duration>,
}

impl FotaConfig {
    /// Defaults for `layout`: every byte of the image area may be uploaded,
    /// no inactivity timeout.
    pub const fn new(layout: &BankLayout, firmware_id: u16, package_name: &'static str, version: Version) -> Self {
        Self {
            max_prog_size: layout.image_capacity(),
            firmware_id,
            default_board_name: *b"BOXPRO\0\0",
            mcu_name: "U585",
            board_description: "STM32U585AI-SensorTile.box-Pro",
            package_name,
            version,
            inactivity_timeout: None,
        }
    }

    /// Board name used until one is stored. Truncated to [`BOARD_NAME_LEN`] bytes.
    pub fn with_board_name(mut self, name: &[u8]) -> Self {
        self.default_board_name = board_name(name);
        self
    }

    /// Abort uploads that stall for `timeout`.
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// Lower the image size limit. Larger values are clamped by the controller.
    pub const fn with_max_prog_size(mut self, size: u32) -> Self {
        self.max_prog_size = size;
        self
    }
}
