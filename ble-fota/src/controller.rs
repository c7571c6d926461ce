//! The console characteristic endpoint: uploads, bank queries and deferred swaps.

use dual_bank::fault::FaultCode;
use dual_bank::{
    board_name, swap_now, Bank, Error, FlashAccess, FlashControl, IdentityRegistry, Reset, BOARD_NAME_LEN,
    FW_ID_NOT_VALID,
};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Instant;
use embedded_storage::nor_flash::NorFlash;

use crate::command::Command;
use crate::config::FotaConfig;
use crate::console::{self, DeviceId};
use crate::consts::{STATUS_FAILED, STATUS_OK};
use crate::session::{AbortReason, SessionEvent, StartOutcome, TransferSession};

/// Sends a reply on the characteristic the command arrived on.
pub trait Notifier {
    fn notify(&mut self, data: &[u8]);
}

/// Work that must wait until no central is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeferredAction {
    SwapBanks,
    Reboot,
}

/// A flash or option-byte operation failed; flash contents are unknown.
///
/// The board should enter [`dual_bank::fault::halt`] with [`Fatal::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fatal {
    pub error: Error,
}

impl Fatal {
    /// Blink code for [`dual_bank::fault::halt`].
    pub fn code(&self) -> FaultCode {
        match self.error {
            Error::OptionBytes => FaultCode::OptionBytes,
            _ => FaultCode::Flash,
        }
    }
}

type ActionQueue = Channel<NoopRawMutex, DeferredAction, 2>;

/// Owns both banks and every piece of upload state for one BLE peripheral.
pub struct FotaController<C, F, R> {
    flash: FlashAccess<C, F>,
    identity: IdentityRegistry,
    session: TransferSession,
    config: FotaConfig,
    device: DeviceId,
    reset: R,
    connected: bool,
    swap_armed: bool,
    reboot_armed: bool,
    actions: ActionQueue,
    halted: Option<Fatal>,
}

impl<C: FlashControl, F: NorFlash, R: Reset> FotaController<C, F, R> {
    /// Disconnected and idle. Call [`boot`](Self::boot) once before serving writes.
    pub fn new(flash: FlashAccess<C, F>, mut config: FotaConfig, device: DeviceId, reset: R) -> Self {
        let capacity = flash.layout().image_capacity();
        if config.max_prog_size > capacity {
            warn!("max image size {} clamped to {}", config.max_prog_size, capacity);
            config.max_prog_size = capacity;
        }
        Self {
            identity: IdentityRegistry::new(flash.layout()),
            flash,
            session: TransferSession::new(),
            config,
            device,
            reset,
            connected: false,
            swap_armed: false,
            reboot_armed: false,
            actions: Channel::new(),
            halted: None,
        }
    }

    /// Record the running firmware's id in the active bank, keeping its board name.
    pub fn boot(&mut self) -> Result<(), Fatal> {
        self.check_halted()?;
        let id = self.config.firmware_id;
        match self.identity.update_active(&mut self.flash, id, None) {
            Ok(true) => info!("bank {} now reports fw id {:#x}", self.flash.active_bank().number(), id),
            Ok(false) => {}
            Err(e) => return Err(self.fail(e)),
        }
        Ok(())
    }

    /// Bank the running firmware executes from.
    pub fn active_bank(&self) -> Bank {
        self.flash.active_bank()
    }

    /// Bank uploads are written to.
    pub fn target_bank(&self) -> Bank {
        self.flash.target_bank()
    }

    /// Upload in progress, if any.
    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Effective configuration, with `max_prog_size` clamped.
    pub fn config(&self) -> &FotaConfig {
        &self.config
    }

    /// Whether a [`Fatal`] was returned. All further calls return it again.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Deferred actions wait while a central is connected.
    pub fn on_connect(&mut self) {
        debug!("central connected");
        self.connected = true;
    }

    /// Drops any unfinished upload and releases the armed swap or reboot to [`poll`](Self::poll).
    pub fn on_disconnect(&mut self) {
        debug!("central disconnected");
        self.connected = false;
        if self.session.abort(AbortReason::Disconnected) {
            self.disarm_swap();
        }

        if core::mem::take(&mut self.swap_armed) {
            self.queue(DeferredAction::SwapBanks);
        }
        if core::mem::take(&mut self.reboot_armed) {
            self.queue(DeferredAction::Reboot);
        }
    }

    fn queue(&mut self, action: DeferredAction) {
        if self.actions.try_send(action).is_err() {
            warn!("deferred action {:?} already queued", action);
        }
    }

    /// Forget an armed or queued swap. Queued reboots are kept.
    fn disarm_swap(&mut self) {
        if core::mem::take(&mut self.swap_armed) {
            debug!("armed swap dropped");
        }
        let mut reboot = false;
        while let Ok(action) = self.actions.try_receive() {
            match action {
                DeferredAction::SwapBanks => debug!("queued swap dropped"),
                DeferredAction::Reboot => reboot = true,
            }
        }
        if reboot {
            self.queue(DeferredAction::Reboot);
        }
    }

    /// Handle one write to the console characteristic.
    pub fn on_write<N: Notifier>(&mut self, now: Instant, data: &[u8], tx: &mut N) -> Result<(), Fatal> {
        self.check_halted()?;

        if self.session.is_active() {
            return self.on_image_chunk(now, data, tx);
        }

        match Command::parse(data) {
            Command::Help => tx.notify(console::help().as_bytes()),
            Command::VersionFw => tx.notify(console::version_fw(&self.config).as_bytes()),
            Command::Info => tx.notify(console::info(&self.config, self.flash.active_bank()).as_bytes()),
            Command::Uid => tx.notify(console::uid(&self.device).as_bytes()),
            Command::UpgradeFw(request) => {
                let outcome = self.session.start(
                    &mut self.flash,
                    &self.identity,
                    request.size,
                    request.crc,
                    self.config.max_prog_size,
                    now,
                );
                match outcome {
                    Ok(StartOutcome::Accepted) => {
                        self.disarm_swap();
                        tx.notify(&request.accept_reply());
                    }
                    Ok(StartOutcome::Empty) => tx.notify(&request.accept_reply()),
                    Ok(StartOutcome::Rejected) => tx.notify(&request.reject_reply()),
                    Err(e) => return Err(self.fail(e)),
                }
            }
            Command::ReadBanksFwId => {
                let info = self.bank_info()?;
                tx.notify(&info);
            }
            Command::BanksSwap => {
                let accepted = self.request_swap()?;
                tx.notify(console::swap_reply(accepted, self.flash.target_bank()).as_bytes());
            }
            Command::SetName(name) if !name.is_empty() => {
                let stored = self.set_board_name(name)?;
                let len = stored.iter().position(|&b| b == 0).unwrap_or(BOARD_NAME_LEN);
                tx.notify(&stored[..len]);
            }
            Command::SetName(_) | Command::Unknown(_) => tx.notify(data),
        }
        Ok(())
    }

    fn on_image_chunk<N: Notifier>(&mut self, now: Instant, data: &[u8], tx: &mut N) -> Result<(), Fatal> {
        let event = match self.session.receive(&mut self.flash, data, now) {
            Ok(event) => event,
            Err(e) => return Err(self.fail(e)),
        };

        match event {
            SessionEvent::Progress { .. } => tx.notify(data),
            SessionEvent::Completed { bank, .. } => {
                tx.notify(data);
                let name = self.board_name()?;
                if let Err(e) = self.identity.write(&mut self.flash, bank, self.config.firmware_id, name) {
                    return Err(self.fail(e));
                }
                self.swap_armed = true;
                info!("upload complete, will swap to bank {} after disconnection", bank.number());
                tx.notify(&[STATUS_OK]);
            }
            SessionEvent::CrcMismatch { .. } => {
                self.disarm_swap();
                tx.notify(data);
                tx.notify(&[STATUS_FAILED]);
            }
            SessionEvent::Overflow => {
                self.disarm_swap();
                tx.notify(&[STATUS_FAILED]);
            }
        }
        Ok(())
    }

    /// `{active bank, bank 1 fw id (LE), bank 2 fw id (LE)}`.
    pub fn bank_info(&mut self) -> Result<[u8; 5], Fatal> {
        let (id1, id2) = match self.identity.firmware_ids(&mut self.flash) {
            Ok(ids) => ids,
            Err(e) => return Err(self.fail(e)),
        };
        let [a, b] = id1.to_le_bytes();
        let [c, d] = id2.to_le_bytes();
        Ok([self.flash.active_bank().number(), a, b, c, d])
    }

    /// Arm a swap to the inactive bank, executed after the next disconnection.
    ///
    /// Refused (`Ok(false)`) unless the inactive bank holds a valid firmware id.
    pub fn request_swap(&mut self) -> Result<bool, Fatal> {
        self.check_halted()?;
        let target = self.flash.target_bank();
        let identity = match self.identity.read(&mut self.flash, target) {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(e)),
        };
        match identity {
            Some(identity) if identity.firmware_id != FW_ID_NOT_VALID => {
                info!("swap to bank {} (fw id {:#x}) armed", target.number(), identity.firmware_id);
                self.swap_armed = true;
                Ok(true)
            }
            _ => {
                warn!("swap refused, bank {} has no valid firmware", target.number());
                Ok(false)
            }
        }
    }

    /// Arm a plain reboot, executed after the next disconnection.
    pub fn request_reboot(&mut self) {
        self.reboot_armed = true;
    }

    /// Store a new board name in the active bank. Returns the stored name.
    pub fn set_board_name(&mut self, name: &[u8]) -> Result<[u8; BOARD_NAME_LEN], Fatal> {
        self.check_halted()?;
        let name = board_name(name);
        if let Err(e) = self
            .identity
            .update_active(&mut self.flash, self.config.firmware_id, Some(name))
        {
            return Err(self.fail(e));
        }
        Ok(name)
    }

    /// Stored board name of the active bank, or the configured default.
    pub fn board_name(&mut self) -> Result<[u8; BOARD_NAME_LEN], Fatal> {
        let active = self.flash.active_bank();
        let stored = match self.identity.read(&mut self.flash, active) {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(e)),
        };
        Ok(stored
            .and_then(|identity| identity.name().map(board_name))
            .unwrap_or(self.config.default_board_name))
    }

    /// Main-loop hook. Expires a stalled upload and, once disconnected, runs
    /// one deferred action. A swap ends in a reset and so does not return on
    /// hardware.
    pub fn poll(&mut self, now: Instant) -> Result<Option<DeferredAction>, Fatal> {
        self.check_halted()?;

        if let Some(timeout) = self.config.inactivity_timeout {
            if self.session.expired(now, timeout) && self.session.abort(AbortReason::Timeout) {
                self.disarm_swap();
            }
        }

        if self.connected {
            return Ok(None);
        }
        let Ok(action) = self.actions.try_receive() else {
            return Ok(None);
        };

        match action {
            DeferredAction::SwapBanks => {
                let target = self.flash.target_bank();
                match self.identity.read(&mut self.flash, target) {
                    Ok(Some(identity)) if identity.firmware_id != FW_ID_NOT_VALID => {}
                    Ok(_) => {
                        warn!("bank {} lost its firmware id, swap dropped", target.number());
                        return Ok(None);
                    }
                    Err(e) => return Err(self.fail(e)),
                }
                if let Err(e) = swap_now(&mut self.flash) {
                    return Err(self.fail(e));
                }
                self.reset.sys_reset();
            }
            DeferredAction::Reboot => {
                info!("rebooting");
                self.reset.sys_reset();
            }
        }
        Ok(Some(action))
    }

    /// Give back flash and reset, e.g. to rebuild after a simulated reset.
    pub fn release(self) -> (FlashAccess<C, F>, R) {
        (self.flash, self.reset)
    }

    fn check_halted(&self) -> Result<(), Fatal> {
        match self.halted {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: Error) -> Fatal {
        error!("fatal flash fault: {:?}", error);
        let fatal = Fatal { error };
        self.halted = Some(fatal);
        fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Version;
    use crate::consts::CMD_UPGRADE_FW;
    use crate::checksum::image_crc;
    use dual_bank::sim::{RamFlash, SimControl, SimReset};
    use dual_bank::BankLayout;
    use embassy_time::Duration;
    use std::vec::Vec;

    type Flash = RamFlash<{ 16 * 1024 }, 1024>;
    type Controller = FotaController<SimControl, Flash, SimReset>;
    const LAYOUT: BankLayout = BankLayout::new(0x0800_0000, 16 * 1024, 1024, 1);
    const FW_ID: u16 = 0x0E12;

    #[derive(Default)]
    struct Replies(Vec<Vec<u8>>);

    impl Notifier for Replies {
        fn notify(&mut self, data: &[u8]) {
            self.0.push(data.to_vec());
        }
    }

    impl Replies {
        fn last(&self) -> &[u8] {
            self.0.last().map(|r| r.as_slice()).unwrap_or(&[])
        }
    }

    fn config() -> FotaConfig {
        FotaConfig::new(&LAYOUT, FW_ID, "BLEDualProgram", Version::new(1, 0, 0))
    }

    fn flash_with(control: SimControl, bank1: Flash, bank2: Flash) -> FlashAccess<SimControl, Flash> {
        FlashAccess::new(control, bank1, bank2, LAYOUT).unwrap()
    }

    fn controller_with(config: FotaConfig) -> Controller {
        let flash = flash_with(SimControl::new(), Flash::new(), Flash::new());
        let device = DeviceId { uid: [0; 12], mcu_id: 0x482 };
        let mut controller = FotaController::new(flash, config, device, SimReset::default());
        controller.boot().unwrap();
        controller.on_connect();
        controller
    }

    fn controller() -> Controller {
        controller_with(config())
    }

    fn upgrade_frame(size: u32, crc: u32) -> Vec<u8> {
        let mut frame = CMD_UPGRADE_FW.to_vec();
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn counting_image(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    fn t(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn upload(controller: &mut Controller, image: &[u8], crc: u32, tx: &mut Replies) {
        controller
            .on_write(t(0), &upgrade_frame(image.len() as u32, crc), tx)
            .unwrap();
        assert_eq!(tx.last(), &crc.to_le_bytes());
        for chunk in image.chunks(20) {
            controller.on_write(t(1), chunk, tx).unwrap();
        }
    }

    #[test]
    fn boot_records_running_firmware() {
        let mut controller = controller();
        assert_eq!(controller.bank_info().unwrap(), [1, 0x12, 0x0E, 0xFF, 0xFF]);
    }

    #[test]
    fn size_limit_is_enforced() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let max = LAYOUT.image_capacity();

        controller.on_write(t(0), &upgrade_frame(max + 1, 0xDEAD_BEEF), &mut tx).unwrap();
        assert_eq!(tx.last(), &[0xEF, 0x00, 0xAD, 0xDE]);
        assert!(!controller.session().is_active());

        controller.on_write(t(0), &upgrade_frame(max, 0xDEAD_BEEF), &mut tx).unwrap();
        assert_eq!(tx.last(), &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(controller.session().is_active());
    }

    #[test]
    fn max_prog_size_is_clamped_to_image_area() {
        let controller = controller_with(config().with_max_prog_size(u32::MAX));
        assert_eq!(controller.config().max_prog_size, LAYOUT.image_capacity());
    }

    #[test]
    fn upload_swap_and_reset() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let image = counting_image(1024);
        let crc = image_crc(&image);
        assert_eq!(crc, 0x8ADA_4578);

        upload(&mut controller, &image, crc, &mut tx);
        // Accept reply, 52 echoed chunks, status.
        assert_eq!(tx.0.len(), 1 + 52 + 1);
        assert_eq!(tx.0[52], &image[1020..]);
        assert_eq!(tx.last(), &[STATUS_OK]);
        assert_eq!(controller.bank_info().unwrap(), [1, 0x12, 0x0E, 0x12, 0x0E]);

        controller.on_write(t(2), b"banksSwap", &mut tx).unwrap();
        assert!(tx.last().starts_with(b"Swapping to bank 2"));

        // Nothing happens while the central is still connected.
        assert_eq!(controller.poll(t(3)), Ok(None));

        controller.on_disconnect();
        assert_eq!(controller.poll(t(4)), Ok(Some(DeferredAction::SwapBanks)));
        assert_eq!(controller.poll(t(5)), Ok(None));

        let (flash, reset) = controller.release();
        assert_eq!(reset.resets(), 1);
        let (control, bank1, bank2) = flash.release();
        assert_eq!(control.launches(), 1);
        assert_eq!(control.unlock_depth(), 0);

        let mut flash = flash_with(control, bank1, bank2);
        assert_eq!(flash.active_bank(), Bank::Two);

        let mut readback = [0u8; 1024];
        flash.read(Bank::Two, 0, &mut readback).unwrap();
        assert_eq!(&readback[..], &image[..]);
    }

    #[test]
    fn crc_mismatch_leaves_bank_invalid() {
        let mut controller = controller();
        let mut tx = Replies::default();
        upload(&mut controller, &counting_image(1024), 0xDEAD_BEEF, &mut tx);

        assert_eq!(tx.last(), &[STATUS_FAILED]);
        assert_eq!(controller.bank_info().unwrap(), [1, 0x12, 0x0E, 0xFF, 0xFF]);
        assert_eq!(controller.request_swap(), Ok(false));

        controller.on_disconnect();
        assert_eq!(controller.poll(t(10)), Ok(None));
    }

    #[test]
    fn failed_reupload_invalidates_previous_image() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let image = counting_image(1024);
        upload(&mut controller, &image, image_crc(&image), &mut tx);
        assert_eq!(tx.last(), &[STATUS_OK]);
        assert_eq!(controller.bank_info().unwrap()[3..], [0x12, 0x0E]);

        upload(&mut controller, &image, 0xDEAD_BEEF, &mut tx);
        assert_eq!(tx.last(), &[STATUS_FAILED]);
        assert_eq!(controller.bank_info().unwrap()[3..], [0xFF, 0xFF]);
        assert_eq!(controller.request_swap(), Ok(false));

        controller.on_disconnect();
        assert_eq!(controller.poll(t(10)), Ok(None));
        let (flash, reset) = controller.release();
        assert_eq!(reset.resets(), 0);
        assert_eq!(flash.release().0.launches(), 0);
    }

    #[test]
    fn aborted_reupload_drops_armed_swap() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let image = counting_image(1024);
        upload(&mut controller, &image, image_crc(&image), &mut tx);
        assert_eq!(tx.last(), &[STATUS_OK]);

        controller.on_write(t(2), &upgrade_frame(1024, image_crc(&image)), &mut tx).unwrap();
        for chunk in image[..500].chunks(20) {
            controller.on_write(t(3), chunk, &mut tx).unwrap();
        }
        controller.on_disconnect();

        assert_eq!(controller.bank_info().unwrap()[3..], [0xFF, 0xFF]);
        assert_eq!(controller.request_swap(), Ok(false));
        assert_eq!(controller.poll(t(4)), Ok(None));

        let (flash, reset) = controller.release();
        assert_eq!(reset.resets(), 0);
        let (control, bank1, bank2) = flash.release();
        assert_eq!(control.launches(), 0);
        assert_eq!(flash_with(control, bank1, bank2).active_bank(), Bank::One);
    }

    #[test]
    fn new_upload_drops_queued_swap() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let image = counting_image(256);
        upload(&mut controller, &image, image_crc(&image), &mut tx);

        // Swap queued, but the central reconnects before the main loop ran.
        controller.request_reboot();
        controller.on_disconnect();
        controller.on_connect();
        controller.on_write(t(2), &upgrade_frame(256, image_crc(&image)), &mut tx).unwrap();
        controller.on_disconnect();

        assert_eq!(controller.poll(t(3)), Ok(Some(DeferredAction::Reboot)));
        assert_eq!(controller.poll(t(4)), Ok(None));
        let (flash, _) = controller.release();
        assert_eq!(flash.release().0.launches(), 0);
    }

    #[test]
    fn empty_upload_is_acknowledged_without_erase() {
        let mut controller = controller();
        let mut tx = Replies::default();

        controller.on_write(t(0), &upgrade_frame(0, 0xDEAD_BEEF), &mut tx).unwrap();
        assert_eq!(tx.last(), &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(!controller.session().is_active());

        controller.on_write(t(1), b"help", &mut tx).unwrap();
        assert!(tx.last().starts_with(b"help\n"));
        let (flash, _) = controller.release();
        let (_, _, bank2) = flash.release();
        assert_eq!(bank2.erase_calls(), 0);
    }

    #[test]
    fn swap_requires_valid_target() {
        let mut controller = controller();
        let mut tx = Replies::default();

        controller.on_write(t(0), b"banksSwap", &mut tx).unwrap();
        assert!(tx.last().starts_with(b"Bank 2 holds no valid firmware"));

        controller.on_disconnect();
        assert_eq!(controller.poll(t(1)), Ok(None));
        let (flash, reset) = controller.release();
        assert_eq!(reset.resets(), 0);
        assert_eq!(flash.release().0.launches(), 0);
    }

    #[test]
    fn disconnect_aborts_upload() {
        let mut controller = controller();
        let mut tx = Replies::default();
        let image = counting_image(1024);

        controller.on_write(t(0), &upgrade_frame(1024, image_crc(&image)), &mut tx).unwrap();
        for chunk in image[..500].chunks(20) {
            controller.on_write(t(1), chunk, &mut tx).unwrap();
        }
        controller.on_disconnect();

        assert!(!controller.session().is_active());
        assert_eq!(controller.session().expected_size(), 0);
        assert_eq!(controller.bank_info().unwrap()[3..], [0xFF, 0xFF]);
        assert_eq!(controller.poll(t(2)), Ok(None));

        // Writes after the abort are commands again.
        controller.on_connect();
        controller.on_write(t(3), b"help", &mut tx).unwrap();
        assert!(tx.last().starts_with(b"help\n"));
    }

    #[test]
    fn stalled_upload_times_out() {
        let mut controller = controller_with(config().with_inactivity_timeout(Duration::from_secs(1)));
        let mut tx = Replies::default();

        controller.on_write(t(0), &upgrade_frame(64, 0), &mut tx).unwrap();
        controller.on_write(t(100), &[0; 20], &mut tx).unwrap();

        assert_eq!(controller.poll(t(1099)), Ok(None));
        assert!(controller.session().is_active());
        assert_eq!(controller.poll(t(1100)), Ok(None));
        assert!(!controller.session().is_active());
    }

    #[test]
    fn overflow_reports_failure() {
        let mut controller = controller();
        let mut tx = Replies::default();

        controller.on_write(t(0), &upgrade_frame(16, 0), &mut tx).unwrap();
        controller.on_write(t(0), &[0; 20], &mut tx).unwrap();
        assert_eq!(tx.last(), &[STATUS_FAILED]);
        assert!(!controller.session().is_active());
    }

    #[test]
    fn read_banks_fw_id_reply() {
        let mut controller = controller();
        let mut tx = Replies::default();
        controller.on_write(t(0), b"readBanksFwId", &mut tx).unwrap();
        assert_eq!(tx.last(), &[1, 0x12, 0x0E, 0xFF, 0xFF]);
    }

    #[test]
    fn board_name_defaults_then_persists() {
        let mut controller = controller();
        let mut tx = Replies::default();
        assert_eq!(&controller.board_name().unwrap(), b"BOXPRO\0\0");

        controller.on_write(t(0), b"setNameMYBOX\r\n", &mut tx).unwrap();
        assert_eq!(tx.last(), b"MYBOX");
        assert_eq!(&controller.board_name().unwrap(), b"MYBOX\0\0\0");

        // A received image inherits the name.
        let image = counting_image(64);
        upload(&mut controller, &image, image_crc(&image), &mut tx);
        let (mut flash, _) = controller.release();
        let identity = IdentityRegistry::new(&LAYOUT).read(&mut flash, Bank::Two).unwrap().unwrap();
        assert_eq!(identity.name(), Some(&b"MYBOX"[..]));
    }

    #[test]
    fn console_commands_reply() {
        let mut controller = controller();
        let mut tx = Replies::default();

        controller.on_write(t(0), b"versionFw", &mut tx).unwrap();
        assert_eq!(tx.last(), b"U585_BLEDualProgram_1.0.0\r\n");
        controller.on_write(t(0), b"info", &mut tx).unwrap();
        assert!(tx.last().ends_with(b"Current Bank =1\n"));
        controller.on_write(t(0), b"uid", &mut tx).unwrap();
        assert_eq!(tx.last(), b"000000000000000000000000_482\n");
        controller.on_write(t(0), b"ping", &mut tx).unwrap();
        assert_eq!(tx.last(), b"ping");
    }

    #[test]
    fn deferred_reboot_waits_for_disconnect() {
        let mut controller = controller();
        controller.request_reboot();
        assert_eq!(controller.poll(t(0)), Ok(None));

        controller.on_disconnect();
        assert_eq!(controller.poll(t(1)), Ok(Some(DeferredAction::Reboot)));
        let (_, reset) = controller.release();
        assert_eq!(reset.resets(), 1);
    }

    #[test]
    fn flash_fault_latches() {
        let mut bank2 = Flash::new();
        bank2.fail_erase(true);
        let flash = flash_with(SimControl::new(), Flash::new(), bank2);
        let device = DeviceId { uid: [0; 12], mcu_id: 0 };
        let mut controller = FotaController::new(flash, config(), device, SimReset::default());
        let mut tx = Replies::default();

        let fatal = controller.on_write(t(0), &upgrade_frame(64, 0), &mut tx).unwrap_err();
        assert_eq!(fatal.error, Error::Erase);
        assert_eq!(fatal.code(), FaultCode::Flash);
        assert!(controller.is_halted());

        assert_eq!(controller.on_write(t(1), b"help", &mut tx), Err(fatal));
        assert_eq!(controller.poll(t(2)), Err(fatal));
        assert!(tx.0.is_empty());
    }

    #[test]
    fn failed_swap_is_fatal() {
        let mut control = SimControl::new();
        control.fail_option_program(true);
        let flash = flash_with(control, Flash::new(), Flash::new());
        let device = DeviceId { uid: [0; 12], mcu_id: 0 };
        let mut controller = FotaController::new(flash, config(), device, SimReset::default());
        let mut tx = Replies::default();
        controller.on_connect();

        let image = counting_image(64);
        upload(&mut controller, &image, image_crc(&image), &mut tx);
        controller.on_disconnect();

        let fatal = controller.poll(t(5)).unwrap_err();
        assert_eq!(fatal.code(), FaultCode::OptionBytes);
        let (_, reset) = controller.release();
        assert_eq!(reset.resets(), 0);
    }
}
