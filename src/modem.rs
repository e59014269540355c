//! Modem core: lifecycle state machine, action engine and convergence.
//!
//! This is the top level entry. The driver is advanced by exactly three
//! external callbacks: the periodic [`Modem::tick`], the per-byte
//! [`Modem::on_byte`] from the serial adapter, and the one-shot
//! [`Modem::at_timeout`]. A tick either emits at most one command or
//! decides to wait; received bytes only update state and re-post a
//! tick, so the two paths never interleave within one pass.

use log::{debug, error, info, warn};

use crate::at::AtEngine;
use crate::cmd;
use crate::config::{ModemConfig, RadioTech, CONFIG_OBJECT_LEN};
use crate::error::{Error, Fault, FaultRecord, Result};
use crate::hal::{ModemHal, TimerEvent};
use crate::info::{assign, ModemInfo, RegistrationStatus};
use crate::line::LineAssembler;
use crate::session::{SessionState, SessionTable};
use crate::stats::Stats;
use crate::store::{self, Store, UMI_CODE_MODEM_CFG};

/// Called exactly once per started communication session when the
/// session has terminated, normally or otherwise.
pub type FinishedCallback = fn(Result<()>);

/// Period of the recurring action tick.
pub(crate) const TICK_PERIOD_MS: u32 = 1000;

/// Default retry budget in seconds.
const MAX_ACTION_RETRIES: u16 = 15;
/// `+CPOF` can be slow to complete.
const ACTION_RETRIES_POWER_OFF: u16 = 15;
/// `+CFUN=4,1` seems to need a bit more time as well.
const ACTION_RETRIES_SHUTDOWN: u16 = 15;
/// Seconds to wait for CTS going low again.
const MAX_ACTION_RETRIES_WAIT_FOR_CTS_LOW: u16 = 20;
/// Registration fallback budget while the no-registration test case runs.
const ACTION_RETRIES_TEST_NO_REGISTRATION: u16 = 10;
/// Module reset input minimum assertion time.
const HW_RESET_ASSERTION_TIME_US: u32 = 100;

const CONNECTION_STATUS_CONNECTED: i32 = 1;
const SESSION_UP_AND_READY: i32 = 1;
/// Data went out but the send expected a different byte count; the
/// session stays usable.
const NOTIF_DATA_SENDING_OK_INV_LEN: u8 = 8;

/// Driver lifecycle states. The discriminants are persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ModemState {
	/// Driver not initialized
	NotAvailable = 0,
	/// Module stays in its initial powered-off state
	InitPoweredDown = 1,
	/// Reset pending
	ResetRequired = 2,
	/// Waiting for the module to boot
	WaitForCtsHigh = 3,
	/// Waiting for the AT interface to come up
	WaitForCtsLow = 4,
	/// Module booted but AT not confirmed yet
	Ready = 5,
	/// Probing the AT interface
	CheckAt = 6,
	/// Module is on and the AT interface answered
	AtReady = 7,
	/// Module should stop operation and be turned off
	PowerDownRequested = 8,
	/// Power-down request sent, waiting for the module to turn off
	PoweredDownWaitForCtsLow = 9,
	/// Powered off by command, no wakeup possible
	PoweredOff = 10,
	/// Held in reset after a fatal error
	HoldReset = 11,
}

impl ModemState {
	pub fn descr(self) -> &'static str {
		match self {
			ModemState::NotAvailable => "N/A",
			ModemState::InitPoweredDown => "OFF",
			ModemState::ResetRequired => "RSTP",
			ModemState::WaitForCtsHigh => "BOOT",
			ModemState::WaitForCtsLow => "BOOT",
			ModemState::Ready => "ON",
			ModemState::CheckAt => "ON",
			ModemState::AtReady => "ON AT",
			ModemState::PowerDownRequested => "SHTDWN",
			ModemState::PoweredDownWaitForCtsLow => "SHTDWN",
			ModemState::PoweredOff => "OFF",
			ModemState::HoldReset => "RST",
		}
	}
}

/// Actions the engine can be executing. The discriminants are persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Action {
	None = 0,
	/// Executes the hardware reset
	Reset = 1,
	/// Probe the AT interface with a bare `AT`
	CheckAt = 2,
	RequestModelIdentification = 3,
	RequestRevisionIdentification = 4,
	RequestSerialNumberIdentification = 5,
	UpdatePdpContext = 6,
	UpdateBandConfiguration = 7,
	ReadPrl = 8,
	/// Request the current functionality level
	GetCfun = 9,
	GetActiveLteBands = 10,
	ReadIccid = 11,
	/// Write information collected in RAM to the store
	StoreToUmi = 12,
	/// Issue `+CFUN=4,1`
	Shutdown = 13,
	UpdatePrl = 14,
	WaitForCtsHigh = 15,
	/// Send `+CPOF` to request power down
	RequestPowerDown = 16,
	StopReqPowerDown = 17,
	/// Execute the receive command for the active session
	GetPendingRxPacket = 18,
	WaitForCtsHigh2 = 19,
	WaitForCtsLow2 = 20,
	/// `+KCNXCFG` GPRS connection configuration
	GprsCnxCfg = 21,
	/// `+KUDPCFG` UDP session configuration
	UdpCnxCfg = 22,
	/// `+KTCPCFG` TCP session configuration
	TcpCnxCfg = 23,
	/// `+KTCPCNX` TCP connect
	ConnectTcpSocket = 24,
	/// Request signal quality with `+CESQ`
	ReqSignalQuality = 27,
	SendQueuedPacket = 28,
	/// Waiting for an application response
	WaitForResponse = 29,
	/// Issue `+CFUN=1,1`
	SetupFullFunc = 30,
	WaitForRegistration = 31,
	RequestCereg = 32,
	SetCereg = 33,
	CloseSession = 34,
	DeleteSession = 35,
	SetupPdpContext = 36,
	RequestFactorySerialNumber = 37,
}

/// Injectable misbehavior for bench testing, selected through the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TestCase {
	#[default]
	None,
	/// Suppress the `+KCNX_IND` message
	NoCnxIndication,
	/// Ignore success of `+KCNXCFG`
	KcnxcfgFail,
	/// Drop the CTS high indication
	NoCtsHigh,
	/// Drop the CTS low indication
	NoCtsLow,
	/// Do not control the reset pin
	NoReset,
	/// Do not receive data via the UART
	NoRx,
	/// Do not allow registration
	NoRegistration,
	/// Ignore session establishment
	NoUdpTcpSession,
	/// Ignore the `+CPOF` command
	CpofIgnore,
	/// Ignore the answer to `+CPOF`
	CpofIgnore2,
	/// Keep the preferred list setter from succeeding
	CfgPrlSetErr,
	/// Keep the reporting mode setter from succeeding
	CfgCeregFail,
	/// Keep the PDP context setter from succeeding
	CfgPdpContext,
	/// Drop `+CFUN?`
	CfunReq,
	/// Drop `+CFUN=1,1`
	CfunFullReq,
}

impl TestCase {
	pub fn from_u16(val: u16) -> Self {
		match val {
			1 => TestCase::NoCnxIndication,
			2 => TestCase::KcnxcfgFail,
			3 => TestCase::NoCtsHigh,
			4 => TestCase::NoCtsLow,
			5 => TestCase::NoReset,
			6 => TestCase::NoRx,
			7 => TestCase::NoRegistration,
			8 => TestCase::NoUdpTcpSession,
			9 => TestCase::CpofIgnore,
			10 => TestCase::CpofIgnore2,
			11 => TestCase::CfgPrlSetErr,
			12 => TestCase::CfgCeregFail,
			13 => TestCase::CfgPdpContext,
			14 => TestCase::CfunReq,
			15 => TestCase::CfunFullReq,
			_ => TestCase::None,
		}
	}
}

/// Actions that write module-resident configuration. Entering one of
/// them repeatedly without progress trips the set-parameter guard.
const ACTION_SETTER_LIST: [Action; 4] = [
	Action::SetupPdpContext,
	Action::UpdateBandConfiguration,
	Action::UpdatePrl,
	Action::SetCereg,
];

/// How often the same setter may be entered before giving up.
const SET_RETRY_MAX: u16 = 5;

/// The modem driver core.
///
/// One instance per radio module. All mutable driver state lives here;
/// external collaborators are reached through the two port parameters.
pub struct Modem<H: ModemHal, S: Store> {
	pub(crate) hal: H,
	pub(crate) store: S,

	pub(crate) state: ModemState,
	pub(crate) last_action: Action,
	pub(crate) want_to_send: bool,
	pub(crate) abort_requested: bool,
	pub(crate) test_case: TestCase,
	pub(crate) connected: bool,
	pub(crate) fault: FaultRecord,

	pub(crate) info: ModemInfo,
	pub(crate) cfg: ModemConfig,
	pub(crate) sessions: SessionTable,
	pub(crate) rx: LineAssembler,
	pub(crate) at: AtEngine,
	pub(crate) stats: Stats,

	/// Network registration reached home or roaming
	pub(crate) registered: bool,
	/// Remaining seconds to wait for an application response
	pub(crate) wait_for_rsp: u16,
	/// Bytes the module advertised but we have not read yet
	pub(crate) waiting_bytes: u16,
	pub(crate) read_retry: u16,

	/// Legacy retry counter, decremented when an action repeats
	pub(crate) action_retry: u16,
	/// Uptime seconds at which the current action exceeds its budget
	pub(crate) action_deadline: u32,
	/// Uptime seconds when the current action was entered
	pub(crate) action_started: u32,
	/// Uptime seconds at which the whole session is aborted
	pub(crate) session_deadline: u32,
	/// Ticks to skip before the current action emits again
	pub(crate) wait_before_retry: u32,
	/// Ticks to wait before re-running session setup while connected
	pub(crate) retry_timer: u8,

	/// `+KCNXCFG` has been accepted
	pub(crate) cfg_written: bool,
	/// `+KTCPCFG` has been accepted
	pub(crate) tcp_config: bool,
	pub(crate) push_info_to_store: bool,
	pub(crate) want_read_signal_quality: bool,

	pub(crate) last_set_action: Action,
	pub(crate) set_retry: u16,

	pub(crate) tx_buf: heapless::Vec<u8, 1024>,
	pub(crate) tx_queued: bool,
	pub(crate) rx_frame: heapless::Vec<u8, 1024>,

	pub(crate) callback: Option<FinishedCallback>,
	pub(crate) ready_to_send_ind: Option<fn()>,
	pub(crate) frame_received_ind: Option<fn()>,
}

impl<H: ModemHal, S: Store> Modem<H, S> {
	pub fn new(hal: H, store: S) -> Self {
		Modem {
			hal,
			store,
			state: ModemState::NotAvailable,
			last_action: Action::None,
			want_to_send: false,
			abort_requested: false,
			test_case: TestCase::None,
			connected: false,
			fault: FaultRecord::default(),
			info: ModemInfo::default(),
			cfg: ModemConfig::default(),
			sessions: SessionTable::new(),
			rx: LineAssembler::new(),
			at: AtEngine::new(),
			stats: Stats::default(),
			registered: false,
			wait_for_rsp: 0,
			waiting_bytes: 0,
			read_retry: 0,
			action_retry: MAX_ACTION_RETRIES,
			action_deadline: u32::MAX,
			action_started: 0,
			session_deadline: u32::MAX,
			wait_before_retry: 0,
			retry_timer: 0,
			cfg_written: false,
			tcp_config: false,
			push_info_to_store: true,
			want_read_signal_quality: false,
			last_set_action: Action::None,
			set_retry: 0,
			tx_buf: heapless::Vec::new(),
			tx_queued: false,
			rx_frame: heapless::Vec::new(),
			callback: None,
			ready_to_send_ind: None,
			frame_received_ind: None,
		}
	}

	/// Initializes the driver. On the very first power-up the action
	/// timer starts right away so the module identity gets collected
	/// even without a send request.
	pub fn init(&mut self) -> Result<()> {
		self.info.clear();
		self.rx.reset();
		self.at = AtEngine::new();
		self.sessions.clear();
		self.set_state(ModemState::InitPoweredDown);

		self.test_case = TestCase::from_u16(store::read_test_case(&mut self.store).unwrap_or(0));
		if self.test_case != TestCase::None {
			warn!("test case active: {:?}", self.test_case);
		}

		let loaded = self.stats.load(&mut self.store);
		if !loaded {
			self.hal.timer_start_recurring(TimerEvent::Tick, TICK_PERIOD_MS);
			self.fault_clear();
			self.stats.started += 1;
		}

		Ok(())
	}

	/// Starts a communication session. The callback fires exactly once
	/// when the session has terminated.
	pub fn start(&mut self, callback: FinishedCallback, want_to_send: bool) {
		self.callback = Some(callback);
		if want_to_send {
			self.request_to_send();
		}
		if !self.hal.timer_is_running(TimerEvent::Tick) {
			self.wakeup();
		}
	}

	pub fn request_to_send(&mut self) {
		self.want_to_send = true;
	}

	fn wakeup(&mut self) {
		self.abort_requested = false;
		if self.state == ModemState::PoweredOff {
			self.state = ModemState::InitPoweredDown;
		}
		self.hal.timer_start_recurring(TimerEvent::Tick, TICK_PERIOD_MS);
		self.fault_clear();
		self.stats.started += 1;
		self.action_deadline = self.hal.uptime_secs() + 10;
	}

	/// Queues one outbound payload. Consumed on successful send.
	pub fn queue_tx(&mut self, frame: &[u8]) -> Result<()> {
		if frame.len() > self.tx_buf.capacity() {
			return Err(Error::Overflow);
		}
		self.tx_buf.clear();
		let _ = self.tx_buf.extend_from_slice(frame);
		self.tx_queued = true;
		self.hal.post_tick();
		Ok(())
	}

	/// Copies the last received frame out and clears it.
	pub fn get_last_rx(&mut self, out: &mut [u8]) -> Result<usize> {
		if self.rx_frame.is_empty() {
			return Err(Error::NoData);
		}
		if out.len() < self.rx_frame.len() {
			return Err(Error::Overflow);
		}
		let len = self.rx_frame.len();
		out[..len].copy_from_slice(&self.rx_frame);
		self.rx_frame.clear();
		Ok(len)
	}

	/// Requests an orderly shutdown: sessions are closed top-down, the
	/// connection deleted, the radio disabled, then `+CPOF` issued.
	pub fn abort(&mut self) {
		self.abort_requested = true;
	}

	pub fn aborting(&self) -> bool {
		self.abort_requested
	}

	pub fn communication_in_progress(&self) -> bool {
		self.hal.timer_is_running(TimerEvent::Tick)
			&& (self.wants_to_send() || self.wait_for_rsp > 0)
	}

	pub fn is_registered(&self) -> bool {
		self.registered
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	pub fn is_rf_active(&self) -> bool {
		self.info.functionality_is_full()
	}

	pub fn is_udp_session_active(&self) -> bool {
		self.sessions.query(0) == SessionState::OpenUdp
	}

	pub fn is_tcp_session_active(&self) -> bool {
		self.sessions.query(0) == SessionState::OpenTcp
	}

	pub fn is_error(&self) -> bool {
		self.fault.last != Fault::None
	}

	/// Active band and radio access technology.
	pub fn band_rat(&self) -> (u8, u8) {
		(self.info.active_band(), self.info.rat)
	}

	pub fn modem_info(&self) -> &ModemInfo {
		&self.info
	}

	pub fn last_fault(&self) -> FaultRecord {
		self.fault
	}

	pub fn state(&self) -> ModemState {
		self.state
	}

	/// Application hook fired when a received frame is available.
	pub fn set_frame_received_ind(&mut self, ind: fn()) {
		self.frame_received_ind = Some(ind);
	}

	/// Application hook fired when the session is up and a payload may
	/// be queued.
	pub fn set_ready_to_send_ind(&mut self, ind: fn()) {
		self.ready_to_send_ind = Some(ind);
	}

	pub fn hal(&self) -> &H {
		&self.hal
	}

	pub fn hal_mut(&mut self) -> &mut H {
		&mut self.hal
	}

	pub fn store_ref(&self) -> &S {
		&self.store
	}

	pub fn store_mut(&mut self) -> &mut S {
		&mut self.store
	}

	/* state handling */

	fn set_state(&mut self, state: ModemState) {
		if self.state != state {
			self.state = state;
			store::write_current_state(&mut self.store, state as u16);
			info!(
				"state {} ({}{}{}) action {:?}",
				state as u16,
				state.descr(),
				if self.registered { " REG" } else { "" },
				if self.connected { " CON" } else { "" },
				self.last_action
			);
		}
	}

	fn set_action_retries(&mut self, retries: u16) {
		self.action_retry = retries;
		self.action_deadline = self.hal.uptime_secs() + u32::from(retries);
	}

	/// Guard against a configuration setter looping without progress.
	fn set_action_set_req(&mut self, action: Action) {
		if action != self.last_set_action {
			self.set_retry = 0;
			self.last_set_action = action;
		} else {
			self.set_retry += 1;
			if self.set_retry >= SET_RETRY_MAX {
				self.fault_occurred(Fault::SetParamFailed);
				self.request_power_down();
				self.wait_before_retry = 1;
			} else {
				warn!("set retry: {}", self.set_retry);
			}
		}
	}

	pub(crate) fn set_action(&mut self, action: Action) {
		if action != self.last_action {
			debug!("new action: {:?}", action);
			self.wait_before_retry = 0;
			self.action_started = self.hal.uptime_secs();

			if ACTION_SETTER_LIST.contains(&action) {
				self.set_action_set_req(action);
			}

			// flush what the action being left has collected
			match self.last_action {
				Action::RequestModelIdentification => {
					store::write_model(&mut self.store, self.info.model.as_str());
				}
				Action::RequestRevisionIdentification => {
					store::write_sw_release(&mut self.store, self.info.sw_release.as_str());
				}
				Action::RequestFactorySerialNumber => {
					store::write_fsn(&mut self.store, self.info.fsn.as_str());
				}
				Action::RequestSerialNumberIdentification => {
					store::write_imei(&mut self.store, self.info.imei.as_str());
				}
				Action::GetActiveLteBands => {
					store::write_active_bands(&mut self.store, self.info.rat, self.info.bnd.as_str());
				}
				_ => {}
			}

			self.last_action = action;

			let retries = match action {
				Action::WaitForCtsLow2 => MAX_ACTION_RETRIES_WAIT_FOR_CTS_LOW,
				Action::WaitForResponse => self.cfg.wait_for_response_timeout,
				Action::WaitForRegistration => {
					if self.test_case == TestCase::NoRegistration {
						ACTION_RETRIES_TEST_NO_REGISTRATION
					} else {
						self.cfg.wait_for_registration_timeout
					}
				}
				Action::UdpCnxCfg => 25,
				Action::RequestPowerDown => ACTION_RETRIES_POWER_OFF,
				Action::Shutdown => ACTION_RETRIES_SHUTDOWN,
				_ => MAX_ACTION_RETRIES,
			};
			self.set_action_retries(retries);

			store::write_current_action(&mut self.store, action as u16);
		} else if self.action_retry > 0 {
			debug!("retry same action ({:?}): {}", self.last_action, self.action_retry);
			self.action_retry -= 1;
		}
	}

	/// Enters an action and performs its emission, honoring the
	/// wait-before-retry pause.
	pub(crate) fn trigger_action(&mut self, action: Action) {
		self.set_action(action);

		if self.wait_before_retry > 0 {
			self.wait_before_retry -= 1;
			debug!("wait before retry: {}", self.wait_before_retry);
			return;
		}

		match action {
			Action::GetPendingRxPacket => {
				let cmd = cmd::read_data(self.cfg.cnx_type.as_str(), self.waiting_bytes);
				self.send_cmd(&cmd);
			}

			Action::Reset => {
				self.execute_reset();
				self.set_action(Action::WaitForCtsHigh);
			}

			Action::CheckAt => self.send_cmd(cmd::CHECK_AT),

			Action::WaitForCtsHigh2 => debug!("wait for cts high.."),
			Action::WaitForCtsLow2 => debug!("wait for cts low.."),

			Action::WaitForRegistration => {
				debug!(
					"wait for registration ({}, {})",
					self.hal.uptime_secs().saturating_sub(self.action_started),
					self.action_deadline.saturating_sub(self.hal.uptime_secs())
				);
			}

			Action::GprsCnxCfg => {
				let cmd = cmd::gprs_connection_config(self.cfg.apn.as_str());
				self.send_cmd(&cmd);
			}

			Action::UdpCnxCfg => self.send_cmd(cmd::UDP_SESSION_CONFIG),

			Action::TcpCnxCfg => {
				let cmd =
					cmd::tcp_connection_config(self.cfg.remote_address.as_str(), self.cfg.remote_port);
				self.send_cmd(&cmd);
			}

			Action::ConnectTcpSocket => {
				self.send_cmd(cmd::TCP_START_CONNECTION);
				self.wait_before_retry = 10;
			}

			Action::RequestPowerDown => {
				if self.test_case != TestCase::CpofIgnore {
					self.send_cmd(cmd::POWER_OFF);
				}
			}

			Action::Shutdown => {
				warn!("shutdown!..");
				let cmd = cmd::set_phone_functionality(4, 1);
				self.send_cmd(&cmd);
			}

			Action::CloseSession => {
				if let Some(slot) = self.sessions.find_highest_open() {
					self.close_session(slot as u8 + 1);
				}
			}

			Action::DeleteSession => {
				if self.cfg.is_udp() {
					self.send_cmd(cmd::UDP_DELETE_SESSIONS);
				}
				if self.cfg.is_tcp() {
					self.send_cmd(cmd::TCP_DELETE_SESSIONS);
				}
			}

			Action::ReqSignalQuality => self.send_cmd(cmd::READ_SIGNAL_QUALITY),

			Action::SendQueuedPacket => {
				let len = self.tx_buf.len() as u16;
				if self.cfg.is_tcp() {
					let cmd = cmd::send_frame_tcp(len);
					self.send_cmd(&cmd);
					self.at.queue_tx = len;
					self.stats.tcp_tx_bytes += u32::from(len);
					self.stats.tcp_tx_frames += 1;
				} else if self.cfg.is_udp() {
					let cmd =
						cmd::send_frame_udp(len, self.cfg.remote_address.as_str(), self.cfg.remote_port);
					self.send_cmd(&cmd);
					self.at.queue_tx = len;
					self.stats.udp_tx_bytes += u32::from(len);
					self.stats.udp_tx_frames += 1;
				} else {
					error!("invalid cnx configuration!");
				}
			}

			Action::WaitForResponse => {
				debug!(
					"wait_for_rsp ({}, {})",
					self.wait_for_rsp,
					self.action_deadline.saturating_sub(self.hal.uptime_secs())
				);
				if self.wait_for_rsp > 0 {
					self.wait_for_rsp -= 1;
				}
				if self.wait_for_rsp == 0 {
					warn!("no response received!");
				}
			}

			Action::UpdatePdpContext => self.send_cmd(cmd::READ_PDP_CONTEXT),

			Action::SetupPdpContext => {
				debug!("{} != {}", self.info.pdp_context[0].apn, self.cfg.apn);
				let cmd = cmd::set_pdp_context("IPV4V6", self.cfg.apn.as_str());
				self.send_cmd(&cmd);
				self.info.pdp_context[0].cid.clear();
			}

			Action::SetupFullFunc => {
				if self.test_case == TestCase::CfunFullReq {
					self.arm_at_timeout();
				} else {
					let cmd = cmd::set_phone_functionality(1, 1);
					self.send_cmd(&cmd);
				}
				self.stats.full_function += 1;
				self.wait_before_retry = 3;
			}

			Action::ReadPrl => self.send_cmd(cmd::READ_PRL),

			Action::UpdatePrl => {
				let cmd =
					cmd::set_preferred_rat_list(self.cfg.rat[0], self.cfg.rat[1], self.cfg.rat[2]);
				self.send_cmd(&cmd);
				self.info.prl_valid = false;
				info!("preferred list changed -> reset required!");
				self.request_reset();
			}

			Action::RequestCereg => {
				self.send_cmd(cmd::REQUEST_CEREG);
				self.wait_before_retry = 1;
			}

			Action::SetCereg => {
				let cmd = cmd::set_cereg(2);
				self.send_cmd(&cmd);
				self.wait_before_retry = 1;
				// ensure the reporting mode gets requested again
				self.info.cereg.clear();
			}

			Action::GetCfun => {
				if self.test_case == TestCase::CfunReq {
					self.arm_at_timeout();
				} else {
					self.send_cmd(cmd::REQUEST_CFUN);
				}
			}

			Action::GetActiveLteBands => {
				self.send_cmd(cmd::READ_ACTIVE_BAND);
				if !self.push_info_to_store {
					debug!("remember to push info again!");
					self.push_info_to_store = true;
				}
			}

			_ => {}
		}
	}

	fn close_session(&mut self, session_id: u8) {
		if self.cfg.is_udp() {
			let cmd = cmd::close_session("UDP", session_id);
			self.send_cmd(&cmd);
		}
		if self.cfg.is_tcp() {
			let cmd = cmd::close_session("TCP", session_id);
			self.send_cmd(&cmd);
		}
	}

	fn wants_to_send(&self) -> bool {
		self.want_to_send || self.tx_queued
	}

	fn startup_required(&self) -> bool {
		self.want_to_send || self.info.model.is_empty()
	}

	fn no_more_actions_required(&self) -> bool {
		self.state == ModemState::PoweredOff
			|| (self.state == ModemState::InitPoweredDown
				&& !self.want_to_send
				&& !self.info.model.is_empty())
	}

	fn received_data_waiting(&self) -> bool {
		self.waiting_bytes > 0
	}

	fn action_deadline_exceeded(&self) -> bool {
		self.hal.uptime_secs() >= self.action_deadline
	}

	/* faults */

	fn fault_clear(&mut self) {
		self.fault.last = Fault::None;
		store::clear_last_error(&mut self.store);
	}

	pub(crate) fn fault_occurred(&mut self, fault: Fault) {
		if fault != self.fault.last {
			error!("fault: {:?} ({})", fault, fault.descr());
			self.fault.last = fault;
			self.fault.state = self.state as u16;
			self.fault.action = self.last_action as u16;
			self.fault.datetime = self.hal.datetime_secs();
			store::write_last_error(
				&mut self.store,
				fault as u16,
				self.fault.state,
				self.fault.action,
				self.fault.datetime,
			);
		}
	}

	/* transitions */

	fn not_ready_wait_for_cts(&mut self) {
		self.set_state(ModemState::WaitForCtsHigh);
	}

	fn request_power_down(&mut self) {
		debug!("request power down");
		self.set_state(ModemState::PowerDownRequested);
	}

	fn request_reset(&mut self) {
		self.set_state(ModemState::ResetRequired);
	}

	fn hold_reset(&mut self) {
		self.state = ModemState::HoldReset;
		self.hal.reset_low();
		self.stop_process();
	}

	fn stop_process(&mut self) {
		debug!("stop process");
		self.hal.uart_close();
		self.hal.timer_stop(TimerEvent::Tick);
		self.stats.save(&mut self.store);
		self.set_action(Action::StopReqPowerDown);
		if let Some(callback) = self.callback.take() {
			callback(Ok(()));
		}
	}

	fn execute_reset(&mut self) {
		self.hal.uart_close();
		if self.test_case != TestCase::NoReset {
			self.hal.reset_low();
		}
		self.hal.delay_us(HW_RESET_ASSERTION_TIME_US);
		self.not_ready_wait_for_cts();
		if self.test_case != TestCase::NoReset {
			self.hal.reset_high();
		}
	}

	fn load_config(&mut self) {
		let mut buf = [0u8; CONFIG_OBJECT_LEN];
		match self.store.read_object(UMI_CODE_MODEM_CFG, &mut buf) {
			Ok(len) if len >= CONFIG_OBJECT_LEN => {
				if let Ok(cfg) = ModemConfig::from_bytes(&buf) {
					self.cfg = cfg;
				}
			}
			_ => warn!("configuration object missing, using defaults"),
		}
		info!(
			"config: apn {} remote {}:{} type {}",
			self.cfg.apn, self.cfg.remote_address, self.cfg.remote_port, self.cfg.cnx_type.as_str()
		);
	}

	/// Samples CTS and advances the boot or power-down handshake.
	fn cts_check(&mut self) {
		if self.hal.cts_is_high() {
			if self.test_case != TestCase::NoCtsHigh
				&& self.state == ModemState::WaitForCtsHigh
			{
				debug!("now wait for low");
				self.set_state(ModemState::WaitForCtsLow);
			}
		} else if self.test_case != TestCase::NoCtsLow {
			if self.state == ModemState::WaitForCtsLow {
				info!("modem ready!");
				self.set_state(ModemState::Ready);
				if self.hal.uart_open().is_err() {
					error!("uart open failed");
				}
				self.hal.post_tick();
			}
			if self.state == ModemState::PoweredDownWaitForCtsLow {
				self.set_state(ModemState::PoweredOff);
				self.hal.post_tick();
			}
		}
	}

	/* the action tick */

	/// Advances the state machine by one action tick.
	pub fn tick(&mut self) {
		debug!(
			"tick {} ({}{}{}{}{}) {:?}",
			self.state as u16,
			self.state.descr(),
			if self.registered { " REG" } else { "" },
			if self.connected { " CON" } else { "" },
			if self.is_udp_session_active() { " UDP" } else { "" },
			if self.is_tcp_session_active() { " TCP" } else { "" },
			self.last_action
		);

		if self.no_more_actions_required() {
			debug!("module powered down, all actions done");
			self.stop_process();
			return;
		}

		if self.action_deadline_exceeded() {
			self.on_action_deadline();
			return;
		}

		match self.state {
			ModemState::NotAvailable => error!("driver not initialized!"),

			ModemState::InitPoweredDown => {
				if self.startup_required() {
					self.set_state(ModemState::ResetRequired);
				} else {
					self.stop_process();
				}
			}

			ModemState::ResetRequired => {
				self.load_config();
				self.trigger_action(Action::Reset);
			}

			ModemState::WaitForCtsHigh => {
				self.trigger_action(Action::WaitForCtsHigh2);
				self.cts_check();
			}

			ModemState::WaitForCtsLow => {
				self.trigger_action(Action::WaitForCtsLow2);
				self.cts_check();
			}

			ModemState::Ready => {
				self.set_state(ModemState::CheckAt);
				self.trigger_action(Action::CheckAt);
			}

			ModemState::CheckAt => self.trigger_action(Action::CheckAt),

			ModemState::AtReady => self.next_at_cmd_action(),

			ModemState::PowerDownRequested => self.trigger_action(Action::RequestPowerDown),

			ModemState::PoweredDownWaitForCtsLow => self.cts_check(),

			ModemState::PoweredOff => self.stop_process(),

			ModemState::HoldReset => self.stop_process(),
		}
	}

	/// The retry budget of the current action ran out.
	fn on_action_deadline(&mut self) {
		if self.state == ModemState::AtReady && self.last_action == Action::WaitForResponse {
			warn!("action budget exceeded (no err), action {:?}", self.last_action);
		} else {
			error!("action budget exceeded! action {:?}", self.last_action);
		}

		match self.state {
			ModemState::WaitForCtsHigh => {
				self.fault_occurred(Fault::CtsHighAfterResetTimedOut);
				self.hold_reset();
			}

			ModemState::WaitForCtsLow => {
				self.fault_occurred(Fault::CtsLowAfterResetTimedOut);
				self.hold_reset();
			}

			ModemState::CheckAt => {
				self.fault_occurred(Fault::AtCheckFailed);
				self.stats.failed_at += 1;
				self.hold_reset();
			}

			ModemState::AtReady => match self.last_action {
				Action::ReadIccid => {
					self.fault_occurred(Fault::IccidReadFailed);
					self.request_power_down();
				}
				Action::UdpCnxCfg => {
					self.fault_occurred(Fault::UdpSocketSetupFailed);
					self.request_power_down();
				}
				Action::TcpCnxCfg => {
					self.fault_occurred(Fault::TcpSocketSetupFailed);
					self.request_power_down();
				}
				Action::WaitForRegistration => {
					self.want_to_send = false;
					error!("not able to access network!");
					self.fault_occurred(Fault::RegistrationTimedOut);
					self.request_power_down();
					self.stats.failed_registration += 1;
				}
				Action::WaitForResponse => {
					warn!("no response received!");
					self.wait_for_rsp = 0;
				}
				_ => {
					self.fault_occurred(Fault::RetriesExceeded);
					self.request_power_down();
				}
			},

			ModemState::PowerDownRequested => self.hold_reset(),

			ModemState::PoweredDownWaitForCtsLow => self.hold_reset(),

			_ => self.fault_occurred(Fault::AtNotReadyRetriesExceeded),
		}

		// short window so the recovery action can run
		self.set_action_retries(2);
	}

	/// Steady-state arbitration while the AT interface is up.
	fn next_at_cmd_action(&mut self) {
		if self.received_data_waiting() {
			self.trigger_action(Action::GetPendingRxPacket);
			return;
		}

		if self.at_busy() {
			debug!("at busy");
			return;
		}

		if self.hal.uptime_secs() > self.session_deadline {
			self.abort();
			self.session_deadline = u32::MAX;
			warn!("session timed out!");
		}

		if self.read_data() {
			// a convergence step executed
		} else if self.abort_requested {
			warn!("abort requested");
			self.shutdown_actions();
		} else if self.wait_for_rsp > 0 {
			self.trigger_action(Action::WaitForResponse);
		} else if self.wants_to_send() {
			if !self.registered {
				self.prepare_to_send_actions();
			} else {
				self.connect_actions();
			}
		} else if self.info.functionality_is_not_off() {
			warn!("no message queued, execute shutdown!");
			self.shutdown_actions();
		} else {
			debug!("don't want to send");
			self.set_state(ModemState::PowerDownRequested);
		}
	}

	/// The convergence checks: the first one whose predicate holds emits
	/// its action. Returns false at the fixed point.
	fn read_data(&mut self) -> bool {
		if self.info.cesq.datetime_lastsync != self.info.cesq.datetime {
			debug!("persist signal quality");
			store::write_cesq(
				&mut self.store,
				&self.info.cesq,
				self.info.active_band(),
				self.info.pdp_context[0].addr.as_str(),
			);
			self.info.cesq.datetime_lastsync = self.info.cesq.datetime;
		}

		// non-variable identity first, execution commands
		if self.info.model.is_empty() {
			self.send_cmd(cmd::REQUEST_MODEL);
			self.set_action(Action::RequestModelIdentification);
		} else if self.info.sw_release.is_empty() {
			self.send_cmd(cmd::REQUEST_REVISION);
			self.set_action(Action::RequestRevisionIdentification);
		} else if self.info.fsn.is_empty() {
			self.send_cmd(cmd::REQUEST_FSN);
			self.set_action(Action::RequestFactorySerialNumber);
		} else if self.info.imei.is_empty() {
			self.send_cmd(cmd::REQUEST_IMEI);
			self.set_action(Action::RequestSerialNumberIdentification);
		}
		// currently set values
		else if self.info.pdp_context[0].cid.is_empty() {
			self.trigger_action(Action::UpdatePdpContext);
		} else if self.info.pdp_context[0].apn != self.cfg.apn
			|| self.test_case == TestCase::CfgPdpContext
		{
			self.trigger_action(Action::SetupPdpContext);
		} else if !self.info.bnd_bitmap[RadioTech::CatM1 as usize].is_empty()
			&& self.info.bnd_bitmap[RadioTech::CatM1 as usize] != self.cfg.bnd_bitmap[0]
		{
			debug!(
				"{} != {}",
				self.info.bnd_bitmap[RadioTech::CatM1 as usize], self.cfg.bnd_bitmap[0]
			);
			let cmd = cmd::set_band_configuration(RadioTech::CatM1 as u8, self.cfg.bnd_bitmap[0].as_str());
			self.send_cmd(&cmd);
			self.info.bnd_bitmap[RadioTech::CatM1 as usize].clear();
		} else if !self.info.bnd_bitmap[RadioTech::NbIot as usize].is_empty()
			&& self.info.bnd_bitmap[RadioTech::NbIot as usize] != self.cfg.bnd_bitmap[1]
		{
			debug!(
				"{} != {}",
				self.info.bnd_bitmap[RadioTech::NbIot as usize], self.cfg.bnd_bitmap[1]
			);
			let cmd = cmd::set_band_configuration(RadioTech::NbIot as u8, self.cfg.bnd_bitmap[1].as_str());
			self.send_cmd(&cmd);
			self.info.bnd_bitmap[RadioTech::NbIot as usize].clear();
		} else if self.info.bnd_bitmap[RadioTech::CatM1 as usize].is_empty()
			|| self.info.bnd_bitmap[RadioTech::NbIot as usize].is_empty()
		{
			// collect missing band configuration information
			self.send_cmd(cmd::READ_BAND_CONFIGURATION);
			self.set_action(Action::UpdateBandConfiguration);
		} else if !self.info.prl_valid {
			self.trigger_action(Action::ReadPrl);
		} else if self.info.prl != self.cfg.rat || self.test_case == TestCase::CfgPrlSetErr {
			self.trigger_action(Action::UpdatePrl);
		} else if self.info.cereg.is_empty() {
			self.trigger_action(Action::RequestCereg);
		} else if self.info.cereg.as_str() != "2" || self.test_case == TestCase::CfgCeregFail {
			self.trigger_action(Action::SetCereg);
		} else if self.info.fun.is_empty() {
			self.trigger_action(Action::GetCfun);
		} else if self.info.bnd.is_empty() {
			self.trigger_action(Action::GetActiveLteBands);
		}
		// SIM commands
		else if self.info.iccid.is_empty() {
			self.send_cmd(cmd::REQUEST_ICCID);
			self.set_action(Action::ReadIccid);
		} else if self.want_read_signal_quality {
			self.trigger_action(Action::ReqSignalQuality);
		} else if self.push_info_to_store {
			debug!("pushed info to store");
			store::write_iccid(&mut self.store, self.info.iccid.as_str());
			self.push_info_to_store = false;
			self.hal.post_tick();
			self.set_action(Action::StoreToUmi);
		} else {
			return false;
		}
		true
	}

	fn prepare_to_send_actions(&mut self) {
		if !self.info.functionality_is_full() {
			warn!("modem not active, try to activate!..");
			self.trigger_action(Action::SetupFullFunc);
		} else {
			self.trigger_action(Action::WaitForRegistration);
		}
	}

	fn connect_actions(&mut self) {
		debug!(
			"connect: connected {} slot0 {:?} cfg_written {} queued {} want {}",
			self.connected,
			self.sessions.query(0),
			self.cfg_written,
			self.tx_queued,
			self.want_to_send
		);

		let slot0_closed = self.sessions.query(0) == SessionState::Closed;

		if !self.cfg_written && slot0_closed {
			self.trigger_action(Action::GprsCnxCfg);
		} else if self.cfg_written && !self.connected && slot0_closed {
			self.setup_session();
			self.retry_timer = 3;
		} else if self.cfg_written && self.connected && slot0_closed {
			if self.retry_timer > 0 {
				self.retry_timer -= 1;
			} else {
				self.setup_session();
			}
		} else if self.connected && !slot0_closed {
			if !self.tx_queued && self.want_to_send {
				info!("ready to send!");
				if let Some(ind) = self.ready_to_send_ind {
					ind();
				}
			} else if self.tx_queued {
				self.trigger_action(Action::SendQueuedPacket);
				self.want_to_send = false;
			} else {
				error!("invalid state, should never come here");
			}
		} else if !self.connected && !slot0_closed {
			warn!("session active but not connected, remove session");
			self.close_session(1);
			self.sessions.mark_closed(0);
		} else {
			error!("state not handled!");
		}
	}

	fn setup_session(&mut self) {
		if self.cfg.is_tcp() {
			if !self.tcp_config {
				self.trigger_action(Action::TcpCnxCfg);
			} else {
				self.trigger_action(Action::ConnectTcpSocket);
			}
		} else if self.cfg.is_udp() {
			self.trigger_action(Action::UdpCnxCfg);
		} else {
			error!("invalid cnx configuration!");
		}
	}

	/// Close-down: sessions top-down, then the connection, then the
	/// radio, then `+CPOF`.
	fn shutdown_actions(&mut self) {
		if self.sessions.find_highest_open().is_some() {
			self.trigger_action(Action::CloseSession);
		} else if self.connected {
			self.trigger_action(Action::DeleteSession);
		} else if self.info.functionality_is_not_off() {
			self.trigger_action(Action::Shutdown);
		} else {
			self.request_power_down();
		}
	}

	/* indications from the response layer */

	pub(crate) fn at_indication(&mut self) {
		if self.state == ModemState::CheckAt {
			info!("at ready");
			self.set_state(ModemState::AtReady);
			self.hal.post_tick();
		}
	}

	/// The outstanding command completed with `OK`.
	pub(crate) fn at_req_done(&mut self) {
		if self.last_action == Action::RequestPowerDown
			&& self.test_case != TestCase::CpofIgnore2
		{
			self.set_state(ModemState::PoweredDownWaitForCtsLow);
		}
		if self.last_action == Action::TcpCnxCfg {
			self.tcp_config = true;
		}
		if self.last_action == Action::ConnectTcpSocket {
			// do not retrigger
			return;
		}
		if self.last_action == Action::GprsCnxCfg {
			if self.test_case != TestCase::KcnxcfgFail {
				self.cfg_written = true;
			}
			return;
		}
		if self.last_action == Action::UdpCnxCfg {
			// do not retrigger, the session indication drives the next step
			return;
		}

		match self.last_action {
			Action::ReqSignalQuality => {
				debug!("reading signal quality done");
				self.want_read_signal_quality = false;
			}

			Action::SetupFullFunc => {
				self.session_deadline =
					self.hal.uptime_secs() + u32::from(self.cfg.communication_session_timeout);
				debug!("max session duration: {} s", self.cfg.communication_session_timeout);
				self.not_ready_wait_for_cts();
				// the module does not report the new level back reliably
				assign(&mut self.info.fun, "1");
			}

			Action::Shutdown => {
				self.not_ready_wait_for_cts();
				self.info.fun.clear();
			}

			Action::CloseSession => {
				if let Some(slot) = self.sessions.find_highest_open() {
					self.sessions.mark_closed(slot);
				}
			}

			Action::DeleteSession => self.connected = false,

			Action::SendQueuedPacket => {
				self.tx_queued = false;
				self.tx_buf.clear();
				self.wait_for_rsp = self.cfg.wait_for_response_timeout;
				debug!("remove tx pkg from queue, wait {} s", self.wait_for_rsp);
			}

			_ => {}
		}

		self.hal.post_tick();
	}

	/// `+KTCP_DATA` / `+KUDP_DATA`: the module advertised pending bytes.
	pub(crate) fn data_ready_ind(&mut self, bytes_ready: u16, udp: bool) {
		debug!("data ready to read ({} bytes)", bytes_ready);
		self.waiting_bytes = bytes_ready;
		if udp {
			self.want_read_signal_quality = true;
		}
		self.hal.post_tick();
	}

	/// A raw payload arrived and left raw mode.
	pub(crate) fn raw_frame_received(&mut self, frame: &[u8]) {
		if frame.is_empty() {
			error!("received frame with invalid length");
			return;
		}

		let len = frame.len() as u16;
		if len > self.waiting_bytes {
			error!("waiting_bytes {} < frame {} -> reset to 0", self.waiting_bytes, len);
			self.waiting_bytes = 0;
		} else {
			self.waiting_bytes -= len;
		}
		if self.waiting_bytes == 0 {
			self.wait_for_rsp = 0;
		}

		self.rx_frame.clear();
		let take = frame.len().min(self.rx_frame.capacity());
		let _ = self.rx_frame.extend_from_slice(&frame[..take]);

		if self.is_udp_session_active() {
			self.stats.udp_rx_frames += 1;
			self.stats.udp_rx_bytes += u32::from(len);
		}
		if self.is_tcp_session_active() {
			self.stats.tcp_rx_frames += 1;
			self.stats.tcp_rx_bytes += u32::from(len);
		}

		if let Some(ind) = self.frame_received_ind {
			ind();
		}

		// fresh signal quality next time the loop is idle
		self.want_read_signal_quality = true;

		self.hal.post_tick();
	}

	/// Trailer arrived with no payload: the advertised bytes are gone.
	pub(crate) fn no_data_indication(&mut self) {
		error!("no data!");
		self.stats.empty_packets += 1;
		self.stats.lost_bytes += u32::from(self.waiting_bytes);
		self.waiting_bytes = 0;
	}

	/// `+KTCP_NOTIF` / `+KUDP_NOTIF`.
	pub(crate) fn session_status_changed_ind(&mut self, session_id: i32, notif: u8, tcp: bool) {
		let Some(slot) = slot_from_wire(session_id) else {
			return;
		};
		if notif != NOTIF_DATA_SENDING_OK_INV_LEN {
			self.sessions.mark_closed(slot);
			if tcp {
				// do not wait for an answer on a dead session
				self.wait_for_rsp = 0;
				self.tcp_config = false;
			}
		}
		self.hal.post_tick();
	}

	/// `+KTCP_IND` / `+KUDP_IND`.
	pub(crate) fn session_active_ind(&mut self, session_id: i32, status: i32, tcp: bool) {
		if self.test_case == TestCase::NoUdpTcpSession {
			return;
		}
		let Some(slot) = slot_from_wire(session_id) else {
			return;
		};
		if status == SESSION_UP_AND_READY {
			let kind = if tcp { SessionState::OpenTcp } else { SessionState::OpenUdp };
			self.sessions.mark_open(slot, kind);
		}
		self.hal.post_tick();
	}

	/// `+KCNX_IND` connection status notification.
	pub(crate) fn connection_status_changed_ind(&mut self, _cnx_cnf: i32, status: i32) {
		if self.test_case == TestCase::NoCnxIndication {
			return;
		}

		if status == CONNECTION_STATUS_CONNECTED {
			self.connected = true;
		} else {
			self.connected = false;
			self.tcp_config = false;
			self.cfg_written = false;
		}
		self.hal.post_tick();
	}

	/// Reporting mode from a `+CEREG?` response.
	pub(crate) fn registration_mode(&mut self, n: &str) {
		if n.len() >= 4 {
			error!("registration mode arg too long!");
		} else {
			assign(&mut self.info.cereg, n);
		}
	}

	/// Unsolicited registration status.
	pub(crate) fn registration_status_ind(&mut self, status: i8) {
		if self.test_case == TestCase::NoRegistration {
			return;
		}

		let state = RegistrationStatus::from_code(status);
		self.info.registration_status = state;
		if state.is_registered() {
			info!(
				"device registered ({}) after {} s",
				state.descr(),
				self.hal.uptime_secs().saturating_sub(self.action_started)
			);
			self.registered = true;
			// re-read what registration may have changed
			self.info.bnd.clear();
			self.info.pdp_context[0].cid.clear();
			self.want_read_signal_quality = true;
		} else {
			debug!("registration: {}", state.descr());
			self.registered = false;
		}
		store::write_registration_status(&mut self.store, status);
		self.hal.post_tick();
	}

	/// `+CME` error sub-code.
	pub(crate) fn error_ind(&mut self, error_num: i32) {
		error!("error indication {}", error_num);
		if self.read_retry > 0 {
			self.read_retry -= 1;
		}
	}
}

/// Validates a table slot decoded from a one-based wire session id.
fn slot_from_wire(session_id: i32) -> Option<usize> {
	if !(0..crate::session::SESSION_ID_MAX as i32).contains(&session_id) {
		error!("invalid session_id: {}", session_id);
		return None;
	}
	Some(session_id as usize)
}
