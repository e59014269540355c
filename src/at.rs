//! AT interface: command emission and response dispatch.
//!
//! Response lines are split into a verb and quote-stripped positional
//! arguments, then dispatched. Some side effects depend on what went
//! out before: command echoes arm the info-request target and the
//! send/receive byte counts that a later `CONNECT` consumes.
//!
//! While one command is outstanding (no `OK`/`ERROR` yet and the
//! response timer still pending) no further command is emitted.

use core::fmt::Write;

use heapless::{String, Vec};
use log::{debug, error, info, warn};

use crate::hal::{ModemHal, TimerEvent};
use crate::info::assign;
use crate::line::{RxEvent, EOF_PATTERN};
use crate::modem::{Modem, TestCase};
use crate::store::Store;

/// One-shot response timeout armed with each emission.
const AT_TIMEOUT_MS: u32 = 4000;

/// Command scratch: `AT` + body + CR.
const AT_MSG_LEN_MAX: usize = 256;

/// Payload plus trailer scratch for raw-mode sends.
const RAW_TX_CAP: usize = 2560;

const MAX_ARGS: usize = 31;

/// Which observed field the next bare response line belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InfoField {
	Model,
	SwRelease,
	Imei,
}

/// Latches of the AT exchange in flight.
#[derive(Default)]
pub(crate) struct AtEngine {
	/// A command is outstanding
	pub(crate) wait_rsp: bool,
	/// Raw payload transmission announced, completion pending
	pub(crate) send_raw: bool,
	/// Bytes a `CONNECT` will send
	pub(crate) queue_tx: u16,
	/// Bytes a `CONNECT` will receive
	pub(crate) queue_rx: u16,
	pub(crate) info_req: Option<InfoField>,
	pub(crate) value_temp: String<32>,
	/// The previous line was the echo of the bare `AT` probe
	pub(crate) at_ready_rcvd: bool,
}

impl AtEngine {
	pub fn new() -> Self {
		AtEngine::default()
	}
}

/// Splits a response line into verb and arguments.
///
/// The verb runs to the first `:` or `=`; the rest splits on `,` with
/// surrounding double quotes removed and empty positions collapsed.
fn split_line(line: &str) -> (&str, Vec<&str, MAX_ARGS>) {
	let mut args = Vec::new();
	let Some(pos) = line.find([':', '=']) else {
		return (line.trim(), args);
	};
	for raw in line[pos + 1..].split(',') {
		let token = raw.trim();
		if token.is_empty() {
			continue;
		}
		let token = token
			.strip_prefix('"')
			.and_then(|t| t.strip_suffix('"'))
			.unwrap_or(token);
		if args.push(token).is_err() {
			break;
		}
	}
	(&line[..pos], args)
}

fn parse_i32(s: &str) -> i32 {
	s.parse().unwrap_or(0)
}

fn describe_cme(code: &str) -> &'static str {
	match code {
		"3" => "operation not allowed",
		"4" => "operation not supported",
		"910" => "bad session id",
		"911" => "session is already running",
		"912" => "no more sessions can be used",
		"916" => "a parameter has an invalid range of values",
		"921" => "invalid state of bearer connection",
		"923" => "invalid state of terminate port data mode",
		_ => "unknown error",
	}
}

impl<H: ModemHal, S: Store> Modem<H, S> {
	/// Serial adapter callback, one received byte.
	pub fn on_byte(&mut self, byte: u8) {
		if self.test_case == TestCase::NoRx {
			return;
		}
		self.stats.uart_rx_bytes += 1;

		match self.rx.push(byte) {
			Some(RxEvent::Line) => {
				let line = self.rx.take_line();
				self.stats.at_rx_cmd += 1;
				self.handle_line(&line);
			}
			Some(RxEvent::RawFrame) => {
				let frame = self.rx.take_raw();
				if usize::from(self.at.queue_rx) != frame.len() {
					error!(
						"data length mismatch! expected {}, got {}",
						self.at.queue_rx,
						frame.len()
					);
				}
				self.at.queue_rx = 0;
				self.raw_frame_received(&frame);
			}
			Some(RxEvent::RawEmpty) => {
				let _ = self.rx.take_raw();
				self.at.queue_rx = 0;
				self.no_data_indication();
			}
			None => {}
		}
	}

	/// One-shot response timer expired; the outstanding command is
	/// abandoned so the next tick can emit again.
	pub fn at_timeout(&mut self) {
		warn!("no answer received!");
		self.at_cmd_done();
	}

	/// True while the serial link is owned by an exchange: command
	/// outstanding, raw transfer pending or raw mode armed.
	pub(crate) fn at_busy(&self) -> bool {
		self.at_waits_for_data() || self.at.wait_rsp
	}

	pub(crate) fn at_waits_for_data(&self) -> bool {
		self.rx.raw_mode() || self.at.send_raw || self.at.queue_tx != 0
	}

	/// Emits `AT<cmd>\r` unless a command is still outstanding.
	pub(crate) fn send_cmd(&mut self, cmd: &str) {
		if self.at.wait_rsp {
			debug!("outstanding response, drop: AT{}", cmd);
			return;
		}

		let mut msg: String<AT_MSG_LEN_MAX> = String::new();
		if write!(msg, "AT{}\r", cmd).is_err() {
			error!("command too long, dropped!");
			return;
		}

		self.at.wait_rsp = true;
		debug!("to modem: AT{}<", cmd);
		self.stats.at_tx_cmd += 1;
		self.stats.uart_tx_bytes += msg.len() as u32;
		if self.hal.transmit(msg.as_bytes()).is_err() {
			error!("uart transmit failed");
		}
		self.hal.timer_start_once(TimerEvent::AtTimeout, AT_TIMEOUT_MS);
	}

	/// Arms the response timer without sending anything, as if a
	/// command had gone out. Used by the dropped-command test cases.
	pub(crate) fn arm_at_timeout(&mut self) {
		self.at.wait_rsp = true;
		self.hal.timer_start_once(TimerEvent::AtTimeout, AT_TIMEOUT_MS);
	}

	/// `OK`/`ERROR`/`+CME` closed the exchange.
	fn at_cmd_done(&mut self) {
		self.at.wait_rsp = false;
		self.hal.timer_stop(TimerEvent::AtTimeout);
		if self.at.queue_tx != 0 {
			debug!("wait for connect");
		}
	}

	/// Ships the queued payload followed by the trailer.
	fn send_queued_raw(&mut self) {
		let mut frame: Vec<u8, RAW_TX_CAP> = Vec::new();
		let _ = frame.extend_from_slice(&self.tx_buf);
		let _ = frame.extend_from_slice(EOF_PATTERN);
		debug!("transmit of {} raw bytes", frame.len());
		if self.hal.transmit(&frame).is_err() {
			error!("uart transmit failed");
		}
		self.stats.uart_tx_bytes += frame.len() as u32;
		self.arm_at_timeout();
	}

	/// Dispatches one complete response line.
	pub(crate) fn handle_line(&mut self, line: &[u8]) {
		let Ok(text) = core::str::from_utf8(line) else {
			warn!("non-ascii line dropped");
			return;
		};
		debug!("rx({}): {}", text.len(), text);

		let (verb, args) = split_line(text);

		match verb {
			"OK" => {
				if self.at.at_ready_rcvd {
					self.at_indication();
				}

				if self.at.send_raw {
					debug!("send data done");
					self.at.send_raw = false;
					self.at.queue_tx = 0;
				}

				if let Some(field) = self.at.info_req.take() {
					if !self.at.value_temp.is_empty() {
						let value = self.at.value_temp.clone();
						match field {
							InfoField::Model => assign(&mut self.info.model, &value),
							InfoField::SwRelease => assign(&mut self.info.sw_release, &value),
							InfoField::Imei => assign(&mut self.info.imei, &value),
						}
						debug!("stored info: {}", value);
					}
				}

				self.at_req_done();
				self.at_cmd_done();
			}

			"ERROR" => {
				error!("operation failed");
				self.at.send_raw = false;
				self.at.queue_tx = 0;
				self.at.queue_rx = 0;
				self.rx.cancel_raw();
				if self.at.info_req.take().is_some() {
					error!("failed to store value!");
				}
				self.at_cmd_done();
			}

			"+CME" => {
				if args.len() == 2 && args[0] == "ERROR" {
					error!("+CME {}: {}", args[1], describe_cme(args[1]));
					self.error_ind(parse_i32(args[1]));
				}
				self.at_cmd_done();
			}

			"+CME ERROR" => {
				if args.len() == 1 {
					error!("+CME {}: {}", args[0], describe_cme(args[0]));
					self.error_ind(parse_i32(args[0]));
				}
				self.at_cmd_done();
			}

			// product serial number and software version
			"+KGSN" => {
				if args.len() == 1 {
					assign(&mut self.info.fsn, args[0]);
				}
			}

			// echoes arming a bare value line
			"AT+CGSN" => {
				if args.is_empty() || args[0] == "0" {
					self.at.info_req = Some(InfoField::Imei);
					self.at.value_temp.clear();
				}
			}
			"AT+CGMM" | "ATI" => {
				if args.is_empty() {
					self.at.info_req = Some(InfoField::Model);
					self.at.value_temp.clear();
				}
			}
			"AT+CGMR" => {
				if args.is_empty() {
					self.at.info_req = Some(InfoField::SwRelease);
					self.at.value_temp.clear();
				}
			}

			"+CCID" => {
				if args.len() == 1 {
					assign(&mut self.info.iccid, args[0]);
				}
			}

			"+CFUN" => {
				if !args.is_empty() {
					assign(&mut self.info.fun, args[0]);
				}
			}

			"+KTCP_DATA" => {
				if args.len() >= 2 && args[0] == "1" {
					self.data_ready_ind(args[1].parse().unwrap_or(0), false);
				}
			}
			"+KUDP_DATA" => {
				if args.len() >= 2 && args[0] == "1" {
					self.data_ready_ind(args[1].parse().unwrap_or(0), true);
				}
			}

			// our own send/receive echoes carry the byte counts
			"AT+KTCPSND" => {
				if args.len() >= 2 && args[0] == "1" {
					self.at.queue_tx = args[1].parse().unwrap_or(0);
					debug!("ready to send {} bytes", self.at.queue_tx);
				}
			}
			"AT+KUDPSND" => {
				if args.len() >= 4 && args[0] == "1" {
					self.at.queue_tx = args[3].parse().unwrap_or(0);
					debug!("ready to send {} bytes via UDP", self.at.queue_tx);
				}
			}
			"AT+KTCPRCV" | "AT+KUDPRCV" => {
				if args.len() >= 2 && args[0] == "1" {
					self.at.queue_rx = args[1].parse().unwrap_or(0);
					debug!("ready to receive {} bytes", self.at.queue_rx);
				}
			}

			"CONNECT" => {
				if self.at.queue_tx > 0 {
					self.at.send_raw = true;
					self.at.queue_tx = 0;
					self.send_queued_raw();
				} else if self.at.queue_rx > 0 {
					self.rx.start_raw();
				} else {
					debug!("no data to send or receive, drop!");
					if self.hal.transmit(EOF_PATTERN).is_err() {
						error!("uart transmit failed");
					}
					self.stats.uart_tx_bytes += EOF_PATTERN.len() as u32;
					self.arm_at_timeout();
				}
			}

			"+CGDCONT" => {
				if args.len() >= 4 && parse_i32(args[0]) == 1 {
					let ctx = &mut self.info.pdp_context[0];
					assign(&mut ctx.cid, args[0]);
					assign(&mut ctx.pdp_type, args[1]);
					assign(&mut ctx.apn, args[2]);
					assign(&mut ctx.addr, args[3]);
				}
			}

			"+KBNDCFG" => {
				if args.len() >= 2 {
					let rat = parse_i32(args[0]);
					if (0..=2).contains(&rat) {
						assign(&mut self.info.bnd_bitmap[rat as usize], args[1]);
					}
				}
			}

			"+CESQ" => {
				if args.len() >= 6 {
					let cesq = &mut self.info.cesq;
					cesq.rxlev = args[0].parse().unwrap_or(0);
					cesq.ber = args[1].parse().unwrap_or(0);
					cesq.rscp = args[2].parse().unwrap_or(0);
					cesq.ecno = args[3].parse().unwrap_or(0);
					cesq.rsrq = args[4].parse().unwrap_or(0);
					cesq.rsrp = args[5].parse().unwrap_or(0);
					cesq.datetime = self.hal.datetime_secs();
					if cesq.datetime == cesq.datetime_lastsync {
						// force persistence even within the same second
						cesq.datetime += 1;
					}
				}
			}

			"+KBND" => {
				if args.len() >= 2 {
					self.info.rat = args[0].parse().unwrap_or(0);
					if args[1].len() >= self.info.bnd.capacity() {
						error!("active band response overflow!");
					} else {
						assign(&mut self.info.bnd, args[1]);
					}
				}
			}

			"+KSELACQ" => {
				self.info.prl_valid = true;
				for (i, slot) in self.info.prl.iter_mut().enumerate() {
					*slot = args.get(i).and_then(|a| a.parse().ok()).unwrap_or(0);
				}
			}

			"+CEREG" => {
				if !args.is_empty() {
					if self.at.wait_rsp {
						// response to +CEREG?, first field is the mode
						self.registration_mode(args[0]);
					} else {
						let stat = args[0].parse().unwrap_or(-1);
						info!("registration status: {}", stat);
						self.registration_status_ind(stat);
					}
				}
			}

			"+KTCP_IND" => {
				if args.len() >= 2 {
					self.session_active_ind(parse_i32(args[0]) - 1, parse_i32(args[1]), true);
				}
			}
			"+KUDP_IND" => {
				if args.len() >= 2 {
					self.session_active_ind(parse_i32(args[0]) - 1, parse_i32(args[1]), false);
				}
			}

			"+KTCP_NOTIF" => {
				if args.len() >= 2 {
					let notif = args[1].parse().unwrap_or(0);
					self.session_status_changed_ind(parse_i32(args[0]) - 1, notif, true);
				}
			}
			"+KUDP_NOTIF" => {
				if args.len() >= 2 {
					let notif = args[1].parse().unwrap_or(0);
					self.session_status_changed_ind(parse_i32(args[0]) - 1, notif, false);
				}
			}

			"+KCNX_IND" => {
				if args.len() >= 2 {
					self.connection_status_changed_ind(parse_i32(args[0]), parse_i32(args[1]));
				}
			}

			// unknown verbs are tolerated
			_ => {}
		}

		// a bare value line answers the last identity request
		if self.at.info_req.is_some() && verb.len() < 32 {
			assign(&mut self.at.value_temp, verb);
		}

		self.at.at_ready_rcvd = verb == "AT";
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::info::RegistrationStatus;
	use crate::modem::ModemState;
	use crate::session::SessionState;
	use crate::testutil::{MockHal, MockStore};

	fn modem() -> Modem<MockHal, MockStore> {
		let mut m = Modem::new(MockHal::default(), MockStore::default());
		m.init().unwrap();
		m
	}

	fn feed(m: &mut Modem<MockHal, MockStore>, text: &str) {
		for b in text.bytes() {
			m.on_byte(b);
		}
	}

	#[test]
	fn split_line_strips_quotes_and_empties() {
		let (verb, args) = split_line("+CGDCONT: 1,\"IPV4V6\",\"internet.cxn\",,0,0");
		assert_eq!(verb, "+CGDCONT");
		assert_eq!(args.as_slice(), &["1", "IPV4V6", "internet.cxn", "0", "0"]);

		let (verb, args) = split_line("+CME ERROR: 910");
		assert_eq!(verb, "+CME ERROR");
		assert_eq!(args.as_slice(), &["910"]);

		let (verb, args) = split_line("OK");
		assert_eq!(verb, "OK");
		assert!(args.is_empty());
	}

	#[test]
	fn identity_value_line_committed_on_ok() {
		let mut m = modem();
		feed(&mut m, "ATI\r\n");
		feed(&mut m, "HL7800-M\r\n");
		assert!(m.info.model.is_empty());
		feed(&mut m, "OK\r\n");
		assert_eq!(m.info.model.as_str(), "HL7800-M");
	}

	#[test]
	fn at_probe_marks_interface_ready() {
		let mut m = modem();
		m.state = ModemState::CheckAt;
		feed(&mut m, "AT\r\nOK\r\n");
		assert_eq!(m.state, ModemState::AtReady);
		// any other line in between breaks the probe detection
		m.state = ModemState::CheckAt;
		feed(&mut m, "AT\r\n+CFUN: 1\r\nOK\r\n");
		assert_eq!(m.state, ModemState::CheckAt);
	}

	#[test]
	fn pdp_context_stored() {
		let mut m = modem();
		feed(&mut m, "+CGDCONT: 1,\"IPV4V6\",\"internet.cxn\",\"10.1.2.3\",0,0\r\n");
		assert_eq!(m.info.pdp_context[0].cid.as_str(), "1");
		assert_eq!(m.info.pdp_context[0].pdp_type.as_str(), "IPV4V6");
		assert_eq!(m.info.pdp_context[0].apn.as_str(), "internet.cxn");
		assert_eq!(m.info.pdp_context[0].addr.as_str(), "10.1.2.3");
	}

	#[test]
	fn cereg_response_vs_urc() {
		let mut m = modem();
		m.at.wait_rsp = true;
		feed(&mut m, "+CEREG: 2,0\r\n");
		assert_eq!(m.info.cereg.as_str(), "2");
		// the reporting-mode response is not a state indication
		assert_eq!(m.info.registration_status, RegistrationStatus::None);
		assert!(!m.is_registered());

		m.at.wait_rsp = false;
		feed(&mut m, "+CEREG: 2\r\n");
		assert_eq!(m.info.registration_status, RegistrationStatus::Searching);
		assert!(!m.is_registered());

		feed(&mut m, "+CEREG: 8\r\n");
		assert_eq!(m.info.registration_status, RegistrationStatus::Other);
		assert!(!m.is_registered());

		feed(&mut m, "+CEREG: 1,\"05D3\",\"0A12F410\",7\r\n");
		assert_eq!(m.info.registration_status, RegistrationStatus::HomeNetwork);
		assert!(m.is_registered());
		// registration invalidates what it may have changed
		assert!(m.info.bnd.is_empty());
		assert!(m.info.pdp_context[0].cid.is_empty());
	}

	#[test]
	fn cesq_timestamp_forced_forward() {
		let mut m = modem();
		m.info.cesq.datetime_lastsync = 1000;
		m.hal_mut().datetime = 1000;
		feed(&mut m, "+CESQ: 99,99,255,255,18,46\r\n");
		assert_eq!(m.info.cesq.rsrq, 18);
		assert_eq!(m.info.cesq.rsrp, 46);
		assert_eq!(m.info.cesq.datetime, 1001);
	}

	#[test]
	fn send_echo_and_connect_ship_payload() {
		let mut m = modem();
		m.queue_tx(&[0x11u8; 50]).unwrap();
		feed(&mut m, "AT+KTCPSND=1,50\r\n");
		assert_eq!(m.at.queue_tx, 50);
		feed(&mut m, "CONNECT\r\n");
		let last = m.hal().writes.last().unwrap().clone();
		assert_eq!(last.len(), 50 + EOF_PATTERN.len());
		assert_eq!(&last[50..], EOF_PATTERN);
		assert!(m.at.send_raw);
		assert!(m.at.wait_rsp);
		feed(&mut m, "OK\r\n");
		assert!(!m.at.send_raw);
		assert!(!m.at.wait_rsp);
	}

	#[test]
	fn connect_without_queue_sends_bare_trailer() {
		let mut m = modem();
		feed(&mut m, "CONNECT\r\n");
		assert_eq!(m.hal().writes.last().unwrap().as_slice(), EOF_PATTERN);
		assert!(m.at.wait_rsp);
	}

	#[test]
	fn receive_flow_delivers_frame() {
		let mut m = modem();
		m.waiting_bytes = 3;
		feed(&mut m, "AT+KUDPRCV=1,3\r\n");
		assert_eq!(m.at.queue_rx, 3);
		feed(&mut m, "CONNECT\r\n");
		m.on_byte(b'\n');
		for b in [0xaau8, 0xbb, 0xcc] {
			m.on_byte(b);
		}
		for &b in EOF_PATTERN.iter() {
			m.on_byte(b);
		}
		assert_eq!(m.waiting_bytes, 0);
		let mut out = [0u8; 16];
		assert_eq!(m.get_last_rx(&mut out).unwrap(), 3);
		assert_eq!(&out[..3], &[0xaa, 0xbb, 0xcc]);
	}

	#[test]
	fn oversized_frame_clamps_waiting_bytes() {
		let mut m = modem();
		m.waiting_bytes = 2;
		m.at.queue_rx = 2;
		m.rx.start_raw();
		for b in [0xaau8, 0xbb, 0xcc] {
			m.on_byte(b);
		}
		for &b in EOF_PATTERN.iter() {
			m.on_byte(b);
		}
		assert_eq!(m.waiting_bytes, 0);
	}

	#[test]
	fn trailer_only_raises_no_data() {
		let mut m = modem();
		m.waiting_bytes = 70;
		m.at.queue_rx = 70;
		m.rx.start_raw();
		feed_bytes(&mut m, EOF_PATTERN);
		assert_eq!(m.waiting_bytes, 0);
		assert_eq!(m.stats.empty_packets, 1);
		assert_eq!(m.stats.lost_bytes, 70);
	}

	fn feed_bytes(m: &mut Modem<MockHal, MockStore>, bytes: &[u8]) {
		for &b in bytes {
			m.on_byte(b);
		}
	}

	#[test]
	fn cme_error_completes_exchange() {
		let mut m = modem();
		m.read_retry = 2;
		m.at.wait_rsp = true;
		feed(&mut m, "+CME ERROR: 910\r\n");
		assert!(!m.at.wait_rsp);
		assert_eq!(m.read_retry, 1);
		m.at.wait_rsp = true;
		feed(&mut m, "+CME: ERROR,921\r\n");
		assert!(!m.at.wait_rsp);
		assert_eq!(m.read_retry, 0);
	}

	#[test]
	fn error_clears_pending_raw_entry() {
		let mut m = modem();
		m.at.queue_rx = 10;
		m.at.wait_rsp = true;
		feed(&mut m, "ERROR\r\n");
		assert_eq!(m.at.queue_rx, 0);
		assert!(!m.at.wait_rsp);
		assert!(!m.rx.raw_mode());
	}

	#[test]
	fn session_indications_update_table() {
		let mut m = modem();
		feed(&mut m, "+KUDP_IND: 1,1\r\n");
		assert_eq!(m.sessions.query(0), SessionState::OpenUdp);
		// benign length warning keeps the session open
		feed(&mut m, "+KUDP_NOTIF: 1,8\r\n");
		assert_eq!(m.sessions.query(0), SessionState::OpenUdp);
		feed(&mut m, "+KUDP_NOTIF: 1,4\r\n");
		assert_eq!(m.sessions.query(0), SessionState::Closed);
		// out of range ids are diagnosed and ignored
		feed(&mut m, "+KUDP_IND: 7,1\r\n");
		assert_eq!(m.sessions.find_highest_open(), None);
	}

	#[test]
	fn cnx_indication_tracks_connection() {
		let mut m = modem();
		m.cfg_written = true;
		m.tcp_config = true;
		feed(&mut m, "+KCNX_IND: 1,1\r\n");
		assert!(m.is_connected());
		feed(&mut m, "+KCNX_IND: 1,0\r\n");
		assert!(!m.is_connected());
		assert!(!m.cfg_written);
		assert!(!m.tcp_config);
	}

	#[test]
	fn busy_engine_drops_commands() {
		let mut m = modem();
		m.send_cmd("+CFUN?");
		let sent = m.hal().writes.len();
		m.send_cmd("+CESQ");
		assert_eq!(m.hal().writes.len(), sent);
		assert!(m.hal().at_timer_running);
		m.at_timeout();
		assert!(!m.at_busy());
		m.send_cmd("+CESQ");
		assert_eq!(m.hal().writes.len(), sent + 1);
	}

	#[test]
	fn unknown_and_garbage_lines_tolerated() {
		let mut m = modem();
		feed(&mut m, "+XWEIRD: 1,2,3\r\nRING\r\n%%\r\n");
		m.on_byte(0xff);
		m.on_byte(b'\r');
	}
}
