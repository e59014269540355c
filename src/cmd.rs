//! Builders for the textual commands sent to the module.
//!
//! Each builder produces the command body; the engine prefixes `AT` and
//! terminates with a carriage return when it goes out. Formats follow
//! the module's command reference, including the unused filler fields
//! of `+CGDCONT`.

use core::fmt::Write;

use heapless::String;

/// Scratch capacity for parameterized commands.
pub(crate) const CMD_CAP: usize = 128;
/// Scratch capacity for session framing commands.
pub(crate) const CMD_FRAMING_CAP: usize = 512;

/// Largest number of payload bytes one receive command may request.
pub(crate) const READ_CHUNK_MAX: u16 = 196;

pub(crate) const CHECK_AT: &str = "";
pub(crate) const REQUEST_MODEL: &str = "I";
pub(crate) const REQUEST_REVISION: &str = "+CGMR";
pub(crate) const REQUEST_FSN: &str = "+KGSN=3";
pub(crate) const REQUEST_IMEI: &str = "+CGSN";
pub(crate) const REQUEST_ICCID: &str = "+CCID";
pub(crate) const REQUEST_CEREG: &str = "+CEREG?";
pub(crate) const REQUEST_CFUN: &str = "+CFUN?";
pub(crate) const READ_PDP_CONTEXT: &str = "+CGDCONT?";
pub(crate) const READ_BAND_CONFIGURATION: &str = "+KBNDCFG?";
pub(crate) const READ_ACTIVE_BAND: &str = "+KBND?";
pub(crate) const READ_PRL: &str = "+KSELACQ?";
pub(crate) const READ_SIGNAL_QUALITY: &str = "+CESQ";
pub(crate) const POWER_OFF: &str = "+CPOF";
pub(crate) const UDP_SESSION_CONFIG: &str = "+KUDPCFG=1,0";
pub(crate) const TCP_START_CONNECTION: &str = "+KTCPCNX=1";
pub(crate) const UDP_DELETE_SESSIONS: &str = "+KUDPDEL=?";
pub(crate) const TCP_DELETE_SESSIONS: &str = "+KTCPDEL=?";

pub(crate) fn set_cereg(n: u8) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+CEREG={}", n);
	cmd
}

pub(crate) fn set_phone_functionality(fun: u8, rst: u8) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+CFUN={},{}", fun, rst);
	cmd
}

pub(crate) fn set_pdp_context(conn_type: &str, apn: &str) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+CGDCONT=1,{},\"{}\",,0,0,0,0,0,,0,,,,,", conn_type, apn);
	cmd
}

pub(crate) fn set_band_configuration(rat: u8, bnd_bitmap: &str) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KBNDCFG={},{}", rat, bnd_bitmap);
	cmd
}

/// `+KSELACQ=0,<rat1>[,<rat2>[,<rat3>]]`, zero entries terminate the list.
pub(crate) fn set_preferred_rat_list(rat1: u8, rat2: u8, rat3: u8) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KSELACQ=0,{}", rat1);
	if rat2 > 0 {
		let _ = write!(cmd, ",{}", rat2);
		if rat3 > 0 {
			let _ = write!(cmd, ",{}", rat3);
		}
	}
	cmd
}

pub(crate) fn gprs_connection_config(apn: &str) -> String<CMD_FRAMING_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KCNXCFG=1,\"GPRS\",\"{}\"", apn);
	cmd
}

pub(crate) fn tcp_connection_config(host: &str, port: u16) -> String<CMD_FRAMING_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KTCPCFG=1,0,\"{}\",{}", host, port);
	cmd
}

pub(crate) fn close_session(tech: &str, session_id: u8) -> String<CMD_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+K{}CLOSE={}", tech, session_id);
	cmd
}

pub(crate) fn send_frame_tcp(byte_count: u16) -> String<CMD_FRAMING_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KTCPSND=1,{}", byte_count);
	cmd
}

pub(crate) fn send_frame_udp(byte_count: u16, addr: &str, port: u16) -> String<CMD_FRAMING_CAP> {
	let mut cmd = String::new();
	let _ = write!(cmd, "+KUDPSND=1,\"{}\",{},{}", addr, port, byte_count);
	cmd
}

/// Receive command for pending data, capped per call.
pub(crate) fn read_data(tech: &str, byte_count: u16) -> String<CMD_CAP> {
	let count = byte_count.min(READ_CHUNK_MAX);
	let mut cmd = String::new();
	let _ = write!(cmd, "+K{}RCV=1,{}", tech, count);
	cmd
}
