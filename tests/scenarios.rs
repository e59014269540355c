//! End-to-end scenarios: the driver on one side, a scripted module on
//! the other. The module side of each exchange is played back through
//! the byte-in callback, echoes included, the way the real UART
//! delivers it.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use hl78xx_modem::{
	store::UMI_CODE_MODEM_CFG, ConnectionType, Fault, Modem, ModemConfig, ModemState,
	RegistrationStatus, Store, EOF_PATTERN,
};

fn new_modem() -> TestModem {
	let mut m = Modem::new(MockHal::default(), MockStore::default());
	m.init().unwrap();
	m
}

fn noop_cb(result: hl78xx_modem::Result<()>) {
	assert!(result.is_ok());
}

/// Cold-off to the first AT probe answered.
fn boot(m: &mut TestModem) {
	step(m); // powered down -> reset pending
	step(m); // reset executed -> waiting for CTS high
	m.hal_mut().cts_high = true;
	step(m); // -> waiting for CTS low
	m.hal_mut().cts_high = false;
	step(m); // -> ready, uart open, AT probe out
	feed(m, "AT\r\nOK\r\n");
}

/// Answers the identity reads and the first PDP context query.
fn converge_identity(m: &mut TestModem, observed_apn: &str) {
	feed(m, "ATI\r\nHL7800-M\r\nOK\r\n");
	feed(m, "AT+CGMR\r\nAHL78xx.4.6.9.4\r\nOK\r\n");
	feed(m, "AT+KGSN=3\r\n+KGSN: FF801234567890\r\nOK\r\n");
	feed(m, "AT+CGSN\r\n351234567890123\r\nOK\r\n");
	let rsp = format!(
		"AT+CGDCONT?\r\n+CGDCONT: 1,\"IPV4V6\",\"{}\",\"10.64.1.2\",0,0\r\nOK\r\n",
		observed_apn
	);
	feed(m, &rsp);
}

/// Answers the radio configuration reads, ending with `+CFUN=1,1` out.
fn converge_radio(m: &mut TestModem) {
	feed(
		m,
		"AT+KBNDCFG?\r\n+KBNDCFG: 0,000000000000000A0A188E\r\n\
		 +KBNDCFG: 1,0000000000000000080084\r\n+KBNDCFG: 2,0\r\nOK\r\n",
	);
	feed(m, "AT+KSELACQ?\r\n+KSELACQ: 2,1\r\nOK\r\n");
	feed(m, "AT+CEREG?\r\n+CEREG: 2,0\r\nOK\r\n");
	feed(m, "AT+CFUN?\r\n+CFUN: 0\r\nOK\r\n");
	feed(m, "AT+KBND?\r\n+KBND: 0,0000000000000000000010\r\nOK\r\n");
	feed(m, "AT+CCID\r\n+CCID: 89490200001234567890\r\nOK\r\n");
}

/// `+CFUN=1,1` accepted; the module reboots into full functionality.
fn full_func_reboot(m: &mut TestModem) {
	feed(m, "AT+CFUN=1,1\r\nOK\r\n");
	m.hal_mut().cts_high = true;
	step(m);
	m.hal_mut().cts_high = false;
	step(m);
	feed(m, "AT\r\nOK\r\n");
}

/// Registration URC plus the re-reads it triggers.
fn register(m: &mut TestModem) {
	feed(m, "+CEREG: 1,\"05D3\",\"0A12F410\",7\r\n");
	feed(
		m,
		"AT+CGDCONT?\r\n+CGDCONT: 1,\"IPV4V6\",\"internet.cxn\",\"10.64.1.2\",0,0\r\nOK\r\n",
	);
	feed(m, "AT+KBND?\r\n+KBND: 0,0000000000000000000010\r\nOK\r\n");
	feed(m, "AT+CESQ\r\n+CESQ: 99,99,255,255,18,46\r\nOK\r\n");
}

/// GPRS configuration accepted and the UDP session comes up.
fn connect_udp(m: &mut TestModem) {
	feed(m, "AT+KCNXCFG=1,\"GPRS\",\"internet.cxn\"\r\nOK\r\n");
	step(m);
	feed(m, "AT+KUDPCFG=1,0\r\nOK\r\n+KCNX_IND: 1,1\r\n+KUDP_IND: 1,1\r\n");
}

#[test]
fn cold_start_happy_path_udp() {
	let mut m = new_modem();
	m.start(noop_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "old.cxn");

	// observed APN differs from the configuration, the setter fires
	assert_eq!(
		cmds(&m).last().unwrap(),
		"AT+CGDCONT=1,IPV4V6,\"internet.cxn\",,0,0,0,0,0,,0,,,,,\r"
	);
	feed(&mut m, "OK\r\n");
	feed(
		&mut m,
		"AT+CGDCONT?\r\n+CGDCONT: 1,\"IPV4V6\",\"internet.cxn\",\"10.64.1.2\",0,0\r\nOK\r\n",
	);

	converge_radio(&mut m);
	assert_eq!(cmds(&m).last().unwrap(), "AT+CFUN=1,1\r");

	full_func_reboot(&mut m);
	register(&mut m);
	connect_udp(&mut m);

	assert!(m.is_registered());
	assert_eq!(m.modem_info().registration_status, RegistrationStatus::HomeNetwork);
	assert!(m.is_connected());
	assert!(m.is_udp_session_active());

	assert_subsequence(
		&cmds(&m),
		&[
			"AT\r",
			"ATI\r",
			"AT+CGMR\r",
			"AT+KGSN=3\r",
			"AT+CGSN\r",
			"AT+CGDCONT?\r",
			"AT+CGDCONT=1,IPV4V6,\"internet.cxn\",,0,0,0,0,0,,0,,,,,\r",
			"AT+CGDCONT?\r",
			"AT+KBNDCFG?\r",
			"AT+KSELACQ?\r",
			"AT+CEREG?\r",
			"AT+CFUN?\r",
			"AT+KBND?\r",
			"AT+CCID\r",
			"AT+CFUN=1,1\r",
			"AT+KCNXCFG=1,\"GPRS\",\"internet.cxn\"\r",
			"AT+KUDPCFG=1,0\r",
		],
	);
}

static ABORT_CB: AtomicUsize = AtomicUsize::new(0);

fn abort_cb(result: hl78xx_modem::Result<()>) {
	assert!(result.is_ok());
	ABORT_CB.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn abort_closes_session_and_powers_off() {
	let mut m = new_modem();
	m.start(abort_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "internet.cxn");
	converge_radio(&mut m);
	full_func_reboot(&mut m);
	register(&mut m);
	connect_udp(&mut m);
	assert!(m.is_udp_session_active());

	let before_abort = cmds(&m).len();
	m.abort();
	step(&mut m);
	feed(&mut m, "AT+KUDPCLOSE=1\r\nOK\r\n");
	feed(&mut m, "AT+KUDPDEL=?\r\nOK\r\n");
	feed(&mut m, "AT+CFUN=4,1\r\nOK\r\n");

	// the functionality change reboots the module
	m.hal_mut().cts_high = true;
	step(&mut m);
	m.hal_mut().cts_high = false;
	step(&mut m);
	feed(&mut m, "AT\r\nOK\r\n");
	feed(&mut m, "AT+CFUN?\r\n+CFUN: 4\r\nOK\r\n");
	step(&mut m);
	feed(&mut m, "AT+CPOF\r\nOK\r\n");
	step(&mut m);

	assert_eq!(m.state(), ModemState::PoweredOff);
	assert!(!m.is_udp_session_active());
	assert_eq!(ABORT_CB.load(Ordering::SeqCst), 1);
	assert!(!m.communication_in_progress());
	assert_eq!(
		cmds(&m).iter().filter(|c| c.as_str() == "AT+CPOF\r").count(),
		1
	);

	assert_subsequence(
		&cmds(&m)[before_abort..],
		&["AT+KUDPCLOSE=1\r", "AT+KUDPDEL=?\r", "AT+CFUN=4,1\r", "AT+CPOF\r"],
	);
}

static REG_TIMEOUT_CB: AtomicUsize = AtomicUsize::new(0);

fn reg_timeout_cb(result: hl78xx_modem::Result<()>) {
	assert!(result.is_ok());
	REG_TIMEOUT_CB.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn registration_timeout_shuts_down_with_callback() {
	let mut m = new_modem();
	m.start(reg_timeout_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "internet.cxn");
	converge_radio(&mut m);
	full_func_reboot(&mut m);

	// no +CEREG URC ever arrives
	m.hal_mut().uptime += 200;
	m.tick();
	pump(&mut m);

	assert_eq!(m.last_fault().last, Fault::RegistrationTimedOut);
	assert!(m.is_error());
	assert!(!m.is_registered());

	step(&mut m);
	feed(&mut m, "AT+CPOF\r\nOK\r\n");
	step(&mut m);

	assert_eq!(m.state(), ModemState::PoweredOff);
	assert_eq!(REG_TIMEOUT_CB.load(Ordering::SeqCst), 1);
}

#[test]
fn pdp_mismatch_triggers_setter_then_requery() {
	let mut m = new_modem();
	m.start(noop_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "old.cxn");

	assert_eq!(
		cmds(&m).last().unwrap(),
		"AT+CGDCONT=1,IPV4V6,\"internet.cxn\",,0,0,0,0,0,,0,,,,,\r"
	);

	// the observed context id was cleared, so the next tick re-queries
	feed(&mut m, "OK\r\n");
	assert_eq!(cmds(&m).last().unwrap(), "AT+CGDCONT?\r");
}

#[test]
fn tcp_send_frames_payload_and_arms_response_wait() {
	let mut m = new_modem();
	let mut cfg = ModemConfig::default();
	cfg.cnx_type = ConnectionType::Tcp;
	m.store_mut()
		.write_object(UMI_CODE_MODEM_CFG, &cfg.to_bytes())
		.unwrap();
	m.start(noop_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "internet.cxn");
	converge_radio(&mut m);
	full_func_reboot(&mut m);
	register(&mut m);

	feed(&mut m, "AT+KCNXCFG=1,\"GPRS\",\"internet.cxn\"\r\nOK\r\n");
	step(&mut m);
	assert_eq!(cmds(&m).last().unwrap(), "AT+KTCPCFG=1,0,\"199.64.78.128\",4154\r");
	feed(&mut m, "AT+KTCPCFG=1,0,\"199.64.78.128\",4154\r\nOK\r\n");
	assert_eq!(cmds(&m).last().unwrap(), "AT+KTCPCNX=1\r");
	feed(&mut m, "AT+KTCPCNX=1\r\nOK\r\n+KCNX_IND: 1,1\r\n+KTCP_IND: 1,1\r\n");
	assert!(m.is_tcp_session_active());

	let payload = [0x5au8; 50];
	m.queue_tx(&payload).unwrap();
	pump(&mut m);
	assert_eq!(cmds(&m).last().unwrap(), "AT+KTCPSND=1,50\r");

	feed(&mut m, "AT+KTCPSND=1,50\r\nCONNECT\r\n");
	let framed = m.hal().writes.last().unwrap().clone();
	assert_eq!(framed.len(), payload.len() + EOF_PATTERN.len());
	assert_eq!(&framed[..50], &payload[..]);
	assert_eq!(&framed[50..], EOF_PATTERN);

	feed(&mut m, "OK\r\n");
	// the response wait is armed from the configured timeout
	assert!(m.communication_in_progress());
}

#[test]
fn received_frame_is_drained_and_delivered() {
	let mut m = new_modem();
	m.start(noop_cb, true);

	boot(&mut m);
	converge_identity(&mut m, "internet.cxn");
	converge_radio(&mut m);
	full_func_reboot(&mut m);
	register(&mut m);
	connect_udp(&mut m);

	feed(&mut m, "+KUDP_DATA: 1,70\r\n");
	assert_eq!(cmds(&m).last().unwrap(), "AT+KUDPRCV=1,70\r");

	feed(&mut m, "AT+KUDPRCV=1,70\r\nCONNECT\r\n");
	feed_bytes(&mut m, b"\r\n");
	feed_bytes(&mut m, &[0x42u8; 70]);
	feed_bytes(&mut m, EOF_PATTERN);
	feed(&mut m, "OK\r\n");

	let mut out = [0u8; 128];
	assert_eq!(m.get_last_rx(&mut out).unwrap(), 70);
	assert!(out[..70].iter().all(|&b| b == 0x42));
	// drained completely
	assert!(m.get_last_rx(&mut out).is_err());
}
