//! Persistent store port and the object accessors built on it.
//!
//! The device keeps configuration and status in a tagged key/value
//! store. Objects are addressed by a 32-bit code built from four
//! octets; structured objects additionally expose numbered members.
//! The driver only ever moves raw bytes through this seam.

use crate::error::{Error, Result};
use crate::info::SignalQuality;

/// 32-bit object tag.
pub type UmiCode = u32;

/// Builds an object code from its four octets.
pub const fn umi_code(b3: u32, b2: u32, b1: u32, b0: u32) -> UmiCode {
	(b3 << 24) | (b2 << 16) | (b1 << 8) | b0
}

pub const UMI_CODE_MODEM_SIM_INFO: UmiCode = umi_code(200, 2, 64, 1);
pub const UMI_CODE_MODEM_CFG: UmiCode = umi_code(200, 2, 64, 2);
pub const UMI_CODE_MODEM_STATS: UmiCode = umi_code(200, 2, 64, 4);
pub const UMI_CODE_MODEM_COMM_STATS: UmiCode = umi_code(200, 2, 64, 5);
pub const UMI_CODE_MODEM_STATISTICS: UmiCode = umi_code(200, 2, 64, 6);
pub const UMI_CODE_MODEM_EVENT_FIFO: UmiCode = umi_code(200, 2, 64, 7);

/// Member indices of the structured objects.
pub mod member {
	pub mod sim_info {
		pub const STATUS: u16 = 0;
		pub const ICCID: u16 = 1;
		pub const MODEL: u16 = 2;
		pub const SW_RELEASE: u16 = 3;
		pub const FSN: u16 = 4;
		pub const IMEI: u16 = 5;
		pub const RAT: u16 = 6;
		pub const BND_BITMAP: u16 = 7;
	}

	pub mod stats {
		pub const CURRENT_STATE: u16 = 0;
		pub const CURRENT_ACTION: u16 = 1;
		pub const LAST_ERROR: u16 = 2;
		pub const TEST_CASE: u16 = 3;
	}

	pub mod comm_stats {
		pub const TIMESTAMP: u16 = 0;
		pub const RSRQ: u16 = 1;
		pub const RSRP: u16 = 2;
		pub const BAND: u16 = 3;
		pub const LOCAL_ADDR: u16 = 4;
	}
}

/// External key/value store.
pub trait Store {
	/// Read a whole object, returns the number of bytes read.
	fn read_object(&mut self, code: UmiCode, out: &mut [u8]) -> Result<usize>;

	/// Write a whole object.
	fn write_object(&mut self, code: UmiCode, data: &[u8]) -> Result<()>;

	/// Read one member of a structured object.
	fn read_member(&mut self, code: UmiCode, member: u16, out: &mut [u8]) -> Result<usize>;

	/// Write one member of a structured object.
	fn write_member(&mut self, code: UmiCode, member: u16, data: &[u8]) -> Result<()>;
}

/* Accessors. Store failures are not actionable mid-session, the driver
 * keeps going on its RAM copy. */

pub(crate) fn write_model<S: Store>(store: &mut S, model: &str) {
	let _ = store.write_member(UMI_CODE_MODEM_SIM_INFO, member::sim_info::MODEL, model.as_bytes());
}

pub(crate) fn write_sw_release<S: Store>(store: &mut S, sw_release: &str) {
	let _ = store.write_member(
		UMI_CODE_MODEM_SIM_INFO,
		member::sim_info::SW_RELEASE,
		sw_release.as_bytes(),
	);
}

pub(crate) fn write_fsn<S: Store>(store: &mut S, fsn: &str) {
	let _ = store.write_member(UMI_CODE_MODEM_SIM_INFO, member::sim_info::FSN, fsn.as_bytes());
}

pub(crate) fn write_imei<S: Store>(store: &mut S, imei: &str) {
	let _ = store.write_member(UMI_CODE_MODEM_SIM_INFO, member::sim_info::IMEI, imei.as_bytes());
}

pub(crate) fn write_iccid<S: Store>(store: &mut S, iccid: &str) {
	let _ = store.write_member(UMI_CODE_MODEM_SIM_INFO, member::sim_info::ICCID, iccid.as_bytes());
}

pub(crate) fn write_active_bands<S: Store>(store: &mut S, rat: u8, bnd_bitmap: &str) {
	let _ = store.write_member(UMI_CODE_MODEM_SIM_INFO, member::sim_info::RAT, &[rat]);
	let _ = store.write_member(
		UMI_CODE_MODEM_SIM_INFO,
		member::sim_info::BND_BITMAP,
		bnd_bitmap.as_bytes(),
	);
}

pub(crate) fn write_registration_status<S: Store>(store: &mut S, status: i8) {
	let _ = store.write_member(
		UMI_CODE_MODEM_SIM_INFO,
		member::sim_info::STATUS,
		&[status as u8],
	);
}

pub(crate) fn write_current_state<S: Store>(store: &mut S, state: u16) {
	let _ = store.write_member(
		UMI_CODE_MODEM_STATS,
		member::stats::CURRENT_STATE,
		&state.to_le_bytes(),
	);
}

pub(crate) fn write_current_action<S: Store>(store: &mut S, action: u16) {
	let _ = store.write_member(
		UMI_CODE_MODEM_STATS,
		member::stats::CURRENT_ACTION,
		&action.to_le_bytes(),
	);
}

pub(crate) fn clear_last_error<S: Store>(store: &mut S) {
	let _ = store.write_member(UMI_CODE_MODEM_STATS, member::stats::LAST_ERROR, &0u16.to_le_bytes());
}

/// Persists a fault together with the state, action and wall-clock time
/// it occurred at. The packed record also goes to the event fifo object.
pub(crate) fn write_last_error<S: Store>(
	store: &mut S,
	error: u16,
	state: u16,
	action: u16,
	datetime: u32,
) {
	let _ = store.write_member(UMI_CODE_MODEM_STATS, member::stats::LAST_ERROR, &error.to_le_bytes());

	let mut record = [0u8; 10];
	record[0..4].copy_from_slice(&datetime.to_le_bytes());
	record[4..6].copy_from_slice(&state.to_le_bytes());
	record[6..8].copy_from_slice(&error.to_le_bytes());
	record[8..10].copy_from_slice(&action.to_le_bytes());
	let _ = store.write_object(UMI_CODE_MODEM_EVENT_FIFO, &record);
}

pub(crate) fn read_test_case<S: Store>(store: &mut S) -> Result<u16> {
	let mut buf = [0u8; 2];
	let used = store.read_member(UMI_CODE_MODEM_STATS, member::stats::TEST_CASE, &mut buf)?;
	if used != 2 {
		return Err(Error::Store);
	}
	Ok(u16::from_le_bytes(buf))
}

/// Flushes a signal-quality snapshot with the active band and the local
/// PDP address.
pub(crate) fn write_cesq<S: Store>(store: &mut S, cesq: &SignalQuality, band: u8, ip_addr: &str) {
	let _ = store.write_member(
		UMI_CODE_MODEM_COMM_STATS,
		member::comm_stats::TIMESTAMP,
		&cesq.datetime.to_le_bytes(),
	);
	let _ = store.write_member(UMI_CODE_MODEM_COMM_STATS, member::comm_stats::RSRQ, &[cesq.rsrq]);
	let _ = store.write_member(UMI_CODE_MODEM_COMM_STATS, member::comm_stats::RSRP, &[cesq.rsrp]);
	let _ = store.write_member(UMI_CODE_MODEM_COMM_STATS, member::comm_stats::BAND, &[band]);
	let _ = store.write_member(
		UMI_CODE_MODEM_COMM_STATS,
		member::comm_stats::LOCAL_ADDR,
		ip_addr.as_bytes(),
	);
}
