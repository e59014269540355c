//! Telemetry counters.
//!
//! Lives in RAM during a session and is flushed to the store as one
//! object when the process stops. The load at init doubles as the
//! first-power-up detection: no stored object means the device has
//! never run a modem session before.

use crate::store::{Store, UMI_CODE_MODEM_STATISTICS};

#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
	pub uart_tx_bytes: u32,
	pub uart_rx_bytes: u32,
	pub at_tx_cmd: u32,
	pub at_rx_cmd: u32,
	pub udp_tx_bytes: u32,
	pub udp_rx_bytes: u32,
	pub udp_tx_frames: u32,
	pub udp_rx_frames: u32,
	pub tcp_tx_bytes: u32,
	pub tcp_rx_bytes: u32,
	pub tcp_tx_frames: u32,
	pub tcp_rx_frames: u32,
	pub failed_at: u32,
	pub failed_registration: u32,
	pub started: u32,
	pub full_function: u32,
	pub empty_packets: u32,
	pub lost_bytes: u32,
}

const FIELD_COUNT: usize = 18;
const OBJECT_LEN: usize = FIELD_COUNT * 4;

impl Stats {
	fn fields(&self) -> [u32; FIELD_COUNT] {
		[
			self.uart_tx_bytes,
			self.uart_rx_bytes,
			self.at_tx_cmd,
			self.at_rx_cmd,
			self.udp_tx_bytes,
			self.udp_rx_bytes,
			self.udp_tx_frames,
			self.udp_rx_frames,
			self.tcp_tx_bytes,
			self.tcp_rx_bytes,
			self.tcp_tx_frames,
			self.tcp_rx_frames,
			self.failed_at,
			self.failed_registration,
			self.started,
			self.full_function,
			self.empty_packets,
			self.lost_bytes,
		]
	}

	fn from_fields(fields: [u32; FIELD_COUNT]) -> Self {
		Stats {
			uart_tx_bytes: fields[0],
			uart_rx_bytes: fields[1],
			at_tx_cmd: fields[2],
			at_rx_cmd: fields[3],
			udp_tx_bytes: fields[4],
			udp_rx_bytes: fields[5],
			udp_tx_frames: fields[6],
			udp_rx_frames: fields[7],
			tcp_tx_bytes: fields[8],
			tcp_rx_bytes: fields[9],
			tcp_tx_frames: fields[10],
			tcp_rx_frames: fields[11],
			failed_at: fields[12],
			failed_registration: fields[13],
			started: fields[14],
			full_function: fields[15],
			empty_packets: fields[16],
			lost_bytes: fields[17],
		}
	}

	/// Flush the counters to the store.
	pub fn save<S: Store>(&self, store: &mut S) {
		let mut buf = [0u8; OBJECT_LEN];
		for (i, field) in self.fields().iter().enumerate() {
			buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
		}
		let _ = store.write_object(UMI_CODE_MODEM_STATISTICS, &buf);
	}

	/// Restore the counters. Returns false when no complete object was
	/// stored yet, i.e. on the very first power-up.
	pub fn load<S: Store>(&mut self, store: &mut S) -> bool {
		let mut buf = [0u8; OBJECT_LEN];
		match store.read_object(UMI_CODE_MODEM_STATISTICS, &mut buf) {
			Ok(len) if len == OBJECT_LEN => {
				let mut fields = [0u32; FIELD_COUNT];
				for (i, field) in fields.iter_mut().enumerate() {
					*field = u32::from_le_bytes([
						buf[i * 4],
						buf[i * 4 + 1],
						buf[i * 4 + 2],
						buf[i * 4 + 3],
					]);
				}
				*self = Stats::from_fields(fields);
				true
			}
			Ok(len) => {
				log::error!("statistics object length mismatch: {}", len);
				false
			}
			Err(_) => false,
		}
	}
}
