//! Shared test doubles for the unit tests.

use std::collections::HashMap;
use std::vec::Vec;

use crate::error::{Error, Result};
use crate::hal::{ModemHal, TimerEvent};
use crate::store::{Store, UmiCode};

/// Records everything the driver does to the platform.
#[derive(Default)]
pub(crate) struct MockHal {
	pub writes: Vec<Vec<u8>>,
	pub cts_high: bool,
	pub uptime: u32,
	pub datetime: u32,
	pub uart_open: bool,
	pub reset_is_low: bool,
	pub tick_running: bool,
	pub at_timer_running: bool,
	/// Ticks posted but not yet delivered
	pub posted: u32,
}

impl ModemHal for MockHal {
	type SerialError = core::convert::Infallible;

	fn uart_open(&mut self) -> core::result::Result<(), Self::SerialError> {
		self.uart_open = true;
		Ok(())
	}

	fn uart_close(&mut self) {
		self.uart_open = false;
	}

	fn transmit(&mut self, data: &[u8]) -> core::result::Result<(), Self::SerialError> {
		self.writes.push(data.to_vec());
		Ok(())
	}

	fn reset_low(&mut self) {
		self.reset_is_low = true;
	}

	fn reset_high(&mut self) {
		self.reset_is_low = false;
	}

	fn pulse_on(&mut self) {}

	fn cts_is_high(&self) -> bool {
		self.cts_high
	}

	fn delay_us(&mut self, _us: u32) {}

	fn timer_start_recurring(&mut self, event: TimerEvent, _period_ms: u32) {
		match event {
			TimerEvent::Tick => self.tick_running = true,
			TimerEvent::AtTimeout => self.at_timer_running = true,
		}
	}

	fn timer_start_once(&mut self, event: TimerEvent, _period_ms: u32) {
		match event {
			TimerEvent::Tick => self.tick_running = true,
			TimerEvent::AtTimeout => self.at_timer_running = true,
		}
	}

	fn timer_stop(&mut self, event: TimerEvent) {
		match event {
			TimerEvent::Tick => self.tick_running = false,
			TimerEvent::AtTimeout => self.at_timer_running = false,
		}
	}

	fn timer_is_running(&self, event: TimerEvent) -> bool {
		match event {
			TimerEvent::Tick => self.tick_running,
			TimerEvent::AtTimeout => self.at_timer_running,
		}
	}

	fn post_tick(&mut self) {
		self.posted += 1;
	}

	fn uptime_secs(&self) -> u32 {
		self.uptime
	}

	fn datetime_secs(&self) -> u32 {
		self.datetime
	}
}

/// In-memory store keyed by object code and member index.
#[derive(Default)]
pub(crate) struct MockStore {
	pub objects: HashMap<UmiCode, Vec<u8>>,
	pub members: HashMap<(UmiCode, u16), Vec<u8>>,
}

impl Store for MockStore {
	fn read_object(&mut self, code: UmiCode, out: &mut [u8]) -> Result<usize> {
		let data = self.objects.get(&code).ok_or(Error::Store)?;
		let len = data.len().min(out.len());
		out[..len].copy_from_slice(&data[..len]);
		Ok(len)
	}

	fn write_object(&mut self, code: UmiCode, data: &[u8]) -> Result<()> {
		self.objects.insert(code, data.to_vec());
		Ok(())
	}

	fn read_member(&mut self, code: UmiCode, member: u16, out: &mut [u8]) -> Result<usize> {
		let data = self.members.get(&(code, member)).ok_or(Error::Store)?;
		let len = data.len().min(out.len());
		out[..len].copy_from_slice(&data[..len]);
		Ok(len)
	}

	fn write_member(&mut self, code: UmiCode, member: u16, data: &[u8]) -> Result<()> {
		self.members.insert((code, member), data.to_vec());
		Ok(())
	}
}
