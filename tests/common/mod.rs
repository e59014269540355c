//! Test doubles and drive helpers for the end-to-end scenarios.

#![allow(dead_code)]

use std::collections::HashMap;

use hl78xx_modem::{Error, ModemHal, Result, Store, TimerEvent, UmiCode};

/// Records everything the driver does to the platform and lets the
/// tests play the module side.
#[derive(Default)]
pub struct MockHal {
	pub writes: Vec<Vec<u8>>,
	pub cts_high: bool,
	pub uptime: u32,
	pub datetime: u32,
	pub uart_open: bool,
	pub reset_is_low: bool,
	pub tick_running: bool,
	pub at_timer_running: bool,
	/// Coalesced "run another tick" request
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

/// In-memory key/value store.
#[derive(Default)]
pub struct MockStore {
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

pub type TestModem = hl78xx_modem::Modem<MockHal, MockStore>;

/// Delivers ticks the driver posted for itself, coalesced like the
/// real scheduler does.
pub fn pump(m: &mut TestModem) {
	for _ in 0..32 {
		if m.hal().posted == 0 {
			return;
		}
		m.hal_mut().posted = 0;
		m.tick();
	}
	panic!("tick storm: driver keeps re-posting");
}

/// One period of the recurring action timer, plus any follow-up ticks.
pub fn step(m: &mut TestModem) {
	m.hal_mut().uptime += 1;
	m.hal_mut().datetime += 1;
	m.tick();
	pump(m);
}

/// Feeds module output into the byte-in callback.
pub fn feed(m: &mut TestModem, text: &str) {
	for b in text.bytes() {
		m.on_byte(b);
	}
	pump(m);
}

pub fn feed_bytes(m: &mut TestModem, bytes: &[u8]) {
	for &b in bytes {
		m.on_byte(b);
	}
	pump(m);
}

/// All commands transmitted so far, as strings.
pub fn cmds(m: &TestModem) -> Vec<String> {
	m.hal()
		.writes
		.iter()
		.map(|w| String::from_utf8_lossy(w).into_owned())
		.collect()
}

/// Asserts `expected` appears in `actual` in order (gaps allowed).
pub fn assert_subsequence(actual: &[String], expected: &[&str]) {
	let mut it = actual.iter();
	for want in expected {
		assert!(
			it.any(|got| got == want),
			"missing command {:?} (in order) in {:#?}",
			want,
			actual
		);
	}
}
