//! Byte stream to response line assembly.
//!
//! Two modes. In command mode incoming bytes accumulate until CR or LF;
//! anything of at least two characters is handed up as a response line.
//! In raw mode, entered after a `CONNECT`, bytes are payload until the
//! fixed 16-octet trailer appears. The modem emits a stray CR/LF right
//! after `CONNECT`; those are skipped while the payload is still empty.

use heapless::Vec;

/// Trailer terminating a raw-mode payload in either direction.
pub const EOF_PATTERN: &[u8; 16] = b"--EOF--Pattern--";

pub(crate) const LINE_BUF_CAP: usize = 2048;
pub(crate) const RAW_BUF_CAP: usize = 4096;

/// What a pushed byte completed, if anything.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RxEvent {
	/// A complete response line is ready in the line buffer
	Line,
	/// A raw payload is ready in the raw buffer, trailer stripped
	RawFrame,
	/// The trailer arrived with no payload in front of it
	RawEmpty,
}

pub(crate) struct LineAssembler {
	line: Vec<u8, LINE_BUF_CAP>,
	raw: Vec<u8, RAW_BUF_CAP>,
	raw_mode: bool,
}

impl LineAssembler {
	pub fn new() -> Self {
		LineAssembler {
			line: Vec::new(),
			raw: Vec::new(),
			raw_mode: false,
		}
	}

	pub fn reset(&mut self) {
		self.line.clear();
		self.raw.clear();
		self.raw_mode = false;
	}

	/// Raw mode is armed and payload bytes are being collected.
	pub fn raw_mode(&self) -> bool {
		self.raw_mode
	}

	/// Switch to raw mode. Never called while a line is partially
	/// assembled; the command/response ordering guarantees that.
	pub fn start_raw(&mut self) {
		self.raw_mode = true;
		self.raw.clear();
	}

	/// Abandon a pending raw transfer (module replied `ERROR`).
	pub fn cancel_raw(&mut self) {
		self.raw_mode = false;
		self.raw.clear();
	}

	pub fn push(&mut self, byte: u8) -> Option<RxEvent> {
		if self.raw_mode {
			return self.push_raw(byte);
		}

		if byte == b'\r' || byte == b'\n' {
			if self.line.len() >= 2 {
				return Some(RxEvent::Line);
			}
			self.line.clear();
			return None;
		}

		if self.line.push(byte).is_err() {
			log::error!("line buffer full, dropping {} bytes", self.line.len());
			self.line.clear();
		}
		None
	}

	fn push_raw(&mut self, byte: u8) -> Option<RxEvent> {
		if self.raw.is_empty() && (byte == b'\r' || byte == b'\n') {
			return None;
		}

		if self.raw.push(byte).is_err() {
			log::trace!("raw buffer full, byte dropped");
			return None;
		}

		let n = self.raw.len();
		if n >= EOF_PATTERN.len() && self.raw[n - EOF_PATTERN.len()..] == EOF_PATTERN[..] {
			self.raw_mode = false;
			self.raw.truncate(n - EOF_PATTERN.len());
			if self.raw.is_empty() {
				return Some(RxEvent::RawEmpty);
			}
			return Some(RxEvent::RawFrame);
		}
		None
	}

	/// Takes the completed line, leaving the assembler ready for the next.
	pub fn take_line(&mut self) -> Vec<u8, LINE_BUF_CAP> {
		core::mem::take(&mut self.line)
	}

	/// Takes the completed raw payload.
	pub fn take_raw(&mut self) -> Vec<u8, RAW_BUF_CAP> {
		core::mem::take(&mut self.raw)
	}
}
