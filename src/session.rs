//! Module-resident transport session tracking.
//!
//! The module shares one pool of six session identifiers across all its
//! transport protocols. Slot 0 is the session the application uses;
//! slots 1..5 only exist so sessions left over from earlier attempts can
//! be found and closed. Indices are zero-based here, one-based on the
//! wire.

/// Number of session identifiers the module provides.
pub const SESSION_ID_MAX: usize = 6;

/// State of one session slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
	#[default]
	Closed,
	OpenUdp,
	OpenTcp,
}

/// Fixed table of the six module session slots.
#[derive(Clone, Debug, Default)]
pub struct SessionTable {
	slots: [SessionState; SESSION_ID_MAX],
}

impl SessionTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn clear(&mut self) {
		self.slots = [SessionState::Closed; SESSION_ID_MAX];
	}

	pub fn query(&self, slot: usize) -> SessionState {
		if slot >= SESSION_ID_MAX {
			return SessionState::Closed;
		}
		self.slots[slot]
	}

	/// Marks a slot open. The kind is only recorded while transitioning
	/// from `Closed`.
	pub fn mark_open(&mut self, slot: usize, kind: SessionState) {
		if slot >= SESSION_ID_MAX {
			log::error!("invalid session slot: {}", slot);
			return;
		}
		if kind == SessionState::Closed {
			return;
		}
		if self.slots[slot] == SessionState::Closed {
			self.slots[slot] = kind;
		}
	}

	/// Marks a slot closed. Closing a closed slot is a no-op.
	pub fn mark_closed(&mut self, slot: usize) {
		if slot >= SESSION_ID_MAX {
			log::error!("invalid session slot: {}", slot);
			return;
		}
		self.slots[slot] = SessionState::Closed;
	}

	/// Highest open slot of the ones the close-down walks (3..0).
	pub fn find_highest_open(&self) -> Option<usize> {
		(0..4).rev().find(|&i| self.slots[i] != SessionState::Closed)
	}
}
