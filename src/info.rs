//! Observed module state.
//!
//! [`ModemInfo`] is the single source of truth about what the module has
//! told us. Only the response parser writes to it; the state machine and
//! the convergence loop read it. Empty strings mean "not yet observed".

use heapless::String;

/// Copies `src` into a fixed-capacity string, truncating on overflow.
pub(crate) fn assign<const N: usize>(dst: &mut String<N>, src: &str) {
	dst.clear();
	let take = src.len().min(N);
	if let Some(s) = src.get(..take) {
		let _ = dst.push_str(s);
	}
}

/// EPS network registration state, part of the observed record and
/// reported through [`crate::Modem::modem_info`].
///
/// Wire codes follow the `+CEREG` `<stat>` field. The SMS-only,
/// emergency-bearer and CSFB registrations (codes above 5) never let
/// this driver move data, so they share one bucket, kept apart from
/// the module's own "unknown" report (code 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RegistrationStatus {
	/// Nothing reported since the last wake-up
	#[default]
	None,
	/// Idle, no operator search running (code 0)
	NotRegistered,
	/// Attached to the home network (code 1)
	HomeNetwork,
	/// Still hunting for an operator to attach to (code 2)
	Searching,
	/// The network rejected the attach (code 3)
	Denied,
	/// Out of coverage or state not known (code 4)
	Unknown,
	/// Attached to a visited network (code 5)
	Roaming,
	/// A registration class this driver cannot use for data (code > 5)
	Other,
}

impl RegistrationStatus {
	/// Decodes a `+CEREG` status code.
	pub fn from_code(code: i8) -> Self {
		match code {
			0 => Self::NotRegistered,
			1 => Self::HomeNetwork,
			2 => Self::Searching,
			3 => Self::Denied,
			4 => Self::Unknown,
			5 => Self::Roaming,
			_ if code < 0 => Self::None,
			_ => Self::Other,
		}
	}

	/// The module may open sessions in this state.
	pub fn is_registered(self) -> bool {
		self == Self::HomeNetwork || self == Self::Roaming
	}

	/// Short form for logs and the service console.
	pub fn descr(self) -> &'static str {
		match self {
			Self::None => "n/a",
			Self::NotRegistered => "not registered",
			Self::HomeNetwork => "home",
			Self::Searching => "searching",
			Self::Denied => "denied",
			Self::Unknown => "unknown",
			Self::Roaming => "roaming",
			Self::Other => "other",
		}
	}
}

/// One module-resident PDP context binding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PdpContext {
	pub cid: String<32>,
	pub pdp_type: String<32>,
	pub apn: String<32>,
	pub addr: String<32>,
}

/// Extended signal quality snapshot (`+CESQ`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalQuality {
	/// Wall-clock seconds when the snapshot was taken
	pub datetime: u32,
	pub rxlev: u8,
	pub ber: u8,
	pub rscp: u8,
	pub ecno: u8,
	pub rsrq: u8,
	pub rsrp: u8,
	/// Wall-clock seconds of the last snapshot flushed to the store
	pub datetime_lastsync: u32,
}

/// Everything the module has reported about itself.
#[derive(Clone, Debug, Default)]
pub struct ModemInfo {
	pub model: String<32>,
	pub sw_release: String<32>,
	/// Factory serial number
	pub fsn: String<32>,
	pub imei: String<32>,
	pub iccid: String<24>,
	/// Configured band bitmaps, indexed by radio access technology
	pub bnd_bitmap: [String<32>; 3],
	/// Preferred radio access technology list
	pub prl: [u8; 3],
	pub prl_valid: bool,
	/// Registration reporting mode as reported by `+CEREG?`
	pub cereg: String<4>,
	/// Last registration state the module indicated
	pub registration_status: RegistrationStatus,
	/// Functionality level as a decimal string ("0", "1", "4")
	pub fun: String<8>,
	/// Active radio access technology
	pub rat: u8,
	/// Active band bitmap
	pub bnd: String<24>,
	pub pdp_context: [PdpContext; 2],
	pub cesq: SignalQuality,
}

impl ModemInfo {
	pub fn clear(&mut self) {
		*self = ModemInfo::default();
	}

	/// Module radio is in full functionality.
	pub fn functionality_is_full(&self) -> bool {
		self.fun.as_str() == "1"
	}

	/// Module radio is not yet in airplane mode.
	pub fn functionality_is_not_off(&self) -> bool {
		self.fun.as_str() != "4"
	}

	/// Lowest active band number decoded from the active band bitmap,
	/// 255 when no band is active.
	pub fn active_band(&self) -> u8 {
		let mut band = 0u8;
		for c in self.bnd.chars().rev() {
			match c {
				'1' => return band,
				'2' => return band + 1,
				'4' => return band + 2,
				'8' => return band + 3,
				_ => {}
			}
			band = band.saturating_add(4);
		}
		255
	}
}
