//! Error handling for the HL78xx modem driver.
//!
//! Two layers live here: `Error` is what fallible driver calls return to
//! the application, `Fault` is the persisted taxonomy of communication
//! failures written to the external store when something goes wrong
//! during a session.

use core::fmt;

/// Driver-level error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
	/// Store read or write failed
	Store,
	/// Configuration object missing or malformed
	Config,
	/// Supplied buffer too small or frame too large
	Overflow,
	/// No received frame available
	NoData,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Store => write!(f, "Store access failed"),
			Error::Config => write!(f, "Configuration invalid"),
			Error::Overflow => write!(f, "Buffer overflow"),
			Error::NoData => write!(f, "No data available"),
		}
	}
}

/// Result type alias for this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Communication fault taxonomy, persisted on transition.
///
/// The discriminants are the values written to the store and must stay
/// stable across firmware versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum Fault {
	/// No fault occurred
	#[default]
	None = 0,
	/// CTS never went high after reset
	CtsHighAfterResetTimedOut = 1,
	/// CTS never went low after going high
	CtsLowAfterResetTimedOut = 2,
	/// Registration did not complete within the configured time
	RegistrationTimedOut = 3,
	/// SIM identifier could not be read, card maybe not present
	IccidReadFailed = 4,
	/// UDP session could not be set up
	UdpSocketSetupFailed = 5,
	/// TCP session could not be set up
	TcpSocketSetupFailed = 6,
	/// TCP connect failed
	TcpConnectFailed = 7,
	/// AT interface did not respond to the probe
	AtCheckFailed = 8,
	/// A configuration setter made no progress after repeated attempts
	SetParamFailed = 9,
	/// Retry budget exhausted before the AT interface was ready
	AtNotReadyRetriesExceeded = 0xFE,
	/// Retry budget exhausted
	RetriesExceeded = 0xFF,
}

impl Fault {
	/// Short mnemonic as used in logs and the service console.
	pub fn descr(self) -> &'static str {
		match self {
			Fault::None => "",
			Fault::CtsHighAfterResetTimedOut => "BOOT1",
			Fault::CtsLowAfterResetTimedOut => "BOOT2",
			Fault::RegistrationTimedOut => "REG",
			Fault::IccidReadFailed => "SIM",
			Fault::UdpSocketSetupFailed => "UDP",
			Fault::TcpSocketSetupFailed => "TCP",
			Fault::TcpConnectFailed => "TCP",
			Fault::AtCheckFailed => "ATC",
			Fault::SetParamFailed => "CFG",
			Fault::AtNotReadyRetriesExceeded => "AT",
			Fault::RetriesExceeded => "ERR",
		}
	}
}

/// Last fault with the context it occurred in.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultRecord {
	pub last: Fault,
	/// State encoding at the time of the fault
	pub state: u16,
	/// Action encoding at the time of the fault
	pub action: u16,
	/// Wall-clock seconds at the time of the fault
	pub datetime: u32,
}
