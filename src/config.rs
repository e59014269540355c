//! Desired modem configuration.
//!
//! Loaded from the external store once per wake-up and treated as
//! immutable for the duration of one communication session. The
//! convergence loop compares the module-resident settings against this
//! record and issues setters until they match.

use heapless::String;

use crate::error::{Error, Result};
use crate::info::assign;

/// Radio access technologies, used as band bitmap indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RadioTech {
	/// Cat-M1 (the only RAT available on the HL7800-M)
	CatM1 = 0,
	NbIot = 1,
	/// GSM, HL7802/HL7812 only
	Gsm = 2,
}

impl RadioTech {
	pub fn as_str(self) -> &'static str {
		match self {
			RadioTech::CatM1 => "CAT-M1",
			RadioTech::NbIot => "NB-IoT",
			RadioTech::Gsm => "GSM",
		}
	}
}

/// Transport used for the application session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionType {
	#[default]
	Udp,
	Tcp,
}

impl ConnectionType {
	/// Wire spelling, also the middle part of the `+K<tech>RCV` command.
	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionType::Udp => "UDP",
			ConnectionType::Tcp => "TCP",
		}
	}
}

/// Serialized layout of the configuration object in the store.
///
/// Strings are nul-padded fields, integers little-endian.
const APN_OFF: usize = 0;
const APN_LEN: usize = 32;
const ADDR_OFF: usize = 32;
const ADDR_LEN: usize = 64;
const CNX_TYPE_OFF: usize = 96;
const CNX_TYPE_LEN: usize = 4;
const BND0_OFF: usize = 100;
const BND1_OFF: usize = 132;
const BND_LEN: usize = 32;
const RAT_OFF: usize = 164;
const PORT_OFF: usize = 167;
const WAIT_RSP_OFF: usize = 169;
const WAIT_REG_OFF: usize = 171;
const SESSION_OFF: usize = 173;

/// Total serialized size.
pub const CONFIG_OBJECT_LEN: usize = 175;

/// Desired configuration record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModemConfig {
	pub apn: String<32>,
	pub remote_address: String<64>,
	pub remote_port: u16,
	pub cnx_type: ConnectionType,
	/// Desired band bitmaps, indexed by [`RadioTech`] (Cat-M1, NB-IoT)
	pub bnd_bitmap: [String<32>; 2],
	/// Preferred radio access technology list, 0 terminates
	pub rat: [u8; 3],
	/// Seconds to wait for an application response after a send
	pub wait_for_response_timeout: u16,
	/// Seconds to wait for network registration
	pub wait_for_registration_timeout: u16,
	/// Overall communication session budget in seconds
	pub communication_session_timeout: u16,
}

impl Default for ModemConfig {
	fn default() -> Self {
		let mut cfg = ModemConfig {
			apn: String::new(),
			remote_address: String::new(),
			remote_port: 4154,
			cnx_type: ConnectionType::Udp,
			bnd_bitmap: [String::new(), String::new()],
			rat: [2, 1, 0],
			wait_for_response_timeout: 30,
			wait_for_registration_timeout: 120,
			communication_session_timeout: 300,
		};
		assign(&mut cfg.apn, "internet.cxn");
		assign(&mut cfg.remote_address, "199.64.78.128");
		assign(&mut cfg.bnd_bitmap[0], "000000000000000A0A188E");
		assign(&mut cfg.bnd_bitmap[1], "0000000000000000080084");
		cfg
	}
}

fn field_str(buf: &[u8], off: usize, len: usize) -> &str {
	let field = &buf[off..off + len];
	let end = field.iter().position(|&b| b == 0).unwrap_or(len);
	core::str::from_utf8(&field[..end]).unwrap_or("")
}

fn field_u16(buf: &[u8], off: usize) -> u16 {
	u16::from_le_bytes([buf[off], buf[off + 1]])
}

impl ModemConfig {
	/// Parses the serialized configuration object.
	pub fn from_bytes(buf: &[u8]) -> Result<Self> {
		if buf.len() < CONFIG_OBJECT_LEN {
			return Err(Error::Config);
		}

		let mut cfg = ModemConfig::default();
		assign(&mut cfg.apn, field_str(buf, APN_OFF, APN_LEN));
		assign(&mut cfg.remote_address, field_str(buf, ADDR_OFF, ADDR_LEN));
		cfg.cnx_type = match field_str(buf, CNX_TYPE_OFF, CNX_TYPE_LEN) {
			"TCP" => ConnectionType::Tcp,
			_ => ConnectionType::Udp,
		};
		assign(&mut cfg.bnd_bitmap[0], field_str(buf, BND0_OFF, BND_LEN));
		assign(&mut cfg.bnd_bitmap[1], field_str(buf, BND1_OFF, BND_LEN));
		cfg.rat = [buf[RAT_OFF], buf[RAT_OFF + 1], buf[RAT_OFF + 2]];
		cfg.remote_port = field_u16(buf, PORT_OFF);
		cfg.wait_for_response_timeout = field_u16(buf, WAIT_RSP_OFF);
		cfg.wait_for_registration_timeout = field_u16(buf, WAIT_REG_OFF);
		cfg.communication_session_timeout = field_u16(buf, SESSION_OFF);
		Ok(cfg)
	}

	/// Serializes into the store layout, for provisioning and tests.
	pub fn to_bytes(&self) -> [u8; CONFIG_OBJECT_LEN] {
		let mut buf = [0u8; CONFIG_OBJECT_LEN];
		buf[APN_OFF..][..self.apn.len()].copy_from_slice(self.apn.as_bytes());
		buf[ADDR_OFF..][..self.remote_address.len()].copy_from_slice(self.remote_address.as_bytes());
		let cnx = self.cnx_type.as_str();
		buf[CNX_TYPE_OFF..][..cnx.len()].copy_from_slice(cnx.as_bytes());
		buf[BND0_OFF..][..self.bnd_bitmap[0].len()].copy_from_slice(self.bnd_bitmap[0].as_bytes());
		buf[BND1_OFF..][..self.bnd_bitmap[1].len()].copy_from_slice(self.bnd_bitmap[1].as_bytes());
		buf[RAT_OFF..RAT_OFF + 3].copy_from_slice(&self.rat);
		buf[PORT_OFF..][..2].copy_from_slice(&self.remote_port.to_le_bytes());
		buf[WAIT_RSP_OFF..][..2].copy_from_slice(&self.wait_for_response_timeout.to_le_bytes());
		buf[WAIT_REG_OFF..][..2].copy_from_slice(&self.wait_for_registration_timeout.to_le_bytes());
		buf[SESSION_OFF..][..2].copy_from_slice(&self.communication_session_timeout.to_le_bytes());
		buf
	}

	pub fn is_tcp(&self) -> bool {
		self.cnx_type == ConnectionType::Tcp
	}

	pub fn is_udp(&self) -> bool {
		self.cnx_type == ConnectionType::Udp
	}
}
