//! Driver core for Sierra Wireless HL78xx series LTE-M / NB-IoT modules.
//!
//! Brings the module from cold-off to an established UDP or TCP session,
//! exchanges application payloads and returns it to cold-off, tolerating
//! flaky radio conditions and ambiguous responses along the way.
//!
//! The driver is a single-threaded cooperative machine advanced by three
//! callbacks wired up by the embedding firmware:
//!
//! - [`Modem::tick`] from a periodic 1000 ms timer,
//! - [`Modem::on_byte`] from the serial adapter for each received byte,
//! - [`Modem::at_timeout`] from the one-shot response timer.
//!
//! Platform access goes through the [`ModemHal`] port, persistent
//! configuration and status through the [`Store`] port.
//!
//! ```ignore
//! let mut modem = Modem::new(hal, store);
//! modem.init()?;
//! modem.start(|result| { /* session finished */ }, true);
//! // wire up tick / on_byte / at_timeout, then let the timers run
//! ```

#![cfg_attr(not(test), no_std)]

mod at;
mod cmd;
mod line;
mod modem;
#[cfg(test)]
mod testutil;

pub mod config;
pub mod error;
pub mod hal;
pub mod info;
pub mod session;
pub mod stats;
pub mod store;

pub use config::{ConnectionType, ModemConfig, RadioTech};
pub use error::{Error, Fault, FaultRecord, Result};
pub use hal::{ModemHal, TimerEvent};
pub use info::{ModemInfo, PdpContext, RegistrationStatus, SignalQuality};
pub use line::EOF_PATTERN;
pub use modem::{Action, FinishedCallback, Modem, ModemState, TestCase};
pub use session::{SessionState, SessionTable, SESSION_ID_MAX};
pub use stats::Stats;
pub use store::{Store, UmiCode};
