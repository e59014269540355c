//! Hardware port consumed by the driver.
//!
//! The core never touches a peripheral directly. Everything it needs
//! from the platform - the modem UART, the reset line, the CTS sense,
//! the two timer channels and the clock - comes through [`ModemHal`].
//! The driver itself is advanced purely by external callbacks
//! ([`crate::Modem::tick`], [`crate::Modem::on_byte`],
//! [`crate::Modem::at_timeout`]), so the implementation behind this
//! trait stays free to be interrupt-driven, polled or simulated.

/// Timer channels used by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
	/// Recurring 1000 ms action tick, delivered as [`crate::Modem::tick`]
	Tick,
	/// One-shot response timeout, delivered as [`crate::Modem::at_timeout`]
	AtTimeout,
}

/// Platform services for the modem driver.
///
/// `reset_low`/`reset_high` drive the module reset input; the minimum
/// assertion time is produced with `delay_us`. `cts_is_high` samples the
/// CTS line, which this module family uses as a boot/power indication
/// rather than for flow control.
pub trait ModemHal {
	/// Error type of the serial transmit path.
	type SerialError: embedded_io::Error;

	fn uart_open(&mut self) -> core::result::Result<(), Self::SerialError>;
	fn uart_close(&mut self);

	/// Write raw bytes to the modem UART.
	fn transmit(&mut self, data: &[u8]) -> core::result::Result<(), Self::SerialError>;

	fn reset_low(&mut self);
	fn reset_high(&mut self);

	/// Pulse the module power-on input.
	fn pulse_on(&mut self);

	fn cts_is_high(&self) -> bool;

	/// Busy wait, used only for the reset assertion time.
	fn delay_us(&mut self, us: u32);

	fn timer_start_recurring(&mut self, event: TimerEvent, period_ms: u32);
	fn timer_start_once(&mut self, event: TimerEvent, period_ms: u32);
	fn timer_stop(&mut self, event: TimerEvent);
	fn timer_is_running(&self, event: TimerEvent) -> bool;

	/// Request another action tick on the next scheduler pass.
	///
	/// Must not call back into the driver synchronously.
	fn post_tick(&mut self);

	/// Monotonic uptime in seconds.
	fn uptime_secs(&self) -> u32;

	/// Wall-clock time in seconds.
	fn datetime_secs(&self) -> u32;
}
