// Licensed under the Apache-2.0 license

//! Crate-wide plumbing shared by the bus drivers: logging sinks and the
//! monotonic time source used to bound every hardware wait.

use core::fmt;

/// Microsecond-resolution instant used for poll deadlines.
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Destination for driver diagnostics.
///
/// Drivers hold their logger inside the per-channel lock, so implementations
/// never need interior mutability.
pub trait Logger {
    fn debug(&mut self, args: fmt::Arguments<'_>);
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger that emits one line per event over any `embedded-io` byte sink,
/// typically a debug UART.
///
/// Write failures are dropped: diagnostics must never turn into bus errors.
pub struct WriterLogger<W: embedded_io::Write> {
    writer: W,
    verbose: bool,
}

impl<W: embedded_io::Write> WriterLogger<W> {
    /// Logs errors and debug events.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            verbose: true,
        }
    }

    /// Logs errors only.
    pub fn errors_only(writer: W) -> Self {
        Self {
            writer,
            verbose: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: embedded_io::Write> Logger for WriterLogger<W> {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        if self.verbose {
            let _ = self.writer.write_fmt(format_args!("[debug] {args}\r\n"));
        }
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        let _ = self.writer.write_fmt(format_args!("[error] {args}\r\n"));
    }
}

/// Monotonic time source.
///
/// Shared by every channel of a controller, hence `&self`.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[cfg(any(test, feature = "std"))]
pub use host::{StdClock, StdDelay};

#[cfg(any(test, feature = "std"))]
mod host {
    use super::{Clock, Instant};

    /// Host clock backed by `std::time::Instant`.
    pub struct StdClock {
        origin: std::time::Instant,
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StdClock {
        #[must_use]
        pub fn new() -> Self {
            Self {
                origin: std::time::Instant::now(),
            }
        }
    }

    impl Clock for StdClock {
        fn now(&self) -> Instant {
            let micros = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
            Instant::from_ticks(micros)
        }
    }

    /// Delay that yields the thread for the requested time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct StdDelay;

    impl embedded_hal::delay::DelayNs for StdDelay {
        fn delay_ns(&mut self, ns: u32) {
            std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
        }
    }
}
