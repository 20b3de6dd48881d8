use crate::Sink;
use core::fmt::{self, Write};
use kernel_sync::SpinLock;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `"[LEVEL] target: message\n"` records into a
/// [`Sink`], typically the memory-buffer console.
pub struct MbufLogger {
    max_level: LevelFilter,
    sink: &'static dyn Sink,
    /// Keeps records of different CPUs from interleaving.
    lock: SpinLock<()>,
}

struct SinkWriter<'a>(&'a dyn Sink);

impl Write for SinkWriter<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.0.outc(b);
        }
        Ok(())
    }
}

impl MbufLogger {
    #[must_use]
    pub const fn new(sink: &'static dyn Sink, max_level: LevelFilter) -> Self {
        Self {
            max_level,
            sink,
            lock: SpinLock::new(()),
        }
    }

    /// Install as the global logger. Call once during early init.
    #[allow(clippy::missing_errors_doc)]
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl Log for MbufLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        cfg!(feature = "enabled") && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _guard = self.lock.lock();
        // Best effort; the sink itself cannot fail.
        let _ = writeln!(
            SinkWriter(self.sink),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
