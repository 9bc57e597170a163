//! Ring-buffered diagnostics safe to use from the audio thread.
//!
//! The audio thread must never allocate, lock, or block, which rules out
//! ordinary logging there. Instead a record is a small `Copy` value - a
//! level, a component id, a static message, and up to two integer
//! arguments - pushed into a bounded SPSC ring. A foreground thread drains
//! the ring and does the actual formatting. When the ring is full the
//! record is dropped and a counter incremented, never blocking the writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Subsystem that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Vm,
    Compiler,
    Parser,
    Dsp,
    Audio,
    Main,
}

impl Component {
    pub fn label(self) -> &'static str {
        match self {
            Component::Vm => "vm",
            Component::Compiler => "compiler",
            Component::Parser => "parser",
            Component::Dsp => "dsp",
            Component::Audio => "audio",
            Component::Main => "main",
        }
    }
}

/// One diagnostic record. `Copy` so pushing it is a single slot write.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord {
    pub level: LogLevel,
    pub component: Component,
    /// Static message text; the two args carry the variable parts.
    pub message: &'static str,
    pub arg1: u32,
    pub arg2: u32,
}

/// Producer half, owned by the audio-side component (e.g. the VM).
pub struct LogTx {
    producer: Option<Producer<LogRecord>>,
    dropped: Arc<AtomicU64>,
}

impl LogTx {
    /// A sink with no ring attached; every record is discarded. Used
    /// before a host installs a real channel, and in tests.
    pub fn detached() -> LogTx {
        LogTx {
            producer: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn log(
        &mut self,
        level: LogLevel,
        component: Component,
        message: &'static str,
        arg1: u32,
        arg2: u32,
    ) {
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        let record = LogRecord {
            level,
            component,
            message,
            arg1,
            arg2,
        };
        if producer.push(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn info(&mut self, component: Component, message: &'static str, arg1: u32, arg2: u32) {
        self.log(LogLevel::Info, component, message, arg1, arg2);
    }

    pub fn warn(&mut self, component: Component, message: &'static str, arg1: u32, arg2: u32) {
        self.log(LogLevel::Warn, component, message, arg1, arg2);
    }

    pub fn error(&mut self, component: Component, message: &'static str, arg1: u32, arg2: u32) {
        self.log(LogLevel::Error, component, message, arg1, arg2);
    }
}

/// Consumer half, drained on a foreground thread.
pub struct LogRx {
    consumer: Consumer<LogRecord>,
    dropped: Arc<AtomicU64>,
}

impl LogRx {
    /// Pull every pending record, handing each to `sink`. Returns how many
    /// records were delivered.
    pub fn drain(&mut self, mut sink: impl FnMut(LogRecord)) -> usize {
        let mut delivered = 0;
        while let Ok(record) = self.consumer.pop() {
            sink(record);
            delivered += 1;
        }
        delivered
    }

    /// Records lost to ring overflow since the channel was created.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a log channel holding up to `capacity` pending records.
pub fn channel(capacity: usize) -> (LogTx, LogRx) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        LogTx {
            producer: Some(producer),
            dropped: dropped.clone(),
        },
        LogRx { consumer, dropped },
    )
}

/// Render a record as display text. Lives here so every flusher (TUI,
/// tests, plain stderr) prints the same shape.
pub fn format_record(record: &LogRecord) -> String {
    format!(
        "[{}] {}: {} ({}, {})",
        record.level.label(),
        record.component.label(),
        record.message,
        record.arg1,
        record.arg2
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_flow_through_channel() {
        let (mut tx, mut rx) = channel(8);
        tx.error(Component::Vm, "unknown opcode", 0xAB, 7);
        tx.info(Component::Audio, "stream started", 48_000, 0);

        let mut seen = Vec::new();
        let delivered = rx.drain(|r| seen.push(r));

        assert_eq!(delivered, 2);
        assert_eq!(seen[0].level, LogLevel::Error);
        assert_eq!(seen[0].arg1, 0xAB);
        assert_eq!(seen[1].component, Component::Audio);
        assert_eq!(rx.dropped(), 0);
    }

    #[test]
    fn overflow_drops_instead_of_blocking() {
        let (mut tx, mut rx) = channel(2);
        for i in 0..5 {
            tx.warn(Component::Dsp, "missing input connection", i, 0);
        }

        let mut count = 0;
        rx.drain(|_| count += 1);
        assert_eq!(count, 2, "ring holds only its capacity");
        assert_eq!(rx.dropped(), 3);
    }

    #[test]
    fn detached_sink_discards_quietly() {
        let mut tx = LogTx::detached();
        tx.error(Component::Vm, "bad header", 0, 0);
        // Nothing to assert beyond "does not panic": there is no consumer.
    }
}
