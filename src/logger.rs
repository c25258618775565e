use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use log::{LevelFilter, Log};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::config::RunMode;

/// Bytes of log text kept in memory
pub const LOG_RING_BYTES: usize = 16384;

/// Most recent log lines, bounded by total text size. Oldest lines go first.
#[derive(Debug)]
pub struct LogRing {
    lines: VecDeque<String>,
    capacity: usize,
    used: usize,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::with_capacity(LOG_RING_BYTES)
    }
}

impl LogRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
            used: 0,
        }
    }

    pub fn append(&mut self, line: &str) {
        if line.is_empty() || line.len() > self.capacity {
            return;
        }
        while self.used + line.len() > self.capacity {
            match self.lines.pop_front() {
                Some(old) => self.used -= old.len(),
                None => break,
            }
        }
        self.used += line.len();
        self.lines.push_back(line.to_owned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub fn max_level(mode: RunMode) -> LevelFilter {
    match mode {
        RunMode::Debug => LevelFilter::Debug,
        RunMode::Normal | RunMode::DataDump => LevelFilter::Info,
    }
}

#[derive(Default)]
pub struct RingBufferLogger {
    pub buffer: Arc<Mutex<LogRing>>,
}

impl RingBufferLogger {
    fn line(record: &log::Record) -> String {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        format!("{} [{}:{}] {}", now, record.level(), record.target(), record.args())
    }
}

impl Log for RingBufferLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!("[{}] {}", record.level(), record.args());
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.append(&Self::line(record));
        }
    }

    fn flush(&self) {}
}

/// Installs the ring logger as the global logger. Returns the ring so the
/// last lines can be read back after a fault.
pub fn install_logger(mode: RunMode) -> Result<Arc<Mutex<LogRing>>, log::SetLoggerError> {
    let logger: Box<RingBufferLogger> = Default::default();
    let ring = logger.buffer.clone();
    log::set_boxed_logger(logger)?;
    log::set_max_level(max_level(mode));
    Ok(ring)
}
