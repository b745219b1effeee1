//! Logging for the stashd crates: one process-wide sink on stderr,
//! leveled, emitting plain text or JSON lines.
//!
//! Configuration lives in a single packed atomic so the hot path is one
//! load. Each record is assembled into a buffer first and written with
//! one syscall, so lines from the scanner and the dispatcher threads
//! never interleave.

use std::fmt::{self, Arguments, Write as _};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    const NAMES: [(&'static str, Level); 6] = [
        ("error", Level::Error),
        ("warn", Level::Warn),
        ("warning", Level::Warn),
        ("info", Level::Info),
        ("debug", Level::Debug),
        ("trace", Level::Trace),
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::NAMES
            .iter()
            .find(|(candidate, _)| name.eq_ignore_ascii_case(candidate))
            .map(|(_, level)| *level)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("text") {
            Some(Self::Text)
        } else if name.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

// Bits 0-7 hold the level threshold; the flags sit above it.
const JSON_FLAG: u32 = 1 << 8;
const NO_TIMESTAMP_FLAG: u32 = 1 << 9;

static SETTINGS: AtomicU32 = AtomicU32::new(Level::Info as u32);

pub fn init(config: LogConfig) {
    let mut packed = config.level as u32;
    if config.format == Format::Json {
        packed |= JSON_FLAG;
    }
    if !config.timestamps {
        packed |= NO_TIMESTAMP_FLAG;
    }
    SETTINGS.store(packed, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u32 <= SETTINGS.load(Ordering::Relaxed) & 0xff
}

/// Formats and writes one record. Callers go through the `log_*!`
/// macros, which check `enabled` first.
pub fn emit(level: Level, target: &'static str, file: &'static str, line: u32, args: Arguments<'_>) {
    let packed = SETTINGS.load(Ordering::Relaxed);
    if level as u32 > packed & 0xff {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut record = String::with_capacity(96);
    if packed & JSON_FLAG != 0 {
        let entry = json!({
            "time": now.as_millis() as u64,
            "lvl": level.label(),
            "mod": target,
            "src": format!("{file}:{line}"),
            "msg": args.to_string(),
        });
        let _ = write!(record, "{entry}");
    } else {
        if packed & NO_TIMESTAMP_FLAG == 0 {
            push_utc_timestamp(&mut record, now.as_secs(), now.subsec_millis());
            record.push(' ');
        }
        let _ = write!(record, "{level} {target}: {args}");
    }
    record.push('\n');

    let _ = io::stderr().lock().write_all(record.as_bytes());
}

#[macro_export]
macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {{
        let level = $crate::Level::$level;
        if $crate::enabled(level) {
            $crate::emit(level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log_event!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log_event!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log_event!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log_event!(Debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::log_event!(Trace, $($arg)*) };
}

fn push_utc_timestamp(out: &mut String, unix_secs: u64, millis: u32) {
    let (year, month, day) = date_from_days(unix_secs / 86_400);
    let secs_of_day = unix_secs % 86_400;
    let _ = write!(
        out,
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60,
    );
}

fn is_leap_year(year: u64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

// Walks forward from the epoch. Log volume never makes this the hot
// part of a record.
fn date_from_days(mut days: u64) -> (u64, u32, u32) {
    let mut year = 1970u64;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }
    const MONTH_LENGTHS: [u64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0usize;
    loop {
        let mut month_len = MONTH_LENGTHS[month];
        if month == 1 && is_leap_year(year) {
            month_len = 29;
        }
        if days < month_len {
            break;
        }
        days -= month_len;
        month += 1;
    }
    (year, month as u32 + 1, days as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_resolve() {
        assert_eq!(Level::from_name("info"), Some(Level::Info));
        assert_eq!(Level::from_name(" WARN "), Some(Level::Warn));
        assert_eq!(Level::from_name("warning"), Some(Level::Warn));
        assert_eq!(Level::from_name("verbose"), None);
    }

    #[test]
    fn format_names_resolve() {
        assert_eq!(Format::from_name("text"), Some(Format::Text));
        assert_eq!(Format::from_name("JSON"), Some(Format::Json));
        assert_eq!(Format::from_name("xml"), None);
    }

    #[test]
    fn epoch_and_leap_dates() {
        assert_eq!(date_from_days(0), (1970, 1, 1));
        assert_eq!(date_from_days(19_723), (2024, 1, 1));
        // 2024 is a leap year: Jan (31) + Feb 29th.
        assert_eq!(date_from_days(19_723 + 59), (2024, 2, 29));
        assert_eq!(date_from_days(19_723 + 60), (2024, 3, 1));
    }

    #[test]
    fn timestamp_renders_iso8601() {
        let mut out = String::new();
        push_utc_timestamp(&mut out, 0, 5);
        assert_eq!(out, "1970-01-01T00:00:00.005Z");
    }
}
