use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use thiserror::Error;

/// Default recording command, one argument per element
pub const DEFAULT_COMMAND: [&str; 10] = [
    "ffmpeg",
    "-i",
    "pixty2.avi",
    "-t",
    "<duration>",
    "-acodec",
    "copy",
    "-vcodec",
    "copy",
    "<outFile>",
];

/// Capture-side arguments (`streamer`)
#[derive(Parser, Debug, Clone)]
#[command(name = "streamer")]
#[command(about = "Record a media feed in fixed-length chunks and upload each chunk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ClientArgs {
    /// Directory chunks are recorded into before upload
    #[arg(long, default_value = "./")]
    pub output_dir: PathBuf,

    /// Output file extension (no dot)
    #[arg(long, default_value = "mp4")]
    pub file_ext: String,

    /// Where to send the chunks
    #[arg(long, default_value = "http://localhost:8080/video-stream")]
    pub target_url: String,

    /// Chunk duration in seconds
    #[arg(long, default_value = "60")]
    pub duration: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Recording command; `<duration>` and `<outFile>` are substituted in every argument
    #[arg(
        last = true,
        value_name = "COMMAND",
        default_values_t = DEFAULT_COMMAND.map(String::from)
    )]
    pub command: Vec<String>,
}

/// Collector-side arguments (`streamer-srv`)
#[derive(Parser, Debug, Clone)]
#[command(name = "streamer-srv")]
#[command(about = "Receive uploaded chunks and keep the storage directory under a size cap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ServerArgs {
    /// Where uploaded chunks are stored
    #[arg(long, default_value = "./")]
    pub storage_dir: PathBuf,

    /// Maximum total size of stored chunks, e.g. `500Mb`, `10Gb`, `2GiB`
    #[arg(long, default_value = "10Gb")]
    pub max_size: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Extension of chunk files subject to retention (no dot)
    #[arg(long, default_value = "mp4")]
    pub file_ext: String,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Debug mode, same as `--log-level debug`
    #[arg(long)]
    pub debug: bool,
}

impl ServerArgs {
    pub fn effective_log_level(&self) -> LogLevel {
        if self.debug {
            self.log_level.min(LogLevel::Debug)
        } else {
            self.log_level
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Install the fmt subscriber; `RUST_LOG` wins over `level` when set
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let level: tracing::Level = level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("empty size value")]
    Empty,

    #[error("'{0}' does not start with a number")]
    MissingNumber(String),

    #[error("unknown size unit '{unit}' in '{value}'")]
    UnknownUnit { value: String, unit: String },

    #[error("'{0}' does not fit in 64 bits")]
    Overflow(String),
}

/// Parse a byte size such as `1000`, `500kb`, `10Gb` or `2GiB`.
///
/// Units are case-insensitive. `k`, `m`, `g`, `t`, `p` are powers of 1000 and
/// `ki`, `mi`, `gi`, `ti`, `pi` powers of 1024; a trailing `b` is optional.
pub fn parse_size(value: &str) -> Result<u64, SizeParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(SizeParseError::MissingNumber(value.to_string()));
    }

    let number: u64 = digits
        .parse()
        .map_err(|_| SizeParseError::Overflow(value.to_string()))?;

    let unit_lower = unit.trim().to_ascii_lowercase();
    let unit_lower = unit_lower.strip_suffix('b').unwrap_or(&unit_lower);
    let multiplier: u64 = match unit_lower {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "g" => 1_000_000_000,
        "t" => 1_000_000_000_000,
        "p" => 1_000_000_000_000_000,
        "ki" => 1 << 10,
        "mi" => 1 << 20,
        "gi" => 1 << 30,
        "ti" => 1 << 40,
        "pi" => 1 << 50,
        _ => {
            return Err(SizeParseError::UnknownUnit {
                value: value.to_string(),
                unit: unit.to_string(),
            })
        }
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| SizeParseError::Overflow(value.to_string()))
}

/// Render a byte count with a decimal unit, e.g. `1.2 GB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
