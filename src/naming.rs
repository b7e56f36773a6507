use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike};
use std::fmt;

/// `strftime` layout of the timestamp part of a chunk name
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";

/// Width of a rendered timestamp (`YYYY-MM-DD_HH_MM_SS`)
const TIMESTAMP_WIDTH: usize = 19;

/// A chunk file name, `YYYY-MM-DD_HH_MM_SS.<ext>`, with its decoded capture time.
///
/// Ordering is by capture time first and file name second, so sorting a set of
/// chunk names yields oldest-first regardless of how the names compare as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkName {
    captured_at: NaiveDateTime,
    file_name: String,
}

impl ChunkName {
    /// Build the name for a chunk captured at `at`
    pub fn for_capture<Tz: TimeZone>(at: &DateTime<Tz>, extension: &str) -> Self {
        let naive = at.naive_local();
        // names carry whole seconds only
        let captured_at = naive.with_nanosecond(0).unwrap_or(naive);
        let file_name = format!(
            "{}.{}",
            captured_at.format(TIMESTAMP_FORMAT),
            normalize_extension(extension)
        );
        Self {
            captured_at,
            file_name,
        }
    }

    /// Name for a chunk starting now, in local time
    pub fn now(extension: &str) -> Self {
        Self::for_capture(&Local::now(), extension)
    }

    /// Parse a directory entry name.
    ///
    /// Returns `None` unless the name is exactly a fixed-width timestamp followed
    /// by `.` and `extension` (compared case-insensitively).
    pub fn parse(file_name: &str, extension: &str) -> Option<Self> {
        let stem = file_name.get(..TIMESTAMP_WIDTH)?;
        let ext = file_name.get(TIMESTAMP_WIDTH..)?.strip_prefix('.')?;
        if !ext.eq_ignore_ascii_case(normalize_extension(extension)) || !stem.is_ascii() {
            return None;
        }

        // chrono accepts short numeric fields, so pin every digit position first
        let digits_in_place = stem.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            10 | 13 | 16 => b == b'_',
            _ => b.is_ascii_digit(),
        });
        if !digits_in_place {
            return None;
        }

        let captured_at = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            captured_at,
            file_name: file_name.to_string(),
        })
    }

    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Strip a leading dot so `.mp4` and `mp4` configure the same extension
pub fn normalize_extension(extension: &str) -> &str {
    extension.strip_prefix('.').unwrap_or(extension)
}
