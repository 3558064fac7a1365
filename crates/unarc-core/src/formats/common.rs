//! Helpers shared between format codecs.
//!
//! - Timestamp conversion into Windows FILETIME ticks, the one time unit every
//!   codec reports
//! - [`PayloadCrc`]: running CRC-32 check over sequentially read payloads

use std::time::Duration;
use std::time::SystemTime;

/// FILETIME ticks between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// FILETIME ticks per second (one tick is 100 ns).
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts Unix seconds into FILETIME ticks.
pub fn filetime_from_unix(secs: u64) -> u64 {
    secs.saturating_mul(TICKS_PER_SECOND)
        .saturating_add(FILETIME_UNIX_EPOCH)
}

/// Converts an MS-DOS date/time pair into FILETIME ticks.
///
/// DOS timestamps carry no zone; they are read as UTC. Returns 0 for
/// timestamps with a zero month or day.
pub fn filetime_from_dos(date: u16, time: u16) -> u64 {
    let year = 1980 + u64::from(date >> 9);
    let month = u64::from((date >> 5) & 0x0F);
    let day = u64::from(date & 0x1F);
    if month == 0 || month > 12 || day == 0 {
        return 0;
    }

    let hour = u64::from(time >> 11);
    let minute = u64::from((time >> 5) & 0x3F);
    let second = u64::from(time & 0x1F) * 2;

    let days = days_since_unix_epoch(year, month, day);
    filetime_from_unix(days * 86_400 + hour * 3_600 + minute * 60 + second)
}

/// Converts FILETIME ticks into a `SystemTime`.
///
/// Returns `None` for 0 (not recorded) and for instants the platform
/// cannot represent.
pub fn system_time_from_filetime(filetime: u64) -> Option<SystemTime> {
    if filetime == 0 {
        return None;
    }
    if filetime >= FILETIME_UNIX_EPOCH {
        let ticks = filetime - FILETIME_UNIX_EPOCH;
        SystemTime::UNIX_EPOCH.checked_add(ticks_to_duration(ticks))
    } else {
        let ticks = FILETIME_UNIX_EPOCH - filetime;
        SystemTime::UNIX_EPOCH.checked_sub(ticks_to_duration(ticks))
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    let secs = ticks / TICKS_PER_SECOND;
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (ticks % TICKS_PER_SECOND) as u32 * 100;
    Duration::new(secs, nanos)
}

/// Days from 1970-01-01 to the given civil date, for years >= 1970.
fn days_since_unix_epoch(year: u64, month: u64, day: u64) -> u64 {
    // Shift the year so it starts in March; leap days then fall at year end.
    let (y, m) = if month <= 2 {
        (year - 1, month + 9)
    } else {
        (year, month - 3)
    };
    let era = y / 400;
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Running CRC-32 over a payload that is read front to back.
#[derive(Debug, Clone, Default)]
pub struct PayloadCrc {
    hasher: crc32fast::Hasher,
}

impl PayloadCrc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns `true` if the bytes seen so far hash to `expected`.
    pub fn matches(&self, expected: u32) -> bool {
        self.hasher.clone().finalize() == expected
    }
}
