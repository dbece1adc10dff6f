//! The entry model: the common currency between parsers and the tree builder.

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Metadata for one file or directory inside an archive.
///
/// Every parser produces these; [`build_tree`] consumes them.
///
/// [`build_tree`]: ../tree/fn.build_tree.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Slash-separated path. Directory entries carry a trailing `/`.
    pub path: Utf8PathBuf,

    /// True if the entry is a directory.
    pub is_dir: bool,

    /// Uncompressed size of the entry in bytes; 0 for directories.
    pub size: u64,

    /// Last modification time, when the source format encodes one.
    pub modified: Option<NaiveDateTime>,
}

impl ArchiveEntry {
    /// Builds an entry, normalizing directory paths to end in `/`.
    ///
    /// Returns `None` for empty paths and macOS metadata sidecars
    /// (`__MACOSX/`, `._`-prefixed components), which are filtered at
    /// parse time rather than later.
    pub fn new(
        path: impl Into<String>,
        is_dir: bool,
        size: u64,
        modified: Option<NaiveDateTime>,
    ) -> Option<Self> {
        let mut path = path.into();
        if is_metadata_path(&path) {
            return None;
        }
        if is_dir && !path.ends_with('/') {
            path.push('/');
        }
        Some(Self {
            path: Utf8PathBuf::from(path),
            is_dir,
            size: if is_dir { 0 } else { size },
            modified,
        })
    }
}

/// True for paths that are metadata sidecars rather than real content:
/// empty names, anything under `__MACOSX/`, and any path with a
/// `._`-prefixed component (resource-fork shadow files).
pub(crate) fn is_metadata_path(path: &str) -> bool {
    if path.is_empty() {
        return true;
    }
    if path == "__MACOSX" || path.starts_with("__MACOSX/") {
        return true;
    }
    path.split('/').any(|component| component.starts_with("._"))
}

/// Decodes an MS-DOS packed date/time pair, shared by Zip and RAR v4.
///
/// 5-bit day, 4-bit month, 7-bit year since 1980;
/// 5-bit hour, 6-bit minute, 5-bit half-seconds.
/// An all-zero or otherwise invalid date decodes to `None`.
pub(crate) fn dos_datetime(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = ((0b0000_0111_1110_0000 & time) >> 5) as u32;
    let hours = ((0b1111_1000_0000_0000 & time) >> 11) as u32;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = ((0b0000_0001_1110_0000 & date) >> 5) as u32;
    // MSDOS uses years since 1980; always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Decodes RAR v4's packed form: high 16 bits date, low 16 bits time.
pub(crate) fn dos_datetime_packed(stamp: u32) -> Option<NaiveDateTime> {
    dos_datetime(stamp as u16, (stamp >> 16) as u16)
}

/// Interprets seconds since the Unix epoch; zero means "no date."
pub(crate) fn unix_datetime(secs: i64) -> Option<NaiveDateTime> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dos_epoch() {
        // Day 1, month 1, year 1980, midnight.
        let date = (1 << 5) | 1;
        let decoded = dos_datetime(0, date).unwrap();
        assert_eq!(
            decoded,
            NaiveDate::from_ymd_opt(1980, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn dos_zero_is_no_date() {
        assert_eq!(dos_datetime(0, 0), None);
        assert_eq!(dos_datetime_packed(0), None);
    }

    #[test]
    fn unix_zero_is_no_date() {
        assert_eq!(unix_datetime(0), None);
        assert!(unix_datetime(1_600_000_000).is_some());
    }

    #[test]
    fn metadata_paths_are_filtered() {
        assert!(ArchiveEntry::new("", false, 0, None).is_none());
        assert!(ArchiveEntry::new("__MACOSX/resource", false, 4, None).is_none());
        assert!(ArchiveEntry::new("__MACOSX/", true, 0, None).is_none());
        assert!(ArchiveEntry::new("._hidden", false, 4, None).is_none());
        assert!(ArchiveEntry::new("dir/._shadow", false, 4, None).is_none());
        assert!(ArchiveEntry::new("dir/file.txt", false, 4, None).is_some());
    }

    #[test]
    fn directories_are_normalized() {
        let dir = ArchiveEntry::new("some/dir", true, 42, None).unwrap();
        assert_eq!(dir.path.as_str(), "some/dir/");
        assert_eq!(dir.size, 0);

        let already = ArchiveEntry::new("other/", true, 0, None).unwrap();
        assert_eq!(already.path.as_str(), "other/");
    }
}
