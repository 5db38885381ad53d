//! Parses directory-listing lines into typed entries. spec.md treats this as
//! an external black box; since no such crate is assumed available, this
//! implementation supports the two grammars real FTP servers emit: Unix
//! `ls -l` style (with trailing `-> target` for symlinks) and machine-
//! readable MLSD lines.

use crate::backend::{EntryKind, MAX_LIST_LINE_LEN};
use crate::error::{ErrorKind, VfsError, VfsResult};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub kind: EntryKind,
    pub name: String,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub link_target: Option<String>,
}

pub fn parse_line(line: &str) -> VfsResult<Option<ListedEntry>> {
    if line.len() > MAX_LIST_LINE_LEN {
        return Err(VfsError::new(
            ErrorKind::FilenameTooLong,
            "listing line exceeds maximum length",
        ));
    }
    if line.is_empty() {
        return Ok(None);
    }
    if looks_like_mlsd(line) {
        parse_mlsd_line(line).map(Some)
    } else {
        parse_unix_line(line).map(Some)
    }
}

fn looks_like_mlsd(line: &str) -> bool {
    // MLSD lines are `fact=value;fact=value; name`; the Unix grammar's first
    // field is a 10-character permission string starting with a type char.
    !line.starts_with(['-', 'd', 'l', 'b', 'c', 'p', 's'])
        && line.contains('=')
        && line.contains(';')
}

fn parse_mlsd_line(line: &str) -> VfsResult<ListedEntry> {
    let (facts_part, name) = line
        .split_once(' ')
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "malformed MLSD line"))?;

    let mut kind = EntryKind::File;
    let mut size = None;
    let mut modified = None;

    for fact in facts_part.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "dir" | "cdir" | "pdir" => EntryKind::Dir,
                    "file" => EntryKind::File,
                    "os.unix=symlink" => EntryKind::Symlink,
                    _ => EntryKind::File,
                };
            }
            "size" => size = value.parse().ok(),
            "modify" => modified = parse_mlsd_time(value),
            _ => {}
        }
    }

    Ok(ListedEntry {
        kind,
        name: name.to_string(),
        size,
        modified,
        link_target: None,
    })
}

fn parse_mlsd_time(value: &str) -> Option<SystemTime> {
    // YYYYMMDDHHMMSS[.sss]
    if value.len() < 14 {
        return None;
    }
    let year: i64 = value[0..4].parse().ok()?;
    let month: u32 = value[4..6].parse().ok()?;
    let day: u32 = value[6..8].parse().ok()?;
    let hour: u32 = value[8..10].parse().ok()?;
    let min: u32 = value[10..12].parse().ok()?;
    let sec: u32 = value[12..14].parse().ok()?;
    let days_since_epoch = days_from_civil(year, month, day);
    let secs = days_since_epoch * 86400 + (hour as i64) * 3600 + (min as i64) * 60 + sec as i64;
    if secs < 0 {
        return None;
    }
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
}

/// Howard Hinnant's days-from-civil algorithm, avoiding a calendar crate
/// dependency for this one conversion.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = ((m as i64 + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn parse_unix_line(line: &str) -> VfsResult<ListedEntry> {
    let mut fields = line.splitn(9, char::is_whitespace).filter(|f| !f.is_empty());
    let perms = fields
        .next()
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "malformed listing line"))?;
    let _nlink = fields.next();
    let _owner = fields.next();
    let _group = fields.next();
    let size: Option<u64> = fields.next().and_then(|s| s.parse().ok());
    let month = fields.next();
    let day = fields.next();
    let year_or_time = fields.next();
    let rest = fields
        .next()
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "malformed listing line: missing name"))?;

    let kind = match perms.as_bytes().first() {
        Some(b'd') => EntryKind::Dir,
        Some(b'l') => EntryKind::Symlink,
        _ => EntryKind::File,
    };

    let (name, link_target) = if kind == EntryKind::Symlink {
        match rest.split_once(" -> ") {
            Some((n, t)) => (n.to_string(), Some(t.to_string())),
            None => (rest.to_string(), None),
        }
    } else {
        (rest.to_string(), None)
    };

    let modified = match (month, day, year_or_time) {
        (Some(m), Some(d), Some(t)) => parse_unix_time(m, d, t),
        _ => None,
    };

    Ok(ListedEntry {
        kind,
        name,
        size,
        modified,
        link_target,
    })
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .map(|i| i as u32 + 1)
}

fn parse_unix_time(month: &str, day: &str, year_or_time: &str) -> Option<SystemTime> {
    let month = month_number(month)?;
    let day: u32 = day.parse().ok()?;
    // `ls -l` omits the year within the last ~6 months, substituting
    // `HH:MM`; there is no reliable "current year" without a clock
    // dependency here, so a bare time is treated as year-unknown and
    // skipped rather than guessed.
    let year: i64 = year_or_time.parse().ok()?;
    let days = days_from_civil(year, month, day);
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs((days * 86400).max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_directory_line() {
        let entry = parse_line("drwxr-xr-x  2 owner group 4096 Jan 01 2024 pub")
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Dir);
        assert_eq!(entry.name, "pub");
    }

    #[test]
    fn parses_unix_symlink_with_target() {
        let entry = parse_line("lrwxrwxrwx  1 owner group 11 Jan 01 2024 current -> releases/1")
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.name, "current");
        assert_eq!(entry.link_target.as_deref(), Some("releases/1"));
    }

    #[test]
    fn parses_unix_file_line_with_size() {
        let entry = parse_line("-rw-r--r--  1 owner group 123 Jan 01 2024 readme.txt")
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(123));
    }

    #[test]
    fn parses_mlsd_file_line() {
        let entry = parse_line("type=file;size=42;modify=20240101120000; readme.txt")
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(42));
        assert!(entry.modified.is_some());
    }

    #[test]
    fn parses_mlsd_dir_line() {
        let entry = parse_line("type=dir;modify=20240101120000; pub").unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Dir);
    }

    #[test]
    fn rejects_oversized_line() {
        let line = "x".repeat(MAX_LIST_LINE_LEN + 1);
        let err = parse_line(&line).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FilenameTooLong);
    }

    #[test]
    fn empty_line_yields_none() {
        assert!(parse_line("").unwrap().is_none());
    }

    #[test]
    fn malformed_line_is_an_error_not_a_panic() {
        assert!(parse_line("garbage").is_err());
    }
}
