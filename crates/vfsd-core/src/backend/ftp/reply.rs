//! FTP control-connection reply grammar: multi-line reply parsing and the
//! code-to-error-kind mapping table.

use crate::error::{ErrorKind, VfsError, VfsResult};

/// Features advertised by the server's `FEAT` response, consulted before
/// issuing commands that not every server supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(u8);

impl Features {
    pub const NONE: Features = Features(0);
    pub const MDTM: Features = Features(0b0001);
    pub const SIZE: Features = Features(0b0010);
    pub const TVFS: Features = Features(0b0100);
    pub const EPSV: Features = Features(0b1000);

    pub fn contains(&self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Features) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassFlags(u8);

impl PassFlags {
    pub const NONE: PassFlags = PassFlags(0);
    pub const PASS_100: PassFlags = PassFlags(1 << 0);
    pub const PASS_300: PassFlags = PassFlags(1 << 1);
    pub const PASS_400: PassFlags = PassFlags(1 << 2);
    pub const PASS_500: PassFlags = PassFlags(1 << 3);
    pub const FAIL_200: PassFlags = PassFlags(1 << 4);

    pub fn contains(&self, other: PassFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PassFlags {
    type Output = PassFlags;
    fn bitor(self, rhs: PassFlags) -> PassFlags {
        PassFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct FtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpReply {
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    pub fn group(&self) -> u16 {
        self.code / 100
    }
}

/// Parses one complete multi-line FTP reply out of `buf`, consuming the
/// bytes it used. A reply is one or more `\r\n`-terminated lines; any line
/// but the last begins `NNN-`, the last begins `NNN ` with the same code.
/// The first three bytes of the first line must be ASCII digits whose first
/// digit is 1-5; violating that is reported as `Failed`, matching the
/// "invalid reply" boundary behavior.
pub fn parse_reply(lines: &[String]) -> VfsResult<FtpReply> {
    let first = lines
        .first()
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "empty reply"))?;
    if first.len() < 4 {
        return Err(VfsError::new(ErrorKind::Failed, "invalid reply: too short"));
    }
    let code_str = &first[0..3];
    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VfsError::new(ErrorKind::Failed, "invalid reply: non-numeric code"));
    }
    let first_digit = code_str.as_bytes()[0] - b'0';
    if !(1..=5).contains(&first_digit) {
        return Err(VfsError::new(
            ErrorKind::Failed,
            "invalid reply: code out of range",
        ));
    }
    let code: u16 = code_str.parse().unwrap();
    Ok(FtpReply {
        code,
        lines: lines.to_vec(),
    })
}

/// Applies the default accept/reject policy for a reply's 1xx/2xx/3xx/4xx/5xx
/// group, honoring the caller's opt-in flags, and maps rejected replies to
/// an error kind via [`code_to_kind`].
pub fn classify(reply: &FtpReply, flags: PassFlags) -> VfsResult<()> {
    let group = reply.group();
    let accepted = match group {
        1 => flags.contains(PassFlags::PASS_100),
        2 => !flags.contains(PassFlags::FAIL_200),
        3 => flags.contains(PassFlags::PASS_300),
        4 => flags.contains(PassFlags::PASS_400),
        5 => flags.contains(PassFlags::PASS_500),
        _ => false,
    };
    if accepted {
        Ok(())
    } else if group == 2 {
        Err(VfsError::new(ErrorKind::Failed, "unexpected success reply"))
    } else {
        Err(code_to_error(reply.code, &reply.text()))
    }
}

/// Maps an FTP reply code to the daemon's error-kind space.
pub fn code_to_kind(code: u16) -> ErrorKind {
    match code {
        332 | 532 => ErrorKind::NotSupported,
        421 => ErrorKind::Failed,
        425 | 426 => ErrorKind::Closed,
        450 | 550 => ErrorKind::NotFound,
        452 | 552 => ErrorKind::NoSpace,
        500..=504 => ErrorKind::NotSupported,
        530 => ErrorKind::PermissionDenied,
        553 => ErrorKind::InvalidFilename,
        c if (400..500).contains(&c) || (500..600).contains(&c) => ErrorKind::Failed,
        _ => ErrorKind::Failed,
    }
}

fn code_to_error(code: u16, message: &str) -> VfsError {
    VfsError::new(code_to_kind(code), message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_reply() {
        let reply = parse_reply(&["220 ready".to_string()]).unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.group(), 2);
    }

    #[test]
    fn parses_multi_line_reply_joining_text() {
        let lines = vec![
            "211-Features:".to_string(),
            " MDTM".to_string(),
            " SIZE".to_string(),
            "211 End".to_string(),
        ];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, 211);
        assert!(reply.text().contains("MDTM"));
    }

    #[test]
    fn rejects_non_digit_code() {
        let err = parse_reply(&["abc bad".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Failed);
    }

    #[test]
    fn rejects_out_of_range_first_digit() {
        let err = parse_reply(&["999 nope".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Failed);
    }

    #[test]
    fn classify_2xx_succeeds_by_default() {
        let reply = parse_reply(&["226 transfer complete".to_string()]).unwrap();
        assert!(classify(&reply, PassFlags::NONE).is_ok());
    }

    #[test]
    fn classify_5xx_fails_by_default_with_mapped_kind() {
        let reply = parse_reply(&["550 no such file".to_string()]).unwrap();
        let err = classify(&reply, PassFlags::NONE).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn classify_1xx_passes_when_opted_in() {
        let reply = parse_reply(&["150 opening data connection".to_string()]).unwrap();
        assert!(classify(&reply, PassFlags::PASS_100).is_ok());
    }

    #[test]
    fn classify_2xx_rejected_with_fail_200() {
        let reply = parse_reply(&["226 transfer complete".to_string()]).unwrap();
        let err = classify(&reply, PassFlags::FAIL_200).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Failed);
    }

    #[test]
    fn code_to_kind_matches_spec_table() {
        assert_eq!(code_to_kind(530), ErrorKind::PermissionDenied);
        assert_eq!(code_to_kind(553), ErrorKind::InvalidFilename);
        assert_eq!(code_to_kind(452), ErrorKind::NoSpace);
        assert_eq!(code_to_kind(425), ErrorKind::Closed);
        assert_eq!(code_to_kind(332), ErrorKind::NotSupported);
    }
}
