//! The per-open-file byte-stream protocol.
//!
//! Every request and reply is a fixed 16-byte big-endian header
//! (`op`, `seq_nr`, `arg1`, `arg2`) optionally followed by a payload whose
//! length is carried in `arg1`. This mirrors the length-prefixed framing
//! idiom used for other RPC transports in this codebase, but the header
//! here is fixed-size and interpreted positionally rather than as a map,
//! keeping the hot byte-transfer path free of a serialization library.

use crate::error::{ErrorKind, VfsError, VfsResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 16;

/// Error domain stamped on every ERROR reply this daemon emits. A single
/// fixed domain is enough since `vfsd` is the only producer of `VfsError`;
/// multi-domain peers would pick their own string per `ErrorKind` source.
pub const ERROR_DOMAIN: &str = "vfsd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    Read,
    Close,
    Cancel,
    Write,
    SeekCur,
    SeekSet,
    SeekEnd,
}

impl RequestOp {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => RequestOp::Read,
            2 => RequestOp::Close,
            3 => RequestOp::Cancel,
            4 => RequestOp::Write,
            5 => RequestOp::SeekCur,
            6 => RequestOp::SeekSet,
            7 => RequestOp::SeekEnd,
            _ => return None,
        })
    }

    fn to_u32(self) -> u32 {
        match self {
            RequestOp::Read => 1,
            RequestOp::Close => 2,
            RequestOp::Cancel => 3,
            RequestOp::Write => 4,
            RequestOp::SeekCur => 5,
            RequestOp::SeekSet => 6,
            RequestOp::SeekEnd => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOp {
    Data,
    Written,
    SeekPos,
    Closed,
    Error,
}

impl ReplyOp {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            100 => ReplyOp::Data,
            101 => ReplyOp::Written,
            102 => ReplyOp::SeekPos,
            103 => ReplyOp::Closed,
            104 => ReplyOp::Error,
            _ => return None,
        })
    }

    fn to_u32(self) -> u32 {
        match self {
            ReplyOp::Data => 100,
            ReplyOp::Written => 101,
            ReplyOp::SeekPos => 102,
            ReplyOp::Closed => 103,
            ReplyOp::Error => 104,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub op: RequestOp,
    pub seq_nr: u32,
    pub arg1: u32,
    pub arg2: u32,
    pub payload: Vec<u8>,
}

impl Request {
    /// Offset encoded across `arg1`/`arg2` for seek requests: low 32 bits in
    /// `arg1`, high 32 bits in `arg2`.
    pub fn seek_offset(&self) -> i64 {
        ((self.arg2 as u64) << 32 | self.arg1 as u64) as i64
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Data(u32, Vec<u8>),
    Written(u32, u32),
    SeekPos(u32, u64),
    Closed(u32),
    Error(u32, ErrorKind, String),
}

impl Reply {
    pub fn seq_nr(&self) -> u32 {
        match self {
            Reply::Data(s, _)
            | Reply::Written(s, _)
            | Reply::SeekPos(s, _)
            | Reply::Closed(s)
            | Reply::Error(s, _, _) => *s,
        }
    }
}

fn kind_to_code(kind: ErrorKind) -> u32 {
    match kind {
        ErrorKind::NotFound => 1,
        ErrorKind::IsDirectory => 2,
        ErrorKind::NotDirectory => 3,
        ErrorKind::NotSupported => 4,
        ErrorKind::PermissionDenied => 5,
        ErrorKind::InvalidFilename => 6,
        ErrorKind::InvalidArgument => 7,
        ErrorKind::NoSpace => 8,
        ErrorKind::Cancelled => 9,
        ErrorKind::Failed => 10,
        ErrorKind::Closed => 11,
        ErrorKind::FilenameTooLong => 12,
        ErrorKind::CantCreateBackup => 13,
        ErrorKind::HostNotFound => 14,
        ErrorKind::NotMountableFile => 15,
    }
}

fn code_to_kind(code: u32) -> ErrorKind {
    match code {
        1 => ErrorKind::NotFound,
        2 => ErrorKind::IsDirectory,
        3 => ErrorKind::NotDirectory,
        4 => ErrorKind::NotSupported,
        5 => ErrorKind::PermissionDenied,
        6 => ErrorKind::InvalidFilename,
        7 => ErrorKind::InvalidArgument,
        8 => ErrorKind::NoSpace,
        9 => ErrorKind::Cancelled,
        10 => ErrorKind::Failed,
        11 => ErrorKind::Closed,
        12 => ErrorKind::FilenameTooLong,
        13 => ErrorKind::CantCreateBackup,
        14 => ErrorKind::HostNotFound,
        _ => ErrorKind::NotMountableFile,
    }
}

pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> VfsResult<Request> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let op_raw = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let seq_nr = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let arg1 = u32::from_be_bytes(header[8..12].try_into().unwrap());
    let arg2 = u32::from_be_bytes(header[12..16].try_into().unwrap());
    let op = RequestOp::from_u32(op_raw)
        .ok_or_else(|| VfsError::new(ErrorKind::InvalidArgument, "unknown request op"))?;

    let payload = if op == RequestOp::Write {
        let mut buf = vec![0u8; arg1 as usize];
        reader.read_exact(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };

    Ok(Request {
        op,
        seq_nr,
        arg1,
        arg2,
        payload,
    })
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
) -> VfsResult<()> {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&request.op.to_u32().to_be_bytes());
    header[4..8].copy_from_slice(&request.seq_nr.to_be_bytes());
    header[8..12].copy_from_slice(&request.arg1.to_be_bytes());
    header[12..16].copy_from_slice(&request.arg2.to_be_bytes());
    writer.write_all(&header).await?;
    if request.op == RequestOp::Write {
        writer.write_all(&request.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> VfsResult<()> {
    let (op, arg1, arg2, payload): (ReplyOp, u32, u32, Vec<u8>) = match reply {
        Reply::Data(_, data) => (ReplyOp::Data, data.len() as u32, 0, data.clone()),
        Reply::Written(_, n) => (ReplyOp::Written, *n, 0, Vec::new()),
        Reply::SeekPos(_, pos) => (
            ReplyOp::SeekPos,
            (*pos & 0xffff_ffff) as u32,
            (*pos >> 32) as u32,
            Vec::new(),
        ),
        Reply::Closed(_) => (ReplyOp::Closed, 0, 0, Vec::new()),
        Reply::Error(_, kind, message) => {
            let mut buf = Vec::new();
            buf.extend_from_slice(ERROR_DOMAIN.as_bytes());
            buf.push(0);
            buf.extend_from_slice(message.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&kind_to_code(*kind).to_be_bytes());
            (ReplyOp::Error, buf.len() as u32, 0, buf)
        }
    };

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&op.to_u32().to_be_bytes());
    header[4..8].copy_from_slice(&reply.seq_nr().to_be_bytes());
    header[8..12].copy_from_slice(&arg1.to_be_bytes());
    header[12..16].copy_from_slice(&arg2.to_be_bytes());
    writer.write_all(&header).await?;
    if !payload.is_empty() {
        writer.write_all(&payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn read_reply<R: AsyncRead + Unpin>(reader: &mut R) -> VfsResult<Reply> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let op_raw = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let seq_nr = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let arg1 = u32::from_be_bytes(header[8..12].try_into().unwrap());
    let arg2 = u32::from_be_bytes(header[12..16].try_into().unwrap());
    let op = ReplyOp::from_u32(op_raw)
        .ok_or_else(|| VfsError::new(ErrorKind::InvalidArgument, "unknown reply op"))?;

    Ok(match op {
        ReplyOp::Data => {
            let mut buf = vec![0u8; arg1 as usize];
            reader.read_exact(&mut buf).await?;
            Reply::Data(seq_nr, buf)
        }
        ReplyOp::Written => Reply::Written(seq_nr, arg1),
        ReplyOp::SeekPos => Reply::SeekPos(seq_nr, (arg2 as u64) << 32 | arg1 as u64),
        ReplyOp::Closed => Reply::Closed(seq_nr),
        ReplyOp::Error => {
            let mut buf = vec![0u8; arg1 as usize];
            reader.read_exact(&mut buf).await?;
            let domain_end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
            let message_start = (domain_end + 1).min(buf.len());
            let message_rest = &buf[message_start..];
            let message_end = message_rest
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(message_rest.len());
            let message = String::from_utf8_lossy(&message_rest[..message_end]).into_owned();
            let code_start = (message_start + message_end + 1).min(buf.len());
            let code_bytes = &buf[code_start..];
            let mut code = [0u8; 4];
            let n = code_bytes.len().min(4);
            code[..n].copy_from_slice(&code_bytes[..n]);
            Reply::Error(seq_nr, code_to_kind(u32::from_be_bytes(code)), message)
        }
    })
}

/// Per-channel sequencing state: enforces that each request's `seq_nr` is
/// strictly greater than the last one accepted, as required for the
/// "new request cancels anything at or below `seq_nr - 1`" rule.
#[derive(Debug, Default)]
pub struct SeqTracker {
    current: u32,
}

impl SeqTracker {
    pub fn new() -> Self {
        SeqTracker { current: 0 }
    }

    /// Returns `true` the first time `seq_nr` is observed (and records it as
    /// current); a repeated or out-of-order `seq_nr` returns `false`.
    pub fn accept(&mut self, seq_nr: u32) -> bool {
        if self.current != 0 && seq_nr <= self.current {
            return false;
        }
        self.current = seq_nr;
        true
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_write_request() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RequestOp::Write.to_u32().to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(buf);
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.op, RequestOp::Write);
        assert_eq!(req.seq_nr, 7);
        assert_eq!(req.payload, b"abc");
    }

    #[tokio::test]
    async fn write_request_round_trips_through_read_request() {
        let mut buf = Vec::new();
        let request = Request {
            op: RequestOp::Write,
            seq_nr: 3,
            arg1: 5,
            arg2: 0,
            payload: b"abcde".to_vec(),
        };
        write_request(&mut buf, &request).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_request(&mut cursor).await.unwrap();
        assert_eq!(read_back.seq_nr, 3);
        assert_eq!(read_back.payload, b"abcde");
    }

    #[tokio::test]
    async fn round_trip_data_reply() {
        let mut buf = Vec::new();
        write_reply(&mut buf, &Reply::Data(4, b"hello".to_vec()))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let reply = read_reply(&mut cursor).await.unwrap();
        match reply {
            Reply::Data(seq, data) => {
                assert_eq!(seq, 4);
                assert_eq!(data, b"hello");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn error_reply_wire_format_carries_domain_message_and_code() {
        let mut buf = Vec::new();
        write_reply(
            &mut buf,
            &Reply::Error(9, ErrorKind::Cancelled, "aborted".into()),
        )
        .await
        .unwrap();
        let arg1 = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let arg2 = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let payload = &buf[HEADER_LEN..];
        assert_eq!(arg1 as usize, payload.len());
        assert_eq!(arg2, 0);
        assert_eq!(&payload[..5], b"vfsd\0");
        assert_eq!(&payload[5..13], b"aborted\0");
        let code = u32::from_be_bytes(payload[13..17].try_into().unwrap());
        assert_eq!(code, kind_to_code(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn round_trip_error_reply_preserves_kind_and_message() {
        let mut buf = Vec::new();
        write_reply(
            &mut buf,
            &Reply::Error(9, ErrorKind::Cancelled, "aborted".into()),
        )
        .await
        .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let reply = read_reply(&mut cursor).await.unwrap();
        match reply {
            Reply::Error(seq, kind, msg) => {
                assert_eq!(seq, 9);
                assert_eq!(kind, ErrorKind::Cancelled);
                assert_eq!(msg, "aborted");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn seek_pos_round_trips_64_bit_offset() {
        let mut buf = Vec::new();
        let big = (1u64 << 40) + 17;
        write_reply(&mut buf, &Reply::SeekPos(1, big)).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        match read_reply(&mut cursor).await.unwrap() {
            Reply::SeekPos(_, pos) => assert_eq!(pos, big),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn seq_tracker_rejects_non_increasing_sequence() {
        let mut tracker = SeqTracker::new();
        assert!(tracker.accept(1));
        assert!(tracker.accept(2));
        assert!(!tracker.accept(2));
        assert!(!tracker.accept(1));
        assert!(tracker.accept(5));
    }

    #[test]
    fn seek_offset_reassembles_signed_64_bit_value() {
        let req = Request {
            op: RequestOp::SeekSet,
            seq_nr: 1,
            arg1: 100,
            arg2: 0,
            payload: Vec::new(),
        };
        assert_eq!(req.seek_offset(), 100);
    }
}
