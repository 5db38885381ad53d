//! A single FTP control connection, plus its optional data channel.
//!
//! Mirrors the "owns a stream socket, an error slot, a feature bitmask"
//! shape the daemon uses for its byte-stream channels (see
//! [`crate::channel`]), adapted to FTP's line-oriented command/reply
//! grammar instead of the fixed binary header used there.

use super::reply::{self, Features, FtpReply, PassFlags};
use crate::error::{ErrorKind, VfsError, VfsResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Characters an FTP path segment must not contain; anything outside this
/// set is otherwise passed through unescaped, per spec's path-escaping rule.
const FORBIDDEN_PATH_CHARS: [char; 3] = ['/', '\r', '\n'];

#[derive(Debug)]
pub struct Connection {
    io: BufStream<TcpStream>,
    pub features: Features,
    /// Set once a command fails; further commands on this connection are
    /// refused until the holder clears it by consuming the error via
    /// [`Connection::take_error`].
    error: Option<VfsError>,
    host: String,
    port: u16,
}

impl Connection {
    pub async fn connect(host: &str, port: u16) -> VfsResult<Connection> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            VfsError::with_cause(ErrorKind::HostNotFound, format!("connect to {host}:{port}"), e)
        })?;
        let mut conn = Connection {
            io: BufStream::new(stream),
            features: Features::NONE,
            error: None,
            host: host.to_string(),
            port,
        };
        conn.read_reply().await?; // greeting
        Ok(conn)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn take_error(&mut self) -> Option<VfsError> {
        self.error.take()
    }

    async fn send_line(&mut self, line: &str) -> VfsResult<()> {
        self.io.write_all(line.as_bytes()).await?;
        self.io.write_all(b"\r\n").await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Reads one complete multi-line reply; a line starting `NNN-` begins a
    /// continuation that ends at a line starting `NNN ` with the same code.
    pub async fn read_reply(&mut self) -> VfsResult<FtpReply> {
        let mut lines = Vec::new();
        let mut code_prefix: Option<String> = None;
        loop {
            let mut raw = String::new();
            let n = self.io.read_line(&mut raw).await?;
            if n == 0 {
                let err = VfsError::new(ErrorKind::Closed, "control connection closed by peer");
                self.error = Some(VfsError::new(err.kind, err.message.clone()));
                return Err(err);
            }
            let line = raw.trim_end_matches(['\r', '\n']).to_string();
            match &code_prefix {
                None => {
                    if line.len() >= 4 && line.as_bytes()[3] == b'-' {
                        code_prefix = Some(line[0..3].to_string());
                        lines.push(line);
                        continue;
                    }
                    lines.push(line);
                    break;
                }
                Some(prefix) => {
                    lines.push(line.clone());
                    if line.starts_with(prefix.as_str()) && line.as_bytes().get(3) == Some(&b' ') {
                        break;
                    }
                }
            }
        }
        reply::parse_reply(&lines)
    }

    /// Sends `cmd` and reads the reply, applying `flags`'s accept/reject
    /// policy. On rejection the connection's error slot is set (poisoning
    /// further commands until the caller consumes it) and the classified
    /// error is returned.
    pub async fn command(&mut self, cmd: &str, flags: PassFlags) -> VfsResult<FtpReply> {
        if let Some(err) = &self.error {
            return Err(VfsError::new(err.kind, err.message.clone()));
        }
        self.send_line(cmd).await?;
        let reply = self.read_reply().await?;
        match reply::classify(&reply, flags) {
            Ok(()) => Ok(reply),
            Err(err) => {
                self.error = Some(VfsError::new(err.kind, err.message.clone()));
                Err(err)
            }
        }
    }

    pub async fn login(&mut self, user: &str, password: Option<&str>) -> VfsResult<()> {
        self.command(&format!("USER {user}"), PassFlags::PASS_300)
            .await?;
        if let Some(password) = password {
            self.command(&format!("PASS {password}"), PassFlags::NONE)
                .await?;
        }
        Ok(())
    }

    pub async fn negotiate_features(&mut self) -> VfsResult<()> {
        self.command("TYPE I", PassFlags::NONE).await?;
        let feat = self.command("FEAT", PassFlags::PASS_500).await;
        if let Ok(feat) = feat {
            let mut features = Features::NONE;
            for line in &feat.lines {
                let upper = line.to_ascii_uppercase();
                if upper.contains("MDTM") {
                    features.insert(Features::MDTM);
                }
                if upper.contains("SIZE") {
                    features.insert(Features::SIZE);
                }
                if upper.contains("TVFS") || upper.contains("MLST") {
                    features.insert(Features::TVFS);
                }
                if upper.contains("EPSV") {
                    features.insert(Features::EPSV);
                }
            }
            self.features = features;
            if self.features.contains(Features::EPSV) {
                let _ = self.command("EPSV ALL", PassFlags::PASS_500).await;
            }
        }
        Ok(())
    }

    /// Opens a data connection via EPSV, falling back to PASV on a 5xx reply
    /// (and remembering the downgrade for subsequent calls).
    pub async fn open_data_connection(&mut self) -> VfsResult<TcpStream> {
        if self.features.contains(Features::EPSV) {
            match self.command("EPSV", PassFlags::NONE).await {
                Ok(reply) => {
                    let port = parse_epsv_port(&reply.text())?;
                    return TcpStream::connect((self.host.as_str(), port))
                        .await
                        .map_err(VfsError::from);
                }
                Err(err) if err.kind == ErrorKind::NotSupported || err.kind == ErrorKind::Failed => {
                    self.features = Features::NONE;
                }
                Err(err) => return Err(err),
            }
        }
        let reply = self.command("PASV", PassFlags::NONE).await?;
        let (addr, port) = parse_pasv_addr(&reply.text())?;
        TcpStream::connect((addr.as_str(), port))
            .await
            .map_err(VfsError::from)
    }

    pub async fn quit(&mut self) {
        let _ = self.send_line("QUIT").await;
        let _ = self.read_reply().await;
    }
}

fn parse_epsv_port(text: &str) -> VfsResult<u16> {
    // "229 Entering Extended Passive Mode (|||60817|)"
    let start = text
        .find("(|||")
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "malformed EPSV reply"))?;
    let rest = &text[start + 4..];
    let end = rest
        .find('|')
        .ok_or_else(|| VfsError::new(ErrorKind::Failed, "malformed EPSV reply"))?;
    rest[..end]
        .parse()
        .map_err(|_| VfsError::new(ErrorKind::Failed, "malformed EPSV port"))
}

fn parse_pasv_addr(text: &str) -> VfsResult<(String, u16)> {
    // "227 Entering Passive Mode (10,0,0,5,20,30)"
    let digits: Vec<u32> = text
        .chars()
        .collect::<String>()
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    // The six octets we want are the last six numbers emitted, since reply
    // text may contain a leading code and incidental digits.
    if digits.len() < 6 {
        return Err(VfsError::new(ErrorKind::Failed, "malformed PASV reply"));
    }
    let six = &digits[digits.len() - 6..];
    let addr = format!("{}.{}.{}.{}", six[0], six[1], six[2], six[3]);
    let port = (six[4] * 256 + six[5]) as u16;
    Ok((addr, port))
}

/// Escapes a path component for use in an FTP command, rejecting the
/// characters the grammar cannot carry.
pub fn escape_path(path: &str) -> VfsResult<String> {
    if path.contains(FORBIDDEN_PATH_CHARS) {
        return Err(VfsError::new(
            ErrorKind::InvalidFilename,
            "path contains '/', CR, or LF in a filename segment",
        ));
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epsv_port() {
        let port = parse_epsv_port("229 Entering Extended Passive Mode (|||60817|)").unwrap();
        assert_eq!(port, 60817);
    }

    #[test]
    fn parses_pasv_address_and_port() {
        let (addr, port) =
            parse_pasv_addr("227 Entering Passive Mode (10,0,0,5,20,30)").unwrap();
        assert_eq!(addr, "10.0.0.5");
        assert_eq!(port, 20 * 256 + 30);
    }

    #[test]
    fn escape_path_rejects_forbidden_chars() {
        assert!(escape_path("a/b").is_err());
        assert!(escape_path("a\r\n").is_err());
        assert!(escape_path("normal-name.txt").is_ok());
    }

    #[test]
    fn malformed_epsv_reply_is_rejected() {
        assert!(parse_epsv_port("229 nonsense").is_err());
    }

    #[test]
    fn malformed_pasv_reply_is_rejected() {
        assert!(parse_pasv_addr("227 nonsense").is_err());
    }
}
