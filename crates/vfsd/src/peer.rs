//! Peer-to-peer sockets: the primary unix-domain socket clients connect to
//! after `GetConnection`, and the auxiliary socket used solely to hand a
//! client a single channel file descriptor via `SCM_RIGHTS`.

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use rand::Rng;
use std::io::IoSlice;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Picks (and creates, mode 0700) the private directory this process's peer
/// sockets live under: `<tmp>/vfsd-<user>-<8 random chars>/`.
pub fn socket_dir(override_dir: Option<&str>) -> std::io::Result<PathBuf> {
    if let Some(dir) = override_dir {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path)?;
        set_private(&path)?;
        return Ok(path);
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let dir = std::env::temp_dir().join(format!("vfsd-{user}-{}", random_suffix(8)));
    std::fs::create_dir_all(&dir)?;
    set_private(&dir)?;
    Ok(dir)
}

#[cfg(unix)]
fn set_private(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_private(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub struct PeerAddresses {
    pub primary: PathBuf,
    pub aux: PathBuf,
}

/// Binds the primary and auxiliary listeners under `dir`, naming them
/// `socket1` and `socket2`.
pub fn bind(dir: &Path) -> std::io::Result<(UnixListener, UnixListener, PeerAddresses)> {
    let primary_path = dir.join("socket1");
    let aux_path = dir.join("socket2");
    let _ = std::fs::remove_file(&primary_path);
    let _ = std::fs::remove_file(&aux_path);
    let primary = UnixListener::bind(&primary_path)?;
    let aux = UnixListener::bind(&aux_path)?;
    Ok((
        primary,
        aux,
        PeerAddresses {
            primary: primary_path,
            aux: aux_path,
        },
    ))
}

/// Sends a single file descriptor to the peer connected on `aux` via
/// `SCM_RIGHTS`. This is the aux socket's only use: handing over the other
/// end of a freshly created channel socketpair.
pub fn send_channel_fd(aux: &UnixStream, fd: impl AsRawFd) -> std::io::Result<()> {
    let raw = fd.as_raw_fd();
    let fds = [raw];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    let iov = [IoSlice::new(b"x")];
    sendmsg::<()>(aux.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_dir_with_override_is_created_and_private() {
        let base = tempfile::tempdir().unwrap();
        let custom = base.path().join("custom-sockets");
        let dir = socket_dir(Some(custom.to_str().unwrap())).unwrap();
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn random_suffix_has_requested_length() {
        assert_eq!(random_suffix(8).len(), 8);
    }

    #[tokio::test]
    async fn bind_creates_both_sockets() {
        let base = tempfile::tempdir().unwrap();
        let (_primary, _aux, addrs) = bind(base.path()).unwrap();
        assert!(addrs.primary.ends_with("socket1"));
        assert!(addrs.aux.ends_with("socket2"));
    }
}
