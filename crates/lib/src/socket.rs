//! Socket file guard shared by the gateway and the client. The gateway only
//! replaces paths that are sockets and restricts the bound socket to mode
//! 0600; the client refuses to connect unless the path is a socket with mode
//! exactly 0600.

use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Required permission bits on the gateway socket, checked on both sides.
pub const SOCKET_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket {} does not exist (is the gateway running?)", path.display())]
    Missing { path: PathBuf },

    #[error("{} exists but is not a unix socket", path.display())]
    NotASocket { path: PathBuf },

    #[error("{} has mode 0{mode:03o}, expected 0{expected:03o}", path.display())]
    BadPermissions {
        path: PathBuf,
        mode: u32,
        expected: u32,
    },

    #[error("inspecting {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Server-side: make the path bindable. An existing socket is treated as
/// stale and removed; any other file type fails startup. Symlinks are not
/// followed, so a link pointing at a socket still fails.
pub fn prepare_socket_path(path: &Path) -> Result<(), SocketError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(SocketError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if !meta.file_type().is_socket() {
        return Err(SocketError::NotASocket {
            path: path.to_path_buf(),
        });
    }
    log::debug!("removing stale socket {}", path.display());
    fs::remove_file(path).map_err(|e| SocketError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Server-side: restrict the bound socket to owner read/write only. Must be
/// called right after bind, before serving.
pub fn restrict_socket(path: &Path) -> Result<(), SocketError> {
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(|e| {
        SocketError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Client-side: verify the path is a socket with mode exactly 0600 before
/// any connection attempt is made.
pub fn verify_socket(path: &Path) -> Result<(), SocketError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SocketError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(SocketError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if !meta.file_type().is_socket() {
        return Err(SocketError::NotASocket {
            path: path.to_path_buf(),
        });
    }
    let mode = meta.permissions().mode() & 0o777;
    if mode != SOCKET_MODE {
        return Err(SocketError::BadPermissions {
            path: path.to_path_buf(),
            mode,
            expected: SOCKET_MODE,
        });
    }
    Ok(())
}

/// Best-effort socket file removal at shutdown.
pub fn remove_socket(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("removing socket {}: {}", path.display(), e);
        }
    }
}
