use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Listening side of a bridge transport.
///
/// For Unix domain sockets the socket file is created at bind time; stale
/// socket files are removed first, non-socket files are never touched, and
/// the file is cleaned up on drop only if its inode identity is unchanged.
pub struct LinkListener {
    inner: ListenerInner,
}

enum ListenerInner {
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
        created_inode: Option<(u64, u64)>,
    },
    Tcp(TcpListener),
}

impl LinkListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on the given endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Self::bind_uds(path, Self::DEFAULT_SOCKET_MODE),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(TransportError::Bind {
                endpoint: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ),
            }),
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
                    endpoint: format!("tcp://{addr}"),
                    source: e,
                })?;
                info!(%addr, "listening on tcp");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                })
            }
        }
    }

    #[cfg(unix)]
    fn bind_uds(path: &Path, mode: u32) -> Result<Self> {
        let path = path.to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                endpoint: path.display().to_string(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                    endpoint: path.display().to_string(),
                    source: e,
                })?;
            } else {
                return Err(TransportError::Bind {
                    endpoint: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            endpoint: path.display().to_string(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TransportError::Bind {
                endpoint: path.display().to_string(),
                source: e,
            }
        })?;
        let created_metadata =
            std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                endpoint: path.display().to_string(),
                source: e,
            })?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            inner: ListenerInner::Unix {
                listener,
                path,
                created_inode,
            },
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
                debug!("accepted unix connection");
                Ok(LinkStream::from_unix(stream))
            }
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().map_err(TransportError::Accept)?;
                debug!(%addr, "accepted tcp connection");
                Ok(LinkStream::from_tcp(stream))
            }
        }
    }

    /// The local TCP address, when bound to TCP (useful with port 0).
    pub fn local_tcp_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix { .. } => None,
            ListenerInner::Tcp(listener) => listener.local_addr().ok(),
        }
    }
}

/// Connect to a listening bridge endpoint (blocking).
pub fn connect(endpoint: &Endpoint) -> Result<LinkStream> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
                TransportError::Connect {
                    endpoint: path.display().to_string(),
                    source: e,
                }
            })?;
            debug!(?path, "connected to unix domain socket");
            Ok(LinkStream::from_unix(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(TransportError::Connect {
            endpoint: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            ),
        }),
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
                endpoint: format!("tcp://{addr}"),
                source: e,
            })?;
            stream.set_nodelay(true)?;
            debug!(%addr, "connected to tcp endpoint");
            Ok(LinkStream::from_tcp(stream))
        }
    }
}

impl Drop for LinkListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let ListenerInner::Unix {
            path,
            created_inode: Some((expected_dev, expected_ino)),
            ..
        } = &self.inner
        {
            if let Ok(metadata) = std::fs::symlink_metadata(path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == *expected_dev
                    && metadata.ino() == *expected_ino
                {
                    debug!(?path, "cleaning up socket file");
                    let _ = std::fs::remove_file(path);
                } else {
                    debug!(?path, "socket path identity changed; skipping cleanup");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("portlink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect_uds() {
        let dir = unique_temp_dir("uds");
        let sock_path = dir.join("board.sock");
        let endpoint = Endpoint::Unix(sock_path.clone());

        let listener = LinkListener::bind(&endpoint).unwrap();
        assert!(sock_path.exists());

        let ep = endpoint.clone();
        let handle = std::thread::spawn(move || {
            let mut client = connect(&ep).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_accept_connect_tcp() {
        let endpoint: Endpoint = "tcp://127.0.0.1:0".parse().unwrap();
        let listener = LinkListener::bind(&endpoint).unwrap();
        let addr = listener.local_tcp_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let mut client = connect(&Endpoint::Tcp(addr)).unwrap();
            client.write_all(b"tcp").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"tcp");

        handle.join().unwrap();
    }

    #[test]
    fn path_too_long_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let endpoint = Endpoint::Unix(PathBuf::from(long_path));
        let result = LinkListener::bind(&endpoint);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_default_permissions_hardened() {
        let dir = unique_temp_dir("perms");
        let sock_path = dir.join("perm.sock");

        let listener = LinkListener::bind(&Endpoint::Unix(sock_path.clone())).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let dir = unique_temp_dir("bind-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = LinkListener::bind(&Endpoint::Unix(sock_path.clone()));
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_file(&sock_path);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let dir = unique_temp_dir("drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = LinkListener::bind(&Endpoint::Unix(sock_path.clone())).unwrap();
        assert!(sock_path.exists());

        // Replace path while listener is alive.
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_file(&sock_path);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
