use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error};

use crate::tokengate::config::LISTEN_BACKLOG;
use crate::tokengate::{Error, Result};

pub struct Listener {
    pub address: String,
    listener: TcpListener,
}

impl Listener {
    pub fn new(address: String) -> Result<Self> {
        let addr: SocketAddr = address.parse()?;
        let sock = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        // If we're on linux, set TCP_DEFER_ACCEPT.
        // The client always sends the first data after connecting.
        #[cfg(target_os = "linux")]
        unsafe {
            let optval: libc::c_int = 1;
            let ret = libc::setsockopt(
                sock.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_DEFER_ACCEPT,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(Error::from(io::Error::last_os_error()));
            }
        }
        sock.bind(addr)?;
        let listener = sock.listen(LISTEN_BACKLOG)?;
        Ok(Self { address, listener })
    }

    /// The bound address, useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Option<TcpStream> {
        loop {
            match self.listener.accept().await {
                Ok((sock, remote_addr)) => {
                    debug!(%remote_addr, server = %self.address.as_str(), "accept connection");
                    return Some(sock);
                }
                Err(e) => {
                    // Keep accepting through the known recoverable errors.
                    match e.raw_os_error().unwrap_or(0) {
                        libc::ECONNABORTED |
                        libc::EMFILE | // process file-descriptor limit
                        libc::ENFILE | // system wide file-descriptor limit
                        libc::ENOBUFS | // out of memory
                        libc::ENOMEM | // out of memory
                        libc::EPROTO | // protocol error
                        libc::EINTR => {
                            error!(%e, "accept error");
                            continue;
                        }
                        libc::EBADF => return None, // socket closed, happens during shutdown
                        _ => {
                            error!(%e, server = %self.address.as_str(), "unrecoverable accept error");
                            return None;
                        }
                    }
                }
            }
        }
    }
}
