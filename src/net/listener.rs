use crate::io::{Interest, readiness};
use crate::net::TcpStream;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking accepting socket. `accept` suspends the calling task
/// until a connection is pending and yields streams already switched
/// non-blocking.
#[derive(Debug)]
pub struct TcpListener {
    inner: std::net::TcpListener,
}

impl TcpListener {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = std::net::TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => return Ok((TcpStream::from_std(stream)?, addr)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let code = readiness(self.inner.as_raw_fd(), Interest::READABLE).await;
                    if code < 0 {
                        return Err(io::Error::from_raw_os_error(-code));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
