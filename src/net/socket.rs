use crate::io::{Interest, readiness};
use crate::net::set_nonblocking;
use std::io;
use std::net::ToSocketAddrs;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// A non-blocking TCP connection whose reads and writes suspend the calling
/// task instead of the thread.
///
/// `read` fills the whole buffer unless the peer closes first (the short
/// count is the EOF signal); `write` always sends the whole buffer. Hard
/// errors surface as `io::Error`; would-block and interrupts are absorbed
/// by the retry loop.
#[derive(Debug)]
pub struct TcpStream {
    fd: OwnedFd,
}

impl TcpStream {
    /// Connect to `addr` (blocking, intended for clients and tests), then
    /// switch the socket non-blocking for task use.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Self::from_std(std::net::TcpStream::connect(addr)?)
    }

    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        Self::from_owned_fd(stream.into())
    }

    pub(crate) fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self { fd })
    }

    /// Read until `buf` is full. A short count means the peer closed.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd.as_raw_fd();
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = &mut buf[filled..];
            let n = unsafe {
                libc::read(fd, remaining.as_mut_ptr() as *mut libc::c_void, remaining.len())
            };
            match n {
                0 => return Ok(filled),
                n if n > 0 => filled += n as usize,
                _ => match io::Error::last_os_error() {
                    e if e.kind() == io::ErrorKind::WouldBlock => {
                        self.await_ready(Interest::READABLE).await?
                    }
                    e if e.kind() == io::ErrorKind::Interrupted => continue,
                    e => return Err(e),
                },
            }
        }
        Ok(filled)
    }

    /// Write the whole of `buf`.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.fd.as_raw_fd();
        let mut written = 0;
        while written < buf.len() {
            let remaining = &buf[written..];
            let n = unsafe {
                libc::write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len())
            };
            match n {
                n if n > 0 => written += n as usize,
                0 => return Err(io::ErrorKind::WriteZero.into()),
                _ => match io::Error::last_os_error() {
                    e if e.kind() == io::ErrorKind::WouldBlock => {
                        self.await_ready(Interest::WRITABLE).await?
                    }
                    e if e.kind() == io::ErrorKind::Interrupted => continue,
                    e => return Err(e),
                },
            }
        }
        Ok(written)
    }

    async fn await_ready(&self, interest: Interest) -> io::Result<()> {
        match readiness(self.fd.as_raw_fd(), interest).await {
            code if code < 0 => Err(io::Error::from_raw_os_error(-code)),
            _ => Ok(()),
        }
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_std_switches_non_blocking() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let stream = TcpStream::from_std(client).unwrap();
        let flags = unsafe { libc::fcntl(stream.as_raw_fd(), libc::F_GETFL) };
        assert!(flags & libc::O_NONBLOCK != 0);
    }
}
