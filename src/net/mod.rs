//! Non-blocking TCP for task code. Reads and writes retry their syscall
//! until would-block, then suspend on fd readiness; the runtime resumes
//! them when the reactor reports the fd ready again.

mod listener;
pub use listener::TcpListener;

mod socket;
pub use socket::TcpStream;

use std::io;
use std::os::fd::RawFd;

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn set_nonblocking_flips_the_flag() {
        let (r, _w) = nix::unistd::pipe().unwrap();
        set_nonblocking(r.as_raw_fd()).unwrap();
        let flags = unsafe { libc::fcntl(r.as_raw_fd(), libc::F_GETFL) };
        assert!(flags & libc::O_NONBLOCK != 0);
    }
}
