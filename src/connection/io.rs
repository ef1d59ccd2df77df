//! Transport sockets and the `poll`-based readiness wrapper (§4.G.3).
//!
//! The connection core is caller-driven: nothing here spawns a thread or a reactor. A
//! [`Transport`] is a plain blocking-or-non-blocking socket; [`socket_readiness`] is the only
//! suspension point, a thin wrapper over the platform `poll(2)`.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::config::{CommunicationMode, Config};
use crate::error::{ClientError, ClientErrorKind, Error};

fn timed_out() -> Error {
    Error::from(ClientError::new(ClientErrorKind::TimedOut))
}

fn io_err(e: io::Error) -> Error {
    Error::from(e)
}

pub(crate) enum PlainStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Uds(UnixStream),
}

impl PlainStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            PlainStream::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            PlainStream::Uds(s) => s.set_nonblocking(nonblocking),
        }
    }
}

impl Read for PlainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PlainStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            PlainStream::Uds(s) => s.read(buf),
        }
    }
}

impl Write for PlainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PlainStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            PlainStream::Uds(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PlainStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            PlainStream::Uds(s) => s.flush(),
        }
    }
}

impl AsRawFd for PlainStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            PlainStream::Tcp(s) => s.as_raw_fd(),
            #[cfg(unix)]
            PlainStream::Uds(s) => s.as_raw_fd(),
        }
    }
}

#[cfg(feature = "tls")]
pub(crate) type TlsStream = rustls::StreamOwned<rustls::ClientConnection, PlainStream>;

/// A connected socket, plaintext or TLS-wrapped. Shared by the blocking and non-blocking
/// connect paths; TLS negotiation (when requested) happens once, synchronously, right after
/// the plain TCP/UDS connect completes (§9 "one-shot TLS bootstrap").
pub(crate) enum Transport {
    Plain(PlainStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream>),
}

impl Transport {
    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.set_nonblocking(nonblocking),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.sock.set_nonblocking(nonblocking),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.flush(),
        }
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Transport::Plain(s) => s.as_raw_fd(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.sock.as_raw_fd(),
        }
    }
}

/// Opens the transport named by `config`: plain TCP/UDS, optionally upgraded to TLS via a
/// blocking `SSLRequest` round-trip (§9 "one-shot TLS bootstrap"), and finally switched to
/// non-blocking for the steady-state protocol. `deadline`, if given, bounds the plain connect
/// only (§4.G.2); the TLS handshake that may follow is not itself deadline-bounded.
pub(crate) fn connect(config: &Config, deadline: Option<Instant>) -> Result<Transport, Error> {
    let plain = connect_plain(config, deadline)?;
    let transport = if config.ssl_enabled {
        negotiate_ssl(plain, config)?
    } else {
        Transport::Plain(plain)
    };
    transport.set_nonblocking(true).map_err(io_err)?;
    Ok(transport)
}

#[cfg(feature = "tls")]
fn negotiate_ssl(mut plain: PlainStream, config: &Config) -> Result<Transport, Error> {
    use postgres_protocol::message::frontend;

    let mut request = bytes::BytesMut::new();
    frontend::ssl_request(&mut request);
    plain.write_all(&request).map_err(io_err)?;

    let mut response = [0u8; 1];
    plain.read_exact(&mut response).map_err(io_err)?;
    match response[0] {
        b'S' => {
            let stream = super::tls::negotiate(plain, config)?;
            Ok(Transport::Tls(Box::new(stream)))
        }
        _ => Ok(Transport::Plain(plain)),
    }
}

#[cfg(not(feature = "tls"))]
fn negotiate_ssl(plain: PlainStream, _config: &Config) -> Result<Transport, Error> {
    Ok(Transport::Plain(plain))
}

/// Opens the plain socket named by `config` (TCP or Unix-domain per `communication_mode`) and
/// applies the keepalive knobs. Does not negotiate TLS; callers that need it wrap the result
/// themselves once the socket is known to be writable. `deadline`, if given, bounds how long
/// the TCP handshake itself may take (§4.G.2); Unix-domain connects are not deadline-bounded
/// since `std` has no timed variant for them.
pub(crate) fn connect_plain(config: &Config, deadline: Option<Instant>) -> Result<PlainStream, Error> {
    match config.communication_mode {
        CommunicationMode::Net => {
            let host = config.net_address.as_deref().or(config.net_hostname.as_deref()).unwrap_or("localhost");
            let addr = (host, config.port)
                .to_socket_addrs()
                .map_err(io_err)?
                .next()
                .ok_or_else(|| io_err(io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")))?;
            let stream = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(timed_out());
                    }
                    TcpStream::connect_timeout(&addr, remaining).map_err(|e| if e.kind() == io::ErrorKind::TimedOut { timed_out() } else { io_err(e) })?
                }
                None => TcpStream::connect(addr).map_err(io_err)?,
            };
            apply_tcp_keepalive(&stream, config)?;
            Ok(PlainStream::Tcp(stream))
        }
        #[cfg(unix)]
        CommunicationMode::Uds => {
            let dir = config.uds_directory.as_ref().expect("validated: uds_directory set in uds mode");
            let path = dir.join(format!(".s.PGSQL.{}", config.port));
            let stream = UnixStream::connect(path).map_err(io_err)?;
            Ok(PlainStream::Uds(stream))
        }
    }
}

#[cfg(target_os = "linux")]
fn apply_tcp_keepalive(stream: &TcpStream, config: &Config) -> Result<(), Error> {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let enabled: libc::c_int = config.tcp_keepalives_enabled as libc::c_int;
    unsafe {
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, enabled)?;
    }
    if !config.tcp_keepalives_enabled {
        return Ok(());
    }
    if let Some(idle) = config.tcp_keepalives_idle {
        unsafe {
            setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, idle as libc::c_int)?;
        }
    }
    if let Some(interval) = config.tcp_keepalives_interval {
        unsafe {
            setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, interval as libc::c_int)?;
        }
    }
    if let Some(count) = config.tcp_keepalives_count {
        unsafe {
            setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, count as libc::c_int)?;
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
unsafe fn setsockopt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), Error> {
    let rc = libc::setsockopt(
        fd,
        level,
        name,
        &value as *const libc::c_int as *const libc::c_void,
        core::mem::size_of::<libc::c_int>() as libc::socklen_t,
    );
    if rc != 0 {
        return Err(io_err(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn apply_tcp_keepalive(_stream: &TcpStream, _config: &Config) -> Result<(), Error> {
    Ok(())
}

/// Socket-readiness mask requested of [`socket_readiness`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessMask {
    pub read: bool,
    pub write: bool,
    pub exceptions: bool,
}

impl ReadinessMask {
    pub const fn read() -> Self {
        Self {
            read: true,
            write: false,
            exceptions: false,
        }
    }

    pub const fn write() -> Self {
        Self {
            read: false,
            write: true,
            exceptions: false,
        }
    }
}

/// Outcome of a single `poll(2)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { read: bool, write: bool, exceptions: bool },
    Unready,
}

/// Waits up to `deadline` (or forever, if `None`) for `fd` to satisfy any bit of `mask`,
/// retrying on `EINTR` with the remaining budget. Returns [`Readiness::Unready`] on timeout.
pub(crate) fn socket_readiness(fd: RawFd, mask: ReadinessMask, deadline: Option<Instant>) -> Result<Readiness, Error> {
    let mut events = 0;
    if mask.read {
        events |= libc::POLLIN;
    }
    if mask.write {
        events |= libc::POLLOUT;
    }
    if mask.exceptions {
        events |= libc::POLLPRI;
    }

    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(Readiness::Unready);
                }
                remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut pollfd = libc::pollfd {
            fd,
            events: events as libc::c_short,
            revents: 0,
        };

        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(io_err(err));
        }
        if rc == 0 {
            return Ok(Readiness::Unready);
        }
        return Ok(Readiness::Ready {
            read: pollfd.revents & libc::POLLIN != 0,
            write: pollfd.revents & libc::POLLOUT != 0,
            exceptions: pollfd.revents & (libc::POLLPRI | libc::POLLERR | libc::POLLHUP) != 0,
        });
    }
}

/// Blocks on `socket_readiness` until `mask` is satisfied or `budget` is exhausted, deducting
/// elapsed wall-clock after every wait (§4.G.2/§4.G.3).
pub(crate) fn wait_socket_readiness(fd: RawFd, mask: ReadinessMask, budget: Option<Duration>) -> Result<(), Error> {
    let deadline = budget.map(|d| Instant::now() + d);
    match socket_readiness(fd, mask, deadline)? {
        Readiness::Ready { .. } => Ok(()),
        Readiness::Unready => Err(timed_out()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn readiness_reports_write_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_nonblocking(true).unwrap();
        let readiness = socket_readiness(stream.as_raw_fd(), ReadinessMask::write(), Some(Instant::now() + Duration::from_secs(1))).unwrap();
        assert!(matches!(readiness, Readiness::Ready { write: true, .. }));
    }

    #[test]
    fn readiness_times_out_with_no_activity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let readiness = socket_readiness(stream.as_raw_fd(), ReadinessMask::read(), Some(Instant::now() + Duration::from_millis(50))).unwrap();
        assert_eq!(readiness, Readiness::Unready);
    }
}
