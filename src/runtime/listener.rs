//! Listening socket setup.
//!
//! Resolves the passive local addresses for a port (IPv4 and IPv6), binds
//! the first candidate that accepts a socket and a bind, and owns the
//! resulting descriptor until drop.

use super::acceptor::Accept;
use super::nonblocking;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::ffi::{CStr, CString};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::{mem, ptr};
use tracing::{debug, info};

/// One resolved address to try, copied out of the resolver's list.
#[derive(Debug, Clone)]
struct Candidate {
    domain: Domain,
    ty: Type,
    protocol: Protocol,
    addr: SockAddr,
}

/// Owned `getaddrinfo` result list, released with `freeaddrinfo` on drop.
struct AddrInfoList {
    head: *mut libc::addrinfo,
}

impl AddrInfoList {
    /// Passive stream-socket lookup. `node = None` yields the wildcard
    /// addresses of every supported family.
    fn lookup(node: Option<&str>, service: &str) -> Result<Self> {
        let resolution_error = |reason: String| Error::AddressResolution {
            port: service.to_string(),
            reason,
        };

        let node = node
            .map(CString::new)
            .transpose()
            .map_err(|_| resolution_error("host contains a NUL byte".to_string()))?;
        let c_service = CString::new(service)
            .map_err(|_| resolution_error("port contains a NUL byte".to_string()))?;

        let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
        hints.ai_family = libc::AF_UNSPEC;
        hints.ai_socktype = libc::SOCK_STREAM;
        hints.ai_flags = libc::AI_PASSIVE;

        let mut head: *mut libc::addrinfo = ptr::null_mut();
        let rc = unsafe {
            libc::getaddrinfo(
                node.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                c_service.as_ptr(),
                &hints,
                &mut head,
            )
        };

        if rc != 0 {
            return Err(resolution_error(gai_message(rc)));
        }

        Ok(Self { head })
    }

    /// Copy every IPv4/IPv6 entry into owned values, in resolution order.
    fn candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::new();
        let mut cursor = self.head;

        while !cursor.is_null() {
            // SAFETY: `cursor` walks the list returned by getaddrinfo, which
            // stays alive until `self` is dropped.
            let ai = unsafe { &*cursor };
            cursor = ai.ai_next;

            if ai.ai_family != libc::AF_INET && ai.ai_family != libc::AF_INET6 {
                continue;
            }
            let len = ai.ai_addrlen as usize;
            if ai.ai_addr.is_null() || len > mem::size_of::<libc::sockaddr_storage>() {
                continue;
            }

            let addr = unsafe {
                let mut storage: libc::sockaddr_storage = mem::zeroed();
                ptr::copy_nonoverlapping(
                    ai.ai_addr.cast::<u8>(),
                    (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
                    len,
                );
                SockAddr::new(storage, ai.ai_addrlen)
            };

            out.push(Candidate {
                domain: Domain::from(ai.ai_family),
                ty: Type::from(ai.ai_socktype),
                protocol: Protocol::from(ai.ai_protocol),
                addr,
            });
        }

        out
    }
}

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.head.is_null() {
            unsafe { libc::freeaddrinfo(self.head) };
        }
    }
}

fn gai_message(rc: libc::c_int) -> String {
    if rc == libc::EAI_SYSTEM {
        return io::Error::last_os_error().to_string();
    }
    unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
        .to_string_lossy()
        .into_owned()
}

/// A bound TCP socket; becomes the accept queue once `listen` is called.
///
/// The descriptor is closed exactly once, when this value is dropped.
#[derive(Debug)]
pub struct ListenerSocket {
    socket: Socket,
    local_addr: SocketAddr,
}

impl ListenerSocket {
    /// Resolve `host`/`port` and bind the first candidate that works.
    ///
    /// Fails with `SocketCreate` when no candidate yields a socket at all,
    /// and with `Bind` when every created socket fails to bind. Sockets from
    /// failed candidates are closed before the next candidate is tried.
    pub fn bind(host: Option<&str>, port: &str, reuse_address: bool) -> Result<Self> {
        let list = AddrInfoList::lookup(host, port)?;
        let candidates = list.candidates();
        drop(list);

        if candidates.is_empty() {
            return Err(Error::AddressResolution {
                port: port.to_string(),
                reason: "no IPv4 or IPv6 addresses returned".to_string(),
            });
        }

        let mut create_error = None;
        let mut bind_error = None;

        for candidate in candidates {
            let socket = match Socket::new(candidate.domain, candidate.ty, Some(candidate.protocol))
            {
                Ok(socket) => socket,
                Err(e) => {
                    debug!(addr = ?candidate.addr.as_socket(), error = %e, "Socket creation failed");
                    create_error = Some(e);
                    continue;
                }
            };

            // `socket` is dropped, and therefore closed, on every failed path.
            let bound = if reuse_address {
                socket.set_reuse_address(true)
            } else {
                Ok(())
            }
            .and_then(|()| socket.bind(&candidate.addr))
            .and_then(|()| local_socket_addr(&socket));

            match bound {
                Ok(local_addr) => {
                    info!(fd = socket.as_raw_fd(), addr = %local_addr, "Socket bound");
                    return Ok(Self { socket, local_addr });
                }
                Err(e) => {
                    debug!(addr = ?candidate.addr.as_socket(), error = %e, "Bind failed");
                    bind_error = Some(e);
                }
            }
        }

        Err(match bind_error {
            Some(e) => Error::Bind(e),
            None => Error::SocketCreate(create_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable address")
            })),
        })
    }

    pub fn set_nonblocking(&self) -> Result<()> {
        nonblocking::set_nonblocking(self.socket.as_fd())
    }

    /// Mark the socket as accepting connections. `None` uses `SOMAXCONN`.
    pub fn listen(&self, backlog: Option<i32>) -> Result<()> {
        let backlog = backlog.unwrap_or(libc::SOMAXCONN);
        self.socket.listen(backlog).map_err(|source| Error::Listen {
            fd: self.socket.as_raw_fd(),
            source,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Accept for ListenerSocket {
    type Stream = Socket;

    fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (socket, addr) = self.socket.accept()?;
        let peer = addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "peer address is not IPv4 or IPv6")
        })?;
        Ok((socket, peer))
    }
}

impl AsRawFd for ListenerSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn local_socket_addr(socket: &Socket) -> io::Result<SocketAddr> {
    socket.local_addr()?.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "bound address is not IPv4 or IPv6")
    })
}
