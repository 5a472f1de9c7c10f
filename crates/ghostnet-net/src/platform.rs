//! Socket setup for the server's listener, accepted streams and the update
//! socket.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Options applied to every socket the server opens or accepts.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm on management streams. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive so dead peers are eventually disconnected. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes. Default: 10s.
    pub keepalive_interval: Duration,
    /// Set `SO_REUSEADDR` on the listener and update socket. Default: off on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Applies `config` to an accepted management stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

fn domain_of(addr: &SocketAddr) -> Domain {
    if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    }
}

fn prepare(socket: &Socket, addr: &SocketAddr, config: &SocketConfig) -> std::io::Result<()> {
    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    // Dual-stack when bound to an IPv6 address.
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())
}

/// Binds the management listener.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let socket = Socket::new(domain_of(&addr), Type::STREAM, Some(Protocol::TCP))?;
    prepare(&socket, &addr, config)?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// Binds the shared update socket.
pub fn create_update_socket(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(domain_of(&addr), Type::DGRAM, Some(Protocol::UDP))?;
    prepare(&socket, &addr, config)?;
    UdpSocket::from_std(socket.into())
}
