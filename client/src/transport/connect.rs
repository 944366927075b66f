//! Opening TCP and TLS connections to the backends
//!
//! FESL only speaks TLS 1.0 with a self-signed certificate chain, so
//! certificate and hostname checks are disabled and the minimum protocol
//! version is lowered. Whether the system TLS library still permits
//! TLS 1.0 is an environment setting (for OpenSSL, `OPENSSL_CONF` with
//! `MinProtocol = TLSv1` and `CipherString = DEFAULT@SECLEVEL=0`).

use protocol::constants::dns_override;
use protocol::{Error, Result};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

fn transport_error(context: &str, error: impl std::fmt::Display) -> Error {
    Error::Transport(format!("{context}: {error}"))
}

/// Resolves `host`, preferring a known fixed address
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Some(address) = dns_override(host) {
        debug!("using fixed address {} for {}", address, host);
        return format!("{address}:{port}")
            .parse()
            .map_err(|e| transport_error("invalid override address", e));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| transport_error(&format!("failed to resolve {host}"), e))?
        .next()
        .ok_or_else(|| Error::Transport(format!("{host} did not resolve to any address")))
}

async fn resolve_async(host: &str, port: u16) -> Result<SocketAddr> {
    if dns_override(host).is_some() {
        return resolve(host, port);
    }
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| transport_error(&format!("failed to resolve {host}"), e))?
        .next()
        .ok_or_else(|| Error::Transport(format!("{host} did not resolve to any address")))
}

/// Opens a TCP connection with keep-alive and per-operation timeouts
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let address = resolve(host, port)?;
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| transport_error("failed to create socket", e))?;
    socket
        .set_keepalive(true)
        .map_err(|e| transport_error("failed to enable keep-alive", e))?;
    socket
        .connect_timeout(&address.into(), timeout)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::Timeout(timeout)
            }
            _ => transport_error(&format!("failed to connect to {address}"), e),
        })?;
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .and_then(|_| socket.set_nodelay(true))
        .map_err(|e| transport_error("failed to configure socket", e))?;
    debug!("connected to {} ({})", host, address);
    Ok(socket.into())
}

/// Async counterpart of [`connect_tcp`]; timeouts are applied per operation
/// by the transport instead of the socket
pub async fn connect_tcp_async(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<tokio::net::TcpStream> {
    let address = resolve_async(host, port).await?;
    let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| transport_error(&format!("failed to connect to {address}"), e))?;
    SockRef::from(&stream)
        .set_keepalive(true)
        .and_then(|_| stream.set_nodelay(true))
        .map_err(|e| transport_error("failed to configure socket", e))?;
    debug!("connected to {} ({})", host, address);
    Ok(stream)
}

/// TLS settings accepted by the FESL backends
pub fn tls_connector() -> Result<native_tls::TlsConnector> {
    native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv10))
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| transport_error("failed to configure TLS", e))
}

/// Opens a TLS connection on top of [`connect_tcp`]
pub fn connect_tls(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<native_tls::TlsStream<TcpStream>> {
    let tcp = connect_tcp(host, port, timeout)?;
    let stream = tls_connector()?
        .connect(host, tcp)
        .map_err(|e| transport_error("TLS handshake failed", e))?;
    debug!("TLS established with {}", host);
    Ok(stream)
}

/// Opens a TLS connection on top of [`connect_tcp_async`]
pub async fn connect_tls_async(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<tokio_native_tls::TlsStream<tokio::net::TcpStream>> {
    let tcp = connect_tcp_async(host, port, timeout).await?;
    let connector = tokio_native_tls::TlsConnector::from(tls_connector()?);
    let stream = tokio::time::timeout(timeout, connector.connect(host, tcp))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| transport_error("TLS handshake failed", e))?;
    debug!("TLS established with {}", host);
    Ok(stream)
}
