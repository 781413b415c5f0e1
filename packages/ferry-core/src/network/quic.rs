//! QUIC endpoint helpers.
//!
//! The session-multiplex data plane runs over quinn with the same
//! credential material as the control channel. The sender binds a server
//! endpoint at its advertised `quic_addr`; the receiver dials back and
//! exchanges one request/reply pair per pair of one-shot substreams.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};

use crate::error::{Error, Result};
use crate::network::credentials::Credentials;

/// Bind the sender-side data-plane endpoint.
pub fn server_endpoint(addr: SocketAddr, credentials: &Credentials) -> Result<quinn::Endpoint> {
    let crypto = QuicServerConfig::try_from(credentials.server_config()?.as_ref().clone())
        .map_err(|e| Error::Credentials(format!("quic server crypto: {e}")))?;
    let config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    quinn::Endpoint::server(config, addr).map_err(Error::Io)
}

/// Dial the sender's data-plane endpoint. The returned endpoint must stay
/// alive for the connection's lifetime; callers close the connection and
/// then drain the endpoint.
pub async fn connect(
    addr: &str,
    credentials: &Credentials,
) -> Result<(quinn::Endpoint, quinn::Connection)> {
    let (host, remote) = resolve(addr).await?;
    let crypto = QuicClientConfig::try_from(credentials.client_config()?.as_ref().clone())
        .map_err(|e| Error::Credentials(format!("quic client crypto: {e}")))?;

    let bind: SocketAddr = if remote.is_ipv6() {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    };
    let mut endpoint = quinn::Endpoint::client(bind).map_err(Error::Io)?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

    let connection = endpoint
        .connect(remote, &host)
        .map_err(|e| Error::HandshakeFailed(format!("quic dial {addr}: {e}")))?
        .await
        .map_err(|e| Error::HandshakeFailed(format!("quic handshake with {addr}: {e}")))?;
    Ok((endpoint, connection))
}

/// Split a `host:port` string into the hostname (for SNI) and a resolved
/// socket address.
pub(crate) async fn resolve(addr: &str) -> Result<(String, SocketAddr)> {
    let host = addr
        .rsplit_once(':')
        .map(|(h, _)| h)
        .unwrap_or(addr)
        .trim_matches(|c| c == '[' || c == ']')
        .to_string();
    let socket_addr = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address found for {addr}"),
            ))
        })?;
    Ok((host, socket_addr))
}

/// Replace the port of a `host:port` string, preserving the host form.
pub(crate) fn with_port(addr: &str, port: u16) -> String {
    let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
    format!("{host}:{port}")
}
