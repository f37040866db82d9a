//! GELF wire transports.
//!
//! # Responsibilities
//! - Parse `udp://host:port` and `tcp://host:port` collector URIs
//! - UDP: one datagram per message, GELF chunking above the chunk size,
//!   optional gzip
//! - TCP: null-terminated frames over one reused connection, reconnecting
//!   once when a write fails

use std::fmt;
use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::config::GelfConfig;

/// Magic bytes opening every chunked GELF datagram.
pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];

/// Collectors reject messages split into more chunks than this.
pub const MAX_CHUNKS: usize = 128;

/// Magic (2) + message id (8) + sequence number (1) + sequence count (1).
pub const CHUNK_HEADER_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid collector URI '{0}'")]
    InvalidUri(String),
    #[error("unsupported collector scheme '{0}', expected udp or tcp")]
    UnsupportedScheme(String),
    #[error("collector URI has no host")]
    MissingHost,
    #[error("collector URI has no port")]
    MissingPort,
    #[error("could not resolve collector address {0}")]
    Resolve(String),
    #[error("message needs {0} chunks, limit is {MAX_CHUNKS}")]
    TooManyChunks(usize),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GelfProtocol {
    Udp,
    Tcp,
}

/// Where records are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GelfEndpoint {
    pub protocol: GelfProtocol,
    pub host: String,
    pub port: u16,
}

impl GelfEndpoint {
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let url = url::Url::parse(uri).map_err(|_| TransportError::InvalidUri(uri.to_string()))?;
        let protocol = match url.scheme() {
            "udp" => GelfProtocol::Udp,
            "tcp" => GelfProtocol::Tcp,
            other => return Err(TransportError::UnsupportedScheme(other.to_string())),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(TransportError::MissingHost)?
            .to_string();
        let port = url.port().ok_or(TransportError::MissingPort)?;
        Ok(Self { protocol, host, port })
    }

    /// `host:port`, suitable for socket address lookup.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for GelfEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.protocol {
            GelfProtocol::Udp => "udp",
            GelfProtocol::Tcp => "tcp",
        };
        write!(f, "{scheme}://{}", self.address())
    }
}

/// Largest serialized record a UDP message can carry after chunking.
///
/// Gzip can grow incompressible input slightly, so with compression on
/// some room is kept for deflate framing.
pub fn max_udp_message(chunk_size: usize, compress: bool) -> usize {
    let capacity = MAX_CHUNKS * chunk_size.max(1);
    if compress {
        capacity.saturating_sub(capacity / 1024 + 64)
    } else {
        capacity
    }
}

/// Split a payload into GELF chunks, or return it whole when it fits.
pub fn chunk_message(
    payload: &[u8],
    chunk_size: usize,
    message_id: [u8; 8],
) -> Result<Vec<Vec<u8>>, TransportError> {
    if payload.len() <= chunk_size {
        return Ok(vec![payload.to_vec()]);
    }

    let count = payload.len().div_ceil(chunk_size);
    if count > MAX_CHUNKS {
        return Err(TransportError::TooManyChunks(count));
    }

    Ok(payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(seq, data)| {
            let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
            chunk.extend_from_slice(&CHUNK_MAGIC);
            chunk.extend_from_slice(&message_id);
            chunk.push(seq as u8);
            chunk.push(count as u8);
            chunk.extend_from_slice(data);
            chunk
        })
        .collect())
}

fn gzip(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

async fn resolve(address: &str) -> Result<std::net::SocketAddr, TransportError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|_| TransportError::Resolve(address.to_string()))?
        .next()
        .ok_or_else(|| TransportError::Resolve(address.to_string()))
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    chunk_size: usize,
    compress: bool,
}

impl UdpTransport {
    pub async fn connect(endpoint: &GelfEndpoint, chunk_size: usize, compress: bool) -> Result<Self, TransportError> {
        let target = resolve(&endpoint.address()).await?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        Ok(Self {
            socket,
            chunk_size,
            compress,
        })
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let compressed;
        let payload = if self.compress {
            compressed = gzip(payload)?;
            &compressed[..]
        } else {
            payload
        };

        let mut message_id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut message_id);

        for datagram in chunk_message(payload, self.chunk_size, message_id)? {
            self.socket.send(&datagram).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl TcpTransport {
    pub async fn connect(endpoint: &GelfEndpoint, send_timeout: Duration) -> Result<Self, TransportError> {
        let mut transport = Self {
            address: endpoint.address(),
            stream: None,
            timeout: send_timeout,
        };
        transport.reconnect().await?;
        Ok(transport)
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        let stream = timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let limit = self.timeout;
        if self.stream.is_none() {
            self.reconnect().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected).into());
        };
        timeout(limit, stream.write_all(frame))
            .await
            .map_err(|_| TransportError::Timeout(limit))??;
        Ok(())
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(0);

        if let Err(first) = self.write_frame(&frame).await {
            tracing::debug!(address = %self.address, error = %first, "GELF TCP write failed, reconnecting");
            self.stream = None;
            self.write_frame(&frame).await?;
        }
        Ok(())
    }
}

/// A connected transport for one endpoint.
#[derive(Debug)]
pub enum Transport {
    Udp(UdpTransport),
    Tcp(TcpTransport),
}

impl Transport {
    pub async fn connect(endpoint: &GelfEndpoint, config: &GelfConfig) -> Result<Self, TransportError> {
        let send_timeout = Duration::from_millis(config.send_timeout_ms);
        let connect = async {
            match endpoint.protocol {
                GelfProtocol::Udp => {
                    UdpTransport::connect(endpoint, config.chunk_size, config.compress)
                        .await
                        .map(Transport::Udp)
                }
                GelfProtocol::Tcp => TcpTransport::connect(endpoint, send_timeout).await.map(Transport::Tcp),
            }
        };
        timeout(send_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout(send_timeout))?
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match self {
            Transport::Udp(udp) => udp.send(payload).await,
            Transport::Tcp(tcp) => tcp.send(payload).await,
        }
    }
}
