//! Transport Streams
//!
//! Endpoint addressing and the type-erased byte stream shared by the server
//! and the client. TLS wrapping lives in [`crate::tls`].

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::tls::ClientTls;

/// A bidirectional byte stream
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Owned, type-erased stream
pub type BoxStream = Box<dyn Stream>;

/// Where a server listens or a client connects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// TCP `host:port`
    Tcp(String),
    /// Unix domain socket path
    Unix(PathBuf),
}

impl Endpoint {
    /// Whether this is a TCP endpoint
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Tcp("127.0.0.1:7878".to_string())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// `unix:PATH` or any value containing `/` is a Unix socket; everything
    /// else is `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("unix endpoint has an empty path".to_string());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if s.contains('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(s.to_string()))
            }
            _ => Err(format!("'{s}' is neither host:port nor a socket path")),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Address a server actually bound
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalAddr {
    /// Bound TCP address (with the real port when 0 was requested)
    Tcp(SocketAddr),
    /// Bound Unix socket path
    Unix(PathBuf),
}

impl LocalAddr {
    /// Endpoint a client can dial to reach this address
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Tcp(addr) => Endpoint::Tcp(addr.to_string()),
            Self::Unix(path) => Endpoint::Unix(path.clone()),
        }
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint().fmt(f)
    }
}

/// Open a stream to an endpoint, wrapping it in TLS when configured
///
/// # Errors
///
/// Returns connection failures, TLS handshake failures, and
/// `InvalidInput` when TLS is requested for a Unix socket.
pub async fn connect(endpoint: &Endpoint, tls: Option<&ClientTls>) -> std::io::Result<BoxStream> {
    match (endpoint, tls) {
        (Endpoint::Tcp(addr), tls) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            match tls {
                Some(tls) => Ok(Box::new(tls.connect(stream).await?)),
                None => Ok(Box::new(stream)),
            }
        }
        (Endpoint::Unix(path), None) => Ok(Box::new(UnixStream::connect(path).await?)),
        (Endpoint::Unix(_), Some(_)) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "TLS requires a TCP endpoint",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            "127.0.0.1:9000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".to_string())
        );
        assert_eq!(
            "localhost:0".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:0".to_string())
        );
        assert_eq!(
            "unix:sb.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("sb.sock"))
        );
        assert_eq!(
            "/run/sb.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/run/sb.sock"))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("host:port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        for text in ["127.0.0.1:7878", "unix:/tmp/sb.sock"] {
            let endpoint: Endpoint = text.parse().unwrap();
            assert_eq!(endpoint.to_string(), text);
        }
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            address: Endpoint,
        }
        let parsed: Wrapper = toml::from_str(r#"address = "unix:/tmp/x.sock""#).unwrap();
        assert_eq!(parsed.address, Endpoint::Unix(PathBuf::from("/tmp/x.sock")));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = connect(&Endpoint::Unix(PathBuf::from("/nonexistent/sb.sock")), None).await;
        assert!(result.is_err());
    }
}
