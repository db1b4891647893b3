use std::env;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{lookup_host, TcpStream, UnixStream};

use crate::error::{Error, ErrorKind, Result};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// The address of the session bus.
///
/// This is carried by the `DBUS_SESSION_BUS_ADDRESS` environment variable.
pub(crate) fn session_bus_address() -> Result<String> {
    match env::var(ENV_SESSION_BUS) {
        Ok(address) => Ok(address),
        Err(..) => Err(Error::new(ErrorKind::MissingBus)),
    }
}

/// The address of the system bus.
///
/// This is carried by the `DBUS_SYSTEM_BUS_ADDRESS` environment variable,
/// with a fallback to the well-known default address.
pub(crate) fn system_bus_address() -> String {
    match env::var(ENV_SYSTEM_BUS) {
        Ok(address) if !address.is_empty() => address,
        _ => DEFAULT_SYSTEM_BUS.to_owned(),
    }
}

/// The address family requested for a TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4 only.
    Ipv4,
    /// IPv6 only.
    Ipv6,
    /// Either family.
    Unspecified,
}

/// A parsed bus address.
///
/// Addresses take the form `<scheme>:key=value,key=value…` where both keys
/// and values are percent-encoded.
///
/// # Examples
///
/// ```
/// use wirebus::Address;
///
/// let address = "unix:path=/tmp/dbus%3dsock".parse::<Address>()?;
/// assert_eq!(address, Address::Unix { path: "/tmp/dbus=sock".into() });
/// # Ok::<_, wirebus::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A unix stream socket at a filesystem path.
    Unix {
        /// The filesystem path of the socket.
        path: String,
    },
    /// A unix stream socket in the abstract namespace.
    UnixAbstract {
        /// The abstract socket name, without the leading nul.
        name: String,
    },
    /// A TCP socket.
    Tcp {
        /// The host to connect to.
        host: String,
        /// The port to connect to.
        port: u16,
        /// The requested address family.
        family: AddressFamily,
    },
    /// A TCP socket guarded by a nonce file.
    ///
    /// After dialing, the contents of the nonce file are sent as the first
    /// payload.
    NonceTcp {
        /// The host to connect to.
        host: String,
        /// The port to connect to.
        port: u16,
        /// The requested address family.
        family: AddressFamily,
        /// The path of the file holding the nonce cookie.
        noncefile: String,
    },
}

impl Address {
    /// Parse a bus address.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidAddress(address.to_owned()));

        let (scheme, options) = address.split_once(':').ok_or_else(invalid)?;

        let mut pairs = Vec::new();

        for option in options.split(',') {
            let (key, value) = option.split_once('=').ok_or_else(invalid)?;
            pairs.push((percent_decode(key).ok_or_else(invalid)?, percent_decode(value).ok_or_else(invalid)?));
        }

        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        match scheme {
            "unix" => {
                if let Some(name) = get("abstract") {
                    Ok(Address::UnixAbstract { name })
                } else if let Some(path) = get("path") {
                    Ok(Address::Unix { path })
                } else {
                    Err(invalid())
                }
            }
            "tcp" | "nonce-tcp" => {
                let host = get("host").ok_or_else(invalid)?;
                let port = get("port")
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(invalid)?;

                let family = match get("family").as_deref() {
                    None | Some("") | Some("unspecified") => AddressFamily::Unspecified,
                    Some("ipv4") => AddressFamily::Ipv4,
                    Some("ipv6") => AddressFamily::Ipv6,
                    Some(..) => return Err(invalid()),
                };

                if scheme == "tcp" {
                    Ok(Address::Tcp { host, port, family })
                } else {
                    let noncefile = get("noncefile").ok_or_else(invalid)?;
                    Ok(Address::NonceTcp {
                        host,
                        port,
                        family,
                        noncefile,
                    })
                }
            }
            _ => Err(invalid()),
        }
    }

    /// Open a stream to the address.
    ///
    /// For `nonce-tcp`, the nonce cookie is read and sent before the stream
    /// is handed back.
    pub(crate) async fn connect(&self) -> Result<Stream> {
        match self {
            Address::Unix { path } => Ok(Stream::Unix(UnixStream::connect(path).await?)),
            Address::UnixAbstract { name } => connect_abstract(name).await,
            Address::Tcp { host, port, family } => {
                Ok(Stream::Tcp(connect_tcp(host, *port, *family).await?))
            }
            Address::NonceTcp {
                host,
                port,
                family,
                noncefile,
            } => {
                let nonce = tokio::fs::read(noncefile).await?;
                let mut stream = connect_tcp(host, *port, *family).await?;
                stream.write_all(&nonce).await?;
                Ok(Stream::Tcp(stream))
            }
        }
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

async fn connect_tcp(host: &str, port: u16, family: AddressFamily) -> Result<TcpStream> {
    let addrs = lookup_host((host, port)).await?;

    let wanted = |addr: &SocketAddr| match family {
        AddressFamily::Ipv4 => matches!(addr.ip(), IpAddr::V4(..)),
        AddressFamily::Ipv6 => matches!(addr.ip(), IpAddr::V6(..)),
        AddressFamily::Unspecified => true,
    };

    let mut last_error = None;

    for addr in addrs.filter(wanted) {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(Error::from(e)),
        None => Err(Error::new(ErrorKind::InvalidAddress(format!(
            "{host}:{port}"
        )))),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
async fn connect_abstract(name: &str) -> Result<Stream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    Ok(Stream::Unix(UnixStream::from_std(stream)?))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
async fn connect_abstract(name: &str) -> Result<Stream> {
    Err(Error::new(ErrorKind::InvalidAddress(format!(
        "unix:abstract={name} is not supported on this platform"
    ))))
}

/// Decode a percent-encoded address component.
fn percent_decode(input: &str) -> Option<String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();

    while let Some(b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }

        let hi = bytes.next()?;
        let lo = bytes.next()?;
        let decoded = crate::utils::hex_decode(&[hi, lo])?;
        out.push(decoded[0]);
    }

    String::from_utf8(out).ok()
}

/// A connected bus transport.
pub(crate) enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    /// Split the stream into independently owned halves, so that one task
    /// may read while another writes.
    pub(crate) fn into_split(self) -> (StreamReadHalf, StreamWriteHalf) {
        match self {
            Stream::Unix(stream) => {
                let (r, w) = stream.into_split();
                (StreamReadHalf::Unix(r), StreamWriteHalf::Unix(w))
            }
            Stream::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (StreamReadHalf::Tcp(r), StreamWriteHalf::Tcp(w))
            }
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// The read half of a [`Stream`].
pub(crate) enum StreamReadHalf {
    Unix(tokio::net::unix::OwnedReadHalf),
    Tcp(tokio::net::tcp::OwnedReadHalf),
}

impl AsyncRead for StreamReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamReadHalf::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            StreamReadHalf::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// The write half of a [`Stream`].
pub(crate) enum StreamWriteHalf {
    Unix(tokio::net::unix::OwnedWriteHalf),
    Tcp(tokio::net::tcp::OwnedWriteHalf),
}

impl AsyncWrite for StreamWriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_flush(cx),
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, AddressFamily};

    #[test]
    fn test_parse_unix() {
        assert_eq!(
            Address::parse("unix:path=/tmp/dbus%3dsock").unwrap(),
            Address::Unix {
                path: "/tmp/dbus=sock".into()
            }
        );

        assert_eq!(
            Address::parse("unix:abstract=/tmp/dbus%3dsock").unwrap(),
            Address::UnixAbstract {
                name: "/tmp/dbus=sock".into()
            }
        );

        assert!(Address::parse("unix:guid=0").is_err());
    }

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            Address::parse("tcp:host=localhost,port=4444").unwrap(),
            Address::Tcp {
                host: "localhost".into(),
                port: 4444,
                family: AddressFamily::Unspecified,
            }
        );

        assert_eq!(
            Address::parse("tcp:host=localhost,port=4444,family=ipv4").unwrap(),
            Address::Tcp {
                host: "localhost".into(),
                port: 4444,
                family: AddressFamily::Ipv4,
            }
        );

        assert_eq!(
            Address::parse("tcp:host=localhost,port=4444,family=ipv6").unwrap(),
            Address::Tcp {
                host: "localhost".into(),
                port: 4444,
                family: AddressFamily::Ipv6,
            }
        );

        assert!(Address::parse("tcp:host=localhost,port=4444,family=ipx").is_err());
        assert!(Address::parse("tcp:host=localhost").is_err());
    }

    #[test]
    fn test_parse_nonce_tcp() {
        assert_eq!(
            Address::parse("nonce-tcp:host=localhost,port=4444,noncefile=/tmp/foo").unwrap(),
            Address::NonceTcp {
                host: "localhost".into(),
                port: 4444,
                family: AddressFamily::Unspecified,
                noncefile: "/tmp/foo".into(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Address::parse("launchd").is_err());
        assert!(Address::parse("unix:path").is_err());
        assert!(Address::parse("unix:path=/tmp/%zz").is_err());
    }

    #[tokio::test]
    async fn test_unix_dial() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("bus.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();

        let address = Address::parse(&format!("unix:path={}", socket.display())).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        address.connect().await.unwrap();
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_nonce_tcp_dial_sends_cookie() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let noncefile = dir.path().join("nonce");
        std::fs::write(&noncefile, b"nonce-data").unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 10];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let address = Address::parse(&format!(
            "nonce-tcp:host=127.0.0.1,port={port},noncefile={}",
            noncefile.display()
        ))
        .unwrap();

        address.connect().await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"nonce-data");
    }
}
