//! Line-oriented transport over any async byte stream.
//!
//! TCP sockets and serial ports differ only in how the stream is opened, so
//! both are a [`StreamTransport`] with a different [`LinkOpener`]. The transport
//! owns the stream behind a `BufReader` and re-opens it lazily after the link
//! drops.

use ate_core::{block, expects_response, EndpointAddress, Transport, TransportError, TransportKind, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, instrument};

/// Byte stream usable as an instrument link.
pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

/// Boxed link stream.
pub type DynLink = Box<dyn LinkIo>;

/// Opens (and re-opens) the stream behind a [`StreamTransport`].
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Open a fresh stream within `timeout`.
    async fn open(&self, timeout: Duration) -> TransportResult<DynLink>;

    /// Short description for logs (`tcp 10.0.0.2:5025`).
    fn describe(&self) -> String;
}

/// Line terminator appended to commands and expected after replies.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Longest text reply accepted, in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Largest binary block payload accepted, in bytes.
pub const DEFAULT_MAX_BLOCK_LEN: usize = 64 * 1024 * 1024;

/// Text/binary exchanges over a byte stream.
pub struct StreamTransport {
    address: EndpointAddress,
    opener: Option<Box<dyn LinkOpener>>,
    link: Option<BufReader<DynLink>>,
    terminator: String,
    max_line_len: usize,
    max_block_len: usize,
}

impl StreamTransport {
    /// Transport that opens its stream through `opener` on first use.
    pub fn new(address: EndpointAddress, opener: Box<dyn LinkOpener>) -> Self {
        Self {
            address,
            opener: Some(opener),
            link: None,
            terminator: DEFAULT_TERMINATOR.to_string(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }

    /// Transport over an already-open stream. Once that stream is lost it
    /// cannot be re-opened.
    pub fn from_stream(address: EndpointAddress, stream: impl LinkIo + 'static) -> Self {
        Self {
            address,
            opener: None,
            link: Some(BufReader::new(Box::new(stream))),
            terminator: DEFAULT_TERMINATOR.to_string(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }

    /// Use a different command terminator (e.g. `"\r\n"`).
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Cap reply lines at `max_line_len` bytes and block payloads at
    /// `max_block_len` bytes. Larger replies are protocol errors.
    pub fn with_read_limits(mut self, max_line_len: usize, max_block_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self.max_block_len = max_block_len;
        self
    }

    async fn ensure_link(&mut self, timeout: Duration) -> TransportResult<&mut BufReader<DynLink>> {
        if self.link.is_none() {
            let opener = self.opener.as_ref().ok_or_else(|| {
                TransportError::disconnected_permanently(format!(
                    "link to {} lost and cannot be re-opened",
                    self.address
                ))
            })?;
            debug!(address = %self.address, link = %opener.describe(), "Opening link");
            let stream = opener.open(timeout).await?;
            self.link = Some(BufReader::new(stream));
        }
        self.link.as_mut().ok_or_else(|| {
            TransportError::disconnected(format!("link to {} unavailable", self.address))
        })
    }

    /// Forget the stream after a failure that leaves it unusable. Pre-opened
    /// streams are kept after timeouts since they cannot be replaced.
    fn drop_link_after(&mut self, err: &TransportError) {
        use ate_core::TransportErrorKind::*;
        let drop = match err.kind {
            Disconnected => true,
            Timeout => self.opener.is_some(),
            Protocol => false,
        };
        if drop {
            debug!(address = %self.address, error = %err, "Dropping link");
            self.link = None;
        }
    }

    async fn write_command(
        link: &mut BufReader<DynLink>,
        command: &str,
        terminator: &str,
    ) -> TransportResult<()> {
        // Discard anything left over from an earlier exchange.
        let stale = link.buffer().len();
        link.consume(stale);

        let stream = link.get_mut();
        stream
            .write_all(format!("{}{}", command, terminator).as_bytes())
            .await
            .map_err(|e| TransportError::from_io(&e, "write"))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::from_io(&e, "flush"))
    }

    async fn read_reply(link: &mut BufReader<DynLink>, max_len: usize) -> TransportResult<String> {
        let mut line = String::new();
        let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
        let n = AsyncReadExt::take(&mut *link, limit)
            .read_line(&mut line)
            .await
            .map_err(|e| TransportError::from_io(&e, "read"))?;
        if n == 0 {
            return Err(TransportError::disconnected("connection closed by peer"));
        }
        if n > max_len {
            return Err(TransportError::protocol(format!(
                "reply exceeds {} bytes",
                max_len
            )));
        }
        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    async fn read_block(link: &mut BufReader<DynLink>, max_len: usize) -> TransportResult<Bytes> {
        let io = |e: std::io::Error| TransportError::from_io(&e, "read block");

        let mut head = [0u8; 2];
        link.read_exact(&mut head).await.map_err(io)?;
        let mut header = head.to_vec();
        let digits = (head[1] as char).to_digit(10).unwrap_or(0) as usize;
        if head[0] != b'#' || digits == 0 {
            return Err(block::parse_header(&header).err().unwrap_or_else(|| {
                TransportError::protocol("malformed binary block header")
            }));
        }
        let mut len_digits = vec![0u8; digits];
        link.read_exact(&mut len_digits).await.map_err(io)?;
        header.extend_from_slice(&len_digits);
        let parsed = block::parse_header(&header)?;
        if parsed.payload_len > max_len {
            return Err(TransportError::protocol(format!(
                "block of {} bytes exceeds limit of {} bytes",
                parsed.payload_len, max_len
            )));
        }

        let mut payload = vec![0u8; parsed.payload_len];
        link.read_exact(&mut payload).await.map_err(io)?;

        // Swallow the terminator if it already arrived.
        if link.buffer().first() == Some(&b'\n') {
            link.consume(1);
        }
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Real
    }

    fn address(&self) -> &EndpointAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn connect(&mut self, timeout: Duration) -> TransportResult<()> {
        self.ensure_link(timeout).await.map(|_| ())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if let Some(mut link) = self.link.take() {
            let _ = link.get_mut().shutdown().await;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.address), err)]
    async fn send(&mut self, command: &str, timeout: Duration) -> TransportResult<String> {
        let terminator = self.terminator.clone();
        let max_len = self.max_line_len;
        let exchange = async {
            let link = self.ensure_link(timeout).await?;
            Self::write_command(link, command, &terminator).await?;
            if expects_response(command) {
                Self::read_reply(link, max_len).await
            } else {
                Ok(String::new())
            }
        };
        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "no reply to '{}' within {:?}",
                command, timeout
            ))),
        };
        if let Err(err) = &result {
            self.drop_link_after(err);
        }
        result
    }

    #[instrument(skip(self), fields(address = %self.address), err)]
    async fn send_binary_query(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> TransportResult<Bytes> {
        let terminator = self.terminator.clone();
        let max_len = self.max_block_len;
        let exchange = async {
            let link = self.ensure_link(timeout).await?;
            Self::write_command(link, command, &terminator).await?;
            Self::read_block(link, max_len).await
        };
        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "no block reply to '{}' within {:?}",
                command, timeout
            ))),
        };
        if let Err(err) = &result {
            self.drop_link_after(err);
        }
        result
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("address", &self.address)
            .field("connected", &self.link.is_some())
            .field("reopenable", &self.opener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ate_core::TransportErrorKind;
    use tokio::io::duplex;

    fn addr() -> EndpointAddress {
        EndpointAddress::new("TCPIP0::test::5025::SOCKET")
    }

    #[tokio::test]
    async fn test_query_reads_one_line() {
        let (client, mut server) = duplex(1024);
        let mut t = StreamTransport::from_stream(addr(), client);

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\n");
            server.write_all(b"ACME,X1,42,1.0\r\n").await.unwrap();
            server
        });

        let reply = t.send("*IDN?", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, "ACME,X1,42,1.0");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_only_command_returns_empty() {
        let (client, _server) = duplex(1024);
        let mut t = StreamTransport::from_stream(addr(), client);
        assert_eq!(t.send("VOLT 5", Duration::from_secs(1)).await.unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (client, _server) = duplex(1024);
        let mut t = StreamTransport::from_stream(addr(), client);
        let err = t.send("MEAS:VOLT?", Duration::from_millis(200)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        // Pre-opened streams survive a timeout.
        assert!(t.is_connected());
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnect() {
        let (client, server) = duplex(1024);
        drop(server);
        let mut t = StreamTransport::from_stream(addr(), client);
        let err = t.send("*IDN?", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Disconnected);
        assert!(!t.is_connected());

        // Nothing to re-open from.
        let err = t.send("*IDN?", Duration::from_secs(1)).await.unwrap_err();
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_binary_block() {
        let (client, mut server) = duplex(4096);
        let mut t = StreamTransport::from_stream(addr(), client);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            let mut reply = block::encode(&[1, 2, 3, 4, 5]).to_vec();
            reply.push(b'\n');
            server.write_all(&reply).await.unwrap();
            server
        });
        let payload = t
            .send_binary_query("TRAC:DATA?", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&payload[..], &[1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_bad_block_header_is_protocol_error() {
        let (client, mut server) = duplex(4096);
        let mut t = StreamTransport::from_stream(addr(), client);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            server.write_all(b"1.0,2.0\n").await.unwrap();
            server
        });
        let err = t
            .send_binary_query("TRAC:DATA?", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_oversized_block_is_refused() {
        let (client, mut server) = duplex(4096);
        let mut t = StreamTransport::from_stream(addr(), client).with_read_limits(1024, 1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            server.write_all(b"#9999999999").await.unwrap();
            server
        });
        let err = t
            .send_binary_query("TRAC:DATA?", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Protocol);
        assert!(err.detail.contains("exceeds"), "{}", err.detail);
    }

    #[tokio::test]
    async fn test_overlong_reply_is_refused() {
        let (client, mut server) = duplex(4096);
        let mut t = StreamTransport::from_stream(addr(), client).with_read_limits(16, 1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            server.write_all(&[b'7'; 40]).await.unwrap();
            server.write_all(b"\n").await.unwrap();
            server
        });
        let err = t.send("MEAS:VOLT?", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Protocol);
    }
}
