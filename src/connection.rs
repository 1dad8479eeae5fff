//! Socket dialing and the pipelined connection.
//!
//! A [`Connection`] owns one byte stream. Commands are appended to a write
//! buffer, flushed in one write, and their replies read back in order. The
//! `clean` bit tracks whether the reply stream is still aligned with the
//! command stream; a connection that is not clean is closed instead of
//! pooled.

use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::command::{Arg, Command};
use crate::config::{ConnectOptions, ServerAddr};
use crate::error::Error;
use crate::resp::{self, Reply};

trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite + ?Sized> AsyncReadWrite for T {}

type DynStream = Pin<Box<dyn AsyncReadWrite + Send>>;

const READ_BUF_CAPACITY: usize = 8 * 1024;

pub(crate) struct Connection {
    stream: DynStream,
    rbuf: BytesMut,
    wbuf: BytesMut,
    pending: usize,
    clean: bool,
}

impl Connection {
    fn new(stream: DynStream) -> Self {
        Self {
            stream,
            rbuf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            wbuf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            pending: 0,
            clean: true,
        }
    }

    /// Whether the reply stream is still aligned and the connection may be
    /// handed back to the pool.
    pub(crate) fn is_clean(&self) -> bool {
        self.clean
    }

    /// Append one command frame to the write buffer.
    pub(crate) fn enqueue(&mut self, cmd: &Command) {
        resp::write_command(&mut self.wbuf, cmd.parts());
        self.pending += 1;
    }

    /// Flush all queued frames and read one reply per queued command, in
    /// command order.
    ///
    /// The connection counts as dirty for the whole flush/drain window, so a
    /// caller cancelled mid-batch leaves it unpoolable: its reply stream no
    /// longer matches the command stream.
    pub(crate) async fn await_batch(&mut self) -> Result<Vec<Reply>, Error> {
        let expected = self.pending;
        self.pending = 0;
        self.clean = false;

        let frames = self.wbuf.split();
        self.stream.write_all(&frames).await?;
        self.stream.flush().await?;

        let mut replies = Vec::with_capacity(expected);
        while replies.len() < expected {
            replies.push(self.read_one().await?);
        }
        self.clean = true;
        Ok(replies)
    }

    /// Read a single reply frame. Used by the subscription mode, where the
    /// server pushes frames without a matching command.
    pub(crate) async fn read_reply(&mut self) -> Result<Reply, Error> {
        self.read_one().await
    }

    async fn read_one(&mut self) -> Result<Reply, Error> {
        loop {
            if let Some(reply) = resp::parse(&mut self.rbuf)? {
                return Ok(reply);
            }
            let n = self.stream.read_buf(&mut self.rbuf).await?;
            if n == 0 {
                return Err(Error::Protocol(
                    "connection closed before reply was complete".into(),
                ));
            }
        }
    }

    /// Fire-and-forget write of one command, bypassing the reply ledger.
    /// Only valid in subscription mode, where acks arrive out of band.
    pub(crate) async fn send(&mut self, cmd: &Command) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        resp::write_command(&mut buf, cmd.parts());
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Switch into subscription mode. The reply stream stops matching the
    /// command stream one-to-one, so the connection can never be pooled
    /// again.
    pub(crate) fn enter_subscription(&mut self) {
        self.clean = false;
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// One command round-trip during session setup. Transport failures and
    /// error replies both invalidate the session, so they are promoted to
    /// `ConnectError`.
    async fn setup_roundtrip(&mut self, cmd: &Command, stage: &str) -> Result<(), Error> {
        self.enqueue(cmd);
        let mut replies = self
            .await_batch()
            .await
            .map_err(|e| Error::Connect(format!("{stage} failed: {e}")))?;
        match replies.pop() {
            Some(Reply::Error(msg)) => Err(Error::Connect(format!("{stage} rejected: {msg}"))),
            Some(_) => Ok(()),
            None => Err(Error::Connect(format!("{stage} produced no reply"))),
        }
    }
}

/// Dial a server: open the socket, wrap in TLS if asked, then authenticate
/// and select the database.
pub(crate) async fn connect(opts: &ConnectOptions) -> Result<Connection, Error> {
    let stream = open_stream(opts).await?;
    let mut conn = Connection::new(stream);

    if let Some(password) = &opts.password {
        let cmd = match &opts.username {
            Some(user) => Command::new(
                "AUTH",
                [Arg::from(user.as_str()), Arg::from(password.as_str())],
            )?,
            None => Command::new("AUTH", [Arg::from(password.as_str())])?,
        };
        conn.setup_roundtrip(&cmd, "AUTH").await?;
    }

    if opts.db != 0 {
        let cmd = Command::new("SELECT", [Arg::from(i64::from(opts.db))])?;
        conn.setup_roundtrip(&cmd, "SELECT").await?;
    }

    tracing::debug!(addr = ?opts.addr, db = opts.db, "connection established");
    Ok(conn)
}

async fn open_stream(opts: &ConnectOptions) -> Result<DynStream, Error> {
    match &opts.addr {
        ServerAddr::Tcp { host, port } => {
            let sock = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|e| Error::Connect(format!("{host}:{port}: {e}")))?;
            sock.set_nodelay(true)
                .map_err(|e| Error::Connect(e.to_string()))?;
            if opts.tls {
                tls_wrap(sock, opts).await
            } else {
                Ok(Box::pin(sock))
            }
        }
        #[cfg(unix)]
        ServerAddr::Unix { path } => {
            let sock = UnixStream::connect(path)
                .await
                .map_err(|e| Error::Connect(format!("{}: {e}", path.display())))?;
            if opts.tls {
                tls_wrap(sock, opts).await
            } else {
                Ok(Box::pin(sock))
            }
        }
        #[cfg(not(unix))]
        ServerAddr::Unix { .. } => Err(Error::Connect(
            "unix sockets are not supported on this platform".into(),
        )),
    }
}

async fn tls_wrap<S>(stream: S, opts: &ConnectOptions) -> Result<DynStream, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let host = opts
        .tls_host
        .clone()
        .ok_or_else(|| Error::Connect("TLS requires a hostname for SNI".into()))?;
    let name = ServerName::try_from(host.clone())
        .map_err(|_| Error::Connect(format!("invalid TLS hostname '{host}'")))?;
    let tls = tls_connector()
        .connect(name, stream)
        .await
        .map_err(|e| Error::Connect(format!("TLS handshake with {host} failed: {e}")))?;
    Ok(Box::pin(tls))
}

fn tls_connector() -> TlsConnector {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (Connection, DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        (Connection::new(Box::pin(client)), server)
    }

    #[tokio::test]
    async fn batch_replies_arrive_in_command_order() {
        let (mut conn, mut server) = pair();
        server.write_all(b"+OK\r\n$2\r\nhi\r\n").await.unwrap();

        conn.enqueue(&Command::new("SET", [Arg::from("k"), Arg::from("hi")]).unwrap());
        conn.enqueue(&Command::new("GET", [Arg::from("k")]).unwrap());
        let replies = conn.await_batch().await.unwrap();

        assert_eq!(
            replies,
            vec![
                Reply::Simple("OK".into()),
                Reply::Bulk(Some(Bytes::from_static(b"hi"))),
            ]
        );
        assert!(conn.is_clean());

        let mut sent = vec![0u8; 48];
        server.read_exact(&mut sent).await.unwrap();
        assert_eq!(
            &sent[..],
            &b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nhi\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]
        );
    }

    #[tokio::test]
    async fn truncated_reply_breaks_the_connection() {
        let (mut conn, mut server) = pair();
        conn.enqueue(&Command::new("GET", [Arg::from("k")]).unwrap());

        let client = conn.await_batch();
        let feeder = async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await;
            server.write_all(b"$5\r\nhel").await.unwrap();
            drop(server);
        };
        let (res, ()) = tokio::join!(client, feeder);

        assert!(matches!(res, Err(Error::Protocol(_))));
        assert!(!conn.is_clean());
    }

    #[tokio::test]
    async fn protocol_error_breaks_the_connection() {
        let (mut conn, mut server) = pair();
        server.write_all(b"?bogus\r\n").await.unwrap();

        conn.enqueue(&Command::new("PING", []).unwrap());
        let err = conn.await_batch().await.unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        assert!(!conn.is_clean());
    }

    #[tokio::test]
    async fn subscription_mode_marks_connection_dirty() {
        let (mut conn, _server) = pair();
        assert!(conn.is_clean());
        conn.enter_subscription();
        assert!(!conn.is_clean());
    }
}
