//! A scripted stand-in for a Redis server.
//!
//! Each script entry describes one client connection as an ordered list of
//! exchanges: the exact request bytes the client is expected to send and
//! the raw RESP reply to write back. An empty reply closes the connection
//! after the request, which is how broken-transport scenarios are staged.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct Exchange {
    pub expect: Vec<u8>,
    pub reply: Vec<u8>,
}

pub fn exchange(expect: impl Into<Vec<u8>>, reply: impl Into<Vec<u8>>) -> Exchange {
    Exchange {
        expect: expect.into(),
        reply: reply.into(),
    }
}

/// Encode one command frame the way the client puts it on the wire.
pub fn frame(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for p in parts {
        out.extend_from_slice(format!("${}\r\n", p.len()).as_bytes());
        out.extend_from_slice(p);
        out.extend_from_slice(b"\r\n");
    }
    out
}

pub struct MockServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// One inner vec per expected client connection, accepted in order.
    pub async fn start(scripts: Vec<Vec<Exchange>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            for script in scripts {
                let (mut sock, _) = listener.accept().await.unwrap();
                for ex in script {
                    let mut got = vec![0u8; ex.expect.len()];
                    sock.read_exact(&mut got).await.unwrap();
                    assert_eq!(
                        String::from_utf8_lossy(&got),
                        String::from_utf8_lossy(&ex.expect),
                        "client sent unexpected bytes"
                    );
                    if !ex.reply.is_empty() {
                        sock.write_all(&ex.reply).await.unwrap();
                    }
                }
                // Dropping the socket here closes the connection; the next
                // script entry services a fresh one.
            }
        });
        Self { addr, handle }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the script to play out, propagating any assertion failure
    /// from the server task.
    pub async fn finish(self) {
        self.handle.await.unwrap();
    }
}
