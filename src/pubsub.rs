//! Subscription-mode receiver.
//!
//! A receiver owns a dedicated dialled connection for its whole lifetime;
//! it is never returned to the pool. After the first `SUBSCRIBE` or
//! `PSUBSCRIBE` the server only accepts subscription commands on it, and
//! pushes frames that are either acks (consumed here) or messages (yielded
//! to the caller).

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use crate::command::{Arg, Command};
use crate::config::ConnectOptions;
use crate::connection::{self, Connection};
use crate::decode::{self, DecodeMode, Output};
use crate::error::Error;
use crate::resp::Reply;

/// A long-lived subscription connection multiplexing message streams.
///
/// Unlike the command facade, decoding modifiers persist across received
/// messages.
pub struct PubSub {
    conn: Connection,
    mode: DecodeMode,
    with_channel: bool,
}

impl PubSub {
    pub(crate) async fn connect(
        opts: &ConnectOptions,
        names: Vec<String>,
    ) -> Result<Self, Error> {
        let mut conn = connection::connect(opts).await?;
        conn.enter_subscription();
        let mut this = Self {
            conn,
            mode: DecodeMode::default(),
            with_channel: false,
        };

        let (patterns, channels): (Vec<_>, Vec<_>) =
            names.into_iter().partition(|n| is_pattern(n));
        if !channels.is_empty() {
            this.send("SUBSCRIBE", channels).await?;
        }
        if !patterns.is_empty() {
            this.send("PSUBSCRIBE", patterns).await?;
        }
        Ok(this)
    }

    /// Decode message payloads as UTF-8 text.
    pub fn strdecode(mut self) -> Self {
        self.mode = DecodeMode::Str;
        self
    }

    /// Decode message payloads as text, JSON containers and numbers.
    pub fn autodecode(mut self) -> Self {
        self.mode = DecodeMode::Auto;
        self
    }

    /// Alias for [`PubSub::autodecode`].
    pub fn fulldecode(self) -> Self {
        self.autodecode()
    }

    /// Yield `(channel, payload)` pairs instead of bare payloads.
    pub fn with_channel(mut self) -> Self {
        self.with_channel = true;
        self
    }

    pub async fn subscribe(&mut self, channel: impl Into<String>) -> Result<(), Error> {
        self.send("SUBSCRIBE", vec![channel.into()]).await
    }

    pub async fn psubscribe(&mut self, pattern: impl Into<String>) -> Result<(), Error> {
        self.send("PSUBSCRIBE", vec![pattern.into()]).await
    }

    pub async fn unsubscribe(&mut self, channel: impl Into<String>) -> Result<(), Error> {
        self.send("UNSUBSCRIBE", vec![channel.into()]).await
    }

    pub async fn punsubscribe(&mut self, pattern: impl Into<String>) -> Result<(), Error> {
        self.send("PUNSUBSCRIBE", vec![pattern.into()]).await
    }

    /// Wait for the next published message. Subscription acks are consumed
    /// internally; message order per channel follows server delivery order.
    pub async fn recv(&mut self) -> Result<Output, Error> {
        loop {
            let reply = self.conn.read_reply().await?;
            if let Some(msg) = self.message(reply)? {
                return Ok(msg);
            }
        }
    }

    /// Drop all subscriptions and close the socket. Best effort: server
    /// state dies with the connection either way.
    pub async fn close(mut self) {
        for name in ["UNSUBSCRIBE", "PUNSUBSCRIBE"] {
            if let Ok(cmd) = Command::new(name, []) {
                let _ = self.conn.send(&cmd).await;
            }
        }
        self.conn.shutdown().await;
        tracing::debug!("subscription connection closed");
    }

    async fn send(&mut self, name: &str, names: Vec<String>) -> Result<(), Error> {
        let cmd = Command::new(name, names.into_iter().map(Arg::from))?;
        self.conn.send(&cmd).await
    }

    fn message(&self, reply: Reply) -> Result<Option<Output>, Error> {
        let Reply::Array(Some(items)) = reply else {
            // PONG and other stray frames are not messages.
            return Ok(None);
        };
        let kind = match items.first() {
            Some(Reply::Bulk(Some(kind))) => kind.clone(),
            _ => {
                return Err(Error::Protocol(
                    "malformed frame in subscription mode".into(),
                ));
            }
        };

        match (kind.as_ref(), items.len()) {
            (b"message", 3) => {
                let mut items = items.into_iter();
                let channel = items.nth(1);
                let payload = items.next();
                Ok(Some(self.deliver(channel, payload)))
            }
            (b"pmessage", 4) => {
                let mut items = items.into_iter();
                let channel = items.nth(2);
                let payload = items.next();
                Ok(Some(self.deliver(channel, payload)))
            }
            (b"subscribe" | b"unsubscribe" | b"psubscribe" | b"punsubscribe", _) => {
                tracing::trace!("subscription ack consumed");
                Ok(None)
            }
            (b"pong", _) => Ok(None),
            _ => Err(Error::Protocol(
                "unexpected frame in subscription mode".into(),
            )),
        }
    }

    fn deliver(&self, channel: Option<Reply>, payload: Option<Reply>) -> Output {
        let payload = decode::decode_reply(payload.unwrap_or(Reply::Bulk(None)), self.mode);
        if !self.with_channel {
            return payload;
        }
        let channel = match channel {
            Some(Reply::Bulk(Some(b))) => String::from_utf8_lossy(&b).into_owned(),
            Some(Reply::Simple(s)) => s,
            _ => String::new(),
        };
        Output::List(vec![Output::Str(channel), payload])
    }
}

impl<'a> IntoFuture for &'a mut PubSub {
    type Output = Result<Output, Error>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Output, Error>> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.recv())
    }
}

fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}
