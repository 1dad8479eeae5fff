//! The command facade: a chainable buffer of commands with decoding
//! modifiers, flushed as one pipelined batch when awaited.
//!
//! Transactions are a pattern on top of the same machinery: the facade
//! recognises `MULTI`/`EXEC`/`DISCARD`/`WATCH`/`UNWATCH` by name, swallows
//! the `+QUEUED` acks and reshapes the `EXEC` reply.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use crate::command::{self, Arg, Command};
use crate::decode::{self, DecodeMode, Output};
use crate::error::Error;
use crate::pool::{PoolInner, PooledConn};
use crate::resp::Reply;

/// Sugar methods are generated from this table; each entry funnels into
/// [`Db::command`].
macro_rules! commands {
    ($($name:ident => $cmd:literal ( $($arg:ident),* );)+) => {
        $(pub fn $name(&mut self $(, $arg: impl Into<Arg>)*) -> &mut Self {
            self.command($cmd, [$(($arg).into()),*])
        })+
    };
}

/// A buffered view onto the pool. Command methods append to the batch and
/// return `&mut Self`; awaiting the facade flushes the batch over one
/// pooled connection and hands back the decoded result.
pub struct Db {
    pool: Arc<PoolInner>,
    conn: Option<PooledConn>,
    batch: Vec<Command>,
    mode: DecodeMode,
    prevent_pooling: bool,
    in_transaction: bool,
    tx_queued: Vec<String>,
    deferred: Option<Error>,
}

impl Db {
    pub(crate) fn new(pool: Arc<PoolInner>) -> Self {
        Self {
            pool,
            conn: None,
            batch: Vec::new(),
            mode: DecodeMode::default(),
            prevent_pooling: false,
            in_transaction: false,
            tx_queued: Vec::new(),
            deferred: None,
        }
    }

    /// Queue one command. Arguments are coerced to bulk strings right away;
    /// a value that cannot be encoded surfaces when the batch is awaited.
    pub fn command<I>(&mut self, name: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = Arg>,
    {
        match Command::new(name, args) {
            Ok(cmd) => self.batch.push(cmd),
            Err(e) => {
                if self.deferred.is_none() {
                    self.deferred = Some(e);
                }
            }
        }
        self
    }

    /// Decode bulk payloads of the next awaited batch as UTF-8 text.
    pub fn strdecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Str;
        self
    }

    /// Decode bulk payloads of the next awaited batch as text, JSON
    /// containers and numbers.
    pub fn autodecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Auto;
        self
    }

    /// Alias for [`Db::autodecode`].
    pub fn fulldecode(&mut self) -> &mut Self {
        self.autodecode()
    }

    /// Close the connection after the next awaited batch instead of
    /// returning it to the pool.
    pub fn prevent_pooling(&mut self) -> &mut Self {
        self.prevent_pooling = true;
        self
    }

    commands! {
        ping => "PING"();
        get => "GET"(key);
        set => "SET"(key, value);
        del => "DEL"(key);
        exists => "EXISTS"(key);
        incr => "INCR"(key);
        decr => "DECR"(key);
        expire => "EXPIRE"(key, seconds);
        ttl => "TTL"(key);
        hset => "HSET"(key, fields);
        hget => "HGET"(key, field);
        hgetall => "HGETALL"(key);
        mset => "MSET"(fields);
        mget => "MGET"(key);
        lpush => "LPUSH"(key, value);
        rpush => "RPUSH"(key, value);
        lrange => "LRANGE"(key, start, stop);
        publish => "PUBLISH"(channel, message);
        watch => "WATCH"(key);
        unwatch => "UNWATCH"();
        multi => "MULTI"();
        exec => "EXEC"();
        discard => "DISCARD"();
    }

    /// Flush the batch and collect the decoded result.
    ///
    /// Equivalent to awaiting the facade directly.
    pub async fn run(&mut self) -> Result<Output, Error> {
        if let Some(err) = self.deferred.take() {
            self.batch.clear();
            return Err(err);
        }
        if self.batch.is_empty() {
            return Ok(Output::Nil);
        }

        if self.conn.is_none() {
            self.conn = Some(self.pool.acquire().await?);
        }
        let batch = std::mem::take(&mut self.batch);
        let replies = {
            let conn = self
                .conn
                .as_mut()
                .expect("connection acquired above")
                .conn_mut();
            for cmd in &batch {
                conn.enqueue(cmd);
            }
            conn.await_batch().await
        };

        let replies = match replies {
            Ok(replies) => replies,
            Err(e) => {
                // The reply stream is desynchronised; dropping the guard
                // closes the socket instead of pooling it.
                self.conn = None;
                self.in_transaction = false;
                self.tx_queued.clear();
                return Err(e);
            }
        };

        let mode = std::mem::take(&mut self.mode);
        let shaped = match self.shape(&batch, replies, mode) {
            Ok(shaped) => shaped,
            Err(e) => {
                // Session state no longer matches what the facade believes:
                // close the connection rather than pooling it.
                if let Some(mut conn) = self.conn.take() {
                    conn.set_discard(true);
                }
                self.in_transaction = false;
                self.tx_queued.clear();
                return Err(e);
            }
        };

        let prevent = std::mem::take(&mut self.prevent_pooling);
        if self.in_transaction {
            // A server-side MULTI context is open: pin the connection to
            // this facade, and make sure it is not pooled if the facade is
            // dropped before EXEC/DISCARD.
            if let Some(conn) = self.conn.as_mut() {
                conn.set_discard(true);
            }
        } else if let Some(mut conn) = self.conn.take() {
            conn.set_discard(prevent);
        }

        Ok(shaped)
    }

    /// Walk commands and replies in lockstep, tracking transaction state and
    /// filtering acknowledgement replies. One visible reply collapses to a
    /// scalar, several stay a list, none becomes nil.
    fn shape(
        &mut self,
        batch: &[Command],
        replies: Vec<Reply>,
        mode: DecodeMode,
    ) -> Result<Output, Error> {
        let mut visible = Vec::new();
        for (cmd, reply) in batch.iter().zip(replies) {
            let name = cmd.name();
            match name {
                "MULTI" => {
                    if let Reply::Error(msg) = reply {
                        // A refused MULTI invalidates the session state the
                        // facade believes it has.
                        return Err(Error::Protocol(format!("MULTI rejected: {msg}")));
                    }
                    self.in_transaction = true;
                    self.tx_queued.clear();
                }
                "EXEC" => {
                    self.in_transaction = false;
                    let queued = std::mem::take(&mut self.tx_queued);
                    visible.push(shape_exec(reply, &queued, mode));
                }
                "DISCARD" => {
                    self.in_transaction = false;
                    self.tx_queued.clear();
                    if let Reply::Error(msg) = reply {
                        visible.push(Output::Error(msg));
                    }
                }
                _ if self.in_transaction => {
                    // Queued commands answer +QUEUED; remember their names
                    // so the EXEC array can be filtered per command.
                    if let Reply::Error(msg) = reply {
                        visible.push(Output::Error(msg));
                    } else {
                        self.tx_queued.push(name.to_owned());
                    }
                }
                _ => {
                    if let Reply::Error(msg) = reply {
                        visible.push(Output::Error(msg));
                    } else if command::produces_output(name) {
                        visible.push(decode_shaped(name, reply, mode));
                    }
                }
            }
        }

        Ok(collapse(visible))
    }
}

impl<'a> IntoFuture for &'a mut Db {
    type Output = Result<Output, Error>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Output, Error>> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

fn collapse(mut visible: Vec<Output>) -> Output {
    if visible.len() > 1 {
        return Output::List(visible);
    }
    visible.pop().unwrap_or(Output::Nil)
}

/// Shape an `EXEC` reply: nil array means a watched key changed and the
/// transaction was discarded; otherwise the array holds one reply per
/// queued command, errors embedded in-line.
fn shape_exec(reply: Reply, queued: &[String], mode: DecodeMode) -> Output {
    match reply {
        Reply::Array(None) => Output::Bool(false),
        Reply::Array(Some(items)) => {
            let mut visible = Vec::new();
            for (name, item) in queued.iter().zip(items) {
                if let Reply::Error(msg) = item {
                    visible.push(Output::Error(msg));
                } else if command::produces_output(name) {
                    visible.push(decode_shaped(name, item, mode));
                }
            }
            if visible.is_empty() {
                // Every queued command was quiet: the transaction ran.
                Output::Bool(true)
            } else {
                collapse(visible)
            }
        }
        Reply::Error(msg) => Output::Error(msg),
        other => decode::decode_reply(other, mode),
    }
}

fn decode_shaped(name: &str, reply: Reply, mode: DecodeMode) -> Output {
    match reply {
        Reply::Array(Some(items))
            if command::reply_is_map(name) && items.len() % 2 == 0 =>
        {
            decode::fold_hash(items, mode)
        }
        other => decode::decode_reply(other, mode),
    }
}
