//! Pipelined asynchronous Redis client with URL-driven connection pooling.
//!
//! A [`Pool`] is created from a connection URL (`redis://`, `rediss://`,
//! `redis+tls://`, `redis+unix://`, `redis+unix+tls://`). It hands out
//! [`Db`] facades that buffer commands and flush them as one pipelined
//! batch when awaited; replies come back in command order, acknowledgement
//! replies filtered out and payloads decoded per the active modifier.
//!
//! ```no_run
//! use redpool::Pool;
//!
//! # async fn demo() -> Result<(), redpool::Error> {
//! let pool = Pool::new("redis://127.0.0.1/")?;
//! let mut db = pool.db();
//! db.set("greeting", "hello").await?;
//! let value = db.get("greeting").strdecode().await?;
//! assert_eq!(value.as_str(), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! `MULTI`/`EXEC`/`WATCH` transactions are recognised by command name on
//! the same facade, and [`Pool::pubsub`] opens a dedicated subscription
//! connection yielding published messages.

mod command;
mod config;
mod connection;
mod db;
mod decode;
mod error;
mod pool;
mod pubsub;
mod resp;

pub use command::{Arg, Command};
pub use config::{ConnectOptions, ServerAddr};
pub use db::Db;
pub use decode::{DecodeMode, Output};
pub use error::Error;
pub use pool::{Pool, DEFAULT_MAX_CONNECTIONS};
pub use pubsub::PubSub;
pub use resp::{Reply, MAX_BULK_LEN};
