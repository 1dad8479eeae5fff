//! Connection URL parsing.
//!
//! Recognised schemes:
//!
//! - `redis://[:password@]host[:port]/[db]` — plain TCP
//! - `rediss://…` or `redis+tls://…` — TCP with TLS
//! - `redis+unix:///path/to.sock` — Unix domain socket
//! - `redis+unix+tls://sni-host/path/to.sock` — Unix socket with TLS; the
//!   authority names the certificate hostname
//!
//! The database index comes from the path component (TCP variants) or from a
//! `database=<n>` query parameter.

use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Error;

pub(crate) const DEFAULT_PORT: u16 = 6379;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAddr {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

/// Where and how to connect, as extracted from a connection URL.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub(crate) addr: ServerAddr,
    pub(crate) tls: bool,
    /// Hostname used for SNI and certificate validation when `tls` is set.
    pub(crate) tls_host: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) db: u32,
}

impl ConnectOptions {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let url = Url::parse(input).map_err(|e| Error::Config(format!("{input}: {e}")))?;

        let (unix, tls) = match url.scheme() {
            "redis" => (false, false),
            "rediss" | "redis+tls" => (false, true),
            "redis+unix" => (true, false),
            "redis+unix+tls" => (true, true),
            other => {
                return Err(Error::Config(format!(
                    "unsupported scheme '{other}' in '{input}'"
                )));
            }
        };

        let username = match url.username() {
            "" => None,
            user => Some(decode_userinfo(user, "username")?),
        };
        let password = url
            .password()
            .map(|pw| decode_userinfo(pw, "password"))
            .transpose()?;
        let db = database_index(&url, unix)?;
        let host = url.host_str().filter(|h| !h.is_empty()).map(str::to_owned);

        let (addr, tls_host) = if unix {
            let path = url.path();
            if !path.starts_with('/') || path.len() == 1 {
                return Err(Error::Config(format!(
                    "unix socket path missing in '{input}'"
                )));
            }
            if tls && host.is_none() {
                return Err(Error::Config(
                    "TLS over a unix socket needs a hostname for SNI".into(),
                ));
            }
            (
                ServerAddr::Unix {
                    path: PathBuf::from(path),
                },
                host,
            )
        } else {
            let host =
                host.ok_or_else(|| Error::Config(format!("missing host in '{input}'")))?;
            let port = url.port().unwrap_or(DEFAULT_PORT);
            (
                ServerAddr::Tcp {
                    host: host.clone(),
                    port,
                },
                Some(host),
            )
        };

        Ok(Self {
            addr,
            tls,
            tls_host,
            username,
            password,
            db,
        })
    }
}

fn decode_userinfo(raw: &str, what: &str) -> Result<String, Error> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::Config(format!("{what} is not valid UTF-8")))
}

fn database_index(url: &Url, unix: bool) -> Result<u32, Error> {
    if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == "database") {
        return value
            .parse::<u32>()
            .map_err(|_| Error::Config(format!("invalid database index '{value}'")));
    }
    if unix {
        // The path component is the socket path; only the query can select.
        return Ok(0);
    }
    match url.path().trim_matches('/') {
        "" => Ok(0),
        path => path
            .parse::<u32>()
            .map_err(|_| Error::Config(format!("invalid database index in path '{path}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tcp_with_defaults() {
        let opts = ConnectOptions::parse("redis://cache.local").unwrap();
        assert_eq!(
            opts.addr,
            ServerAddr::Tcp {
                host: "cache.local".into(),
                port: DEFAULT_PORT
            }
        );
        assert!(!opts.tls);
        assert_eq!(opts.db, 0);
        assert_eq!(opts.password, None);
    }

    #[test]
    fn port_password_and_database_path() {
        let opts = ConnectOptions::parse("redis://:s%40cret@cache.local:6380/2").unwrap();
        assert_eq!(
            opts.addr,
            ServerAddr::Tcp {
                host: "cache.local".into(),
                port: 6380
            }
        );
        assert_eq!(opts.password.as_deref(), Some("s@cret"));
        assert_eq!(opts.username, None);
        assert_eq!(opts.db, 2);
    }

    #[test]
    fn acl_username_is_kept() {
        let opts = ConnectOptions::parse("redis://app:pw@cache.local").unwrap();
        assert_eq!(opts.username.as_deref(), Some("app"));
        assert_eq!(opts.password.as_deref(), Some("pw"));
    }

    #[test]
    fn database_query_parameter() {
        let opts = ConnectOptions::parse("redis://cache.local?database=7").unwrap();
        assert_eq!(opts.db, 7);
    }

    #[test]
    fn tls_schemes() {
        for scheme in ["rediss", "redis+tls"] {
            let opts = ConnectOptions::parse(&format!("{scheme}://cache.local")).unwrap();
            assert!(opts.tls);
            assert_eq!(opts.tls_host.as_deref(), Some("cache.local"));
        }
    }

    #[test]
    fn unix_socket_path() {
        let opts = ConnectOptions::parse("redis+unix:///var/run/redis.sock").unwrap();
        assert_eq!(
            opts.addr,
            ServerAddr::Unix {
                path: "/var/run/redis.sock".into()
            }
        );
        assert!(!opts.tls);
        assert_eq!(opts.db, 0);
    }

    #[test]
    fn unix_socket_with_database_query() {
        let opts =
            ConnectOptions::parse("redis+unix:///var/run/redis.sock?database=3").unwrap();
        assert_eq!(opts.db, 3);
    }

    #[test]
    fn unix_tls_takes_sni_from_authority() {
        let opts =
            ConnectOptions::parse("redis+unix+tls://cache.internal/var/run/redis.sock").unwrap();
        assert!(opts.tls);
        assert_eq!(opts.tls_host.as_deref(), Some("cache.internal"));
        assert_eq!(
            opts.addr,
            ServerAddr::Unix {
                path: "/var/run/redis.sock".into()
            }
        );
    }

    #[test]
    fn unix_tls_without_hostname_is_rejected() {
        assert!(ConnectOptions::parse("redis+unix+tls:///var/run/redis.sock").is_err());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(ConnectOptions::parse("http://cache.local").is_err());
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(ConnectOptions::parse("redis:///0").is_err());
    }

    #[test]
    fn bad_database_index_is_rejected() {
        assert!(ConnectOptions::parse("redis://cache.local/abc").is_err());
        assert!(ConnectOptions::parse("redis://cache.local?database=x").is_err());
    }
}
