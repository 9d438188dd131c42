//! Broker links: a redis client and the deadlines it is used with.
//!
//! Accepts the URLs the task queue is configured with,
//! `rediss://[[user]:password@]host[:port][/db]` for TLS and `redis://...`
//! for plaintext. Every connect and every command is bounded in time; a
//! broker that accepts the socket and then stalls surfaces as
//! [`BrokerError::Timeout`].

use std::fmt;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, ConnectionAddr, FromRedisValue, IntoConnectionInfo, TlsCertificates};
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::tls::{self, CertVerification};

/// How to establish a connection and how long to wait on it.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub verification: CertVerification,
    /// Bound on establishing a connection, handshake included.
    pub connect_timeout: Duration,
    /// Bound on the reply to a single non-blocking command.
    pub command_timeout: Duration,
}

impl ConnectOptions {
    /// Options with the command timeout equal to the connect timeout.
    pub const fn new(verification: CertVerification, connect_timeout: Duration) -> Self {
        Self {
            verification,
            connect_timeout,
            command_timeout: connect_timeout,
        }
    }

    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// A configured, not yet connected, broker address.
#[derive(Clone)]
pub struct BrokerLink {
    client: Client,
    options: ConnectOptions,
    /// The address with credentials removed, for logs.
    address: String,
}

/// Credentials never appear in the debug output.
impl fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerLink")
            .field("address", &self.address)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BrokerLink {
    /// Parse `url` and prepare a client for it. Does not connect.
    ///
    /// For `rediss://` URLs a [`CertVerification::Verified`] policy reads its
    /// CA bundle here, so a missing bundle fails at startup.
    pub fn open(url: &str, options: ConnectOptions) -> Result<Self, BrokerError> {
        let info = url.into_connection_info()?;
        let (address, encrypted) = describe(&info.addr, info.redis.db);

        let client = if encrypted {
            tls::install_crypto_provider();
            match &options.verification {
                CertVerification::Verified { ca_certs } => {
                    let root_cert = tls::load_ca_bundle(ca_certs)?;
                    Client::build_with_tls(
                        url,
                        TlsCertificates {
                            client_tls: None,
                            root_cert: Some(root_cert),
                        },
                    )?
                }
                CertVerification::Disabled => {
                    warn!(broker = %address, "TLS certificate validation disabled");
                    Client::open(tls::insecure_url(url))?
                }
            }
        } else {
            warn!(broker = %address, "Broker connection is not encrypted");
            Client::open(info)?
        };

        Ok(Self {
            client,
            options,
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub const fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Connect, negotiate TLS, authenticate and select the database.
    pub async fn connect(&self) -> Result<MultiplexedConnection, BrokerError> {
        let conn = tokio::time::timeout(
            self.options.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| BrokerError::Timeout(format!("connecting to {}", self.address)))??;
        info!(broker = %self.address, "Connected to broker");
        Ok(conn)
    }

    /// Run one command, waiting at most the command timeout for its reply.
    pub async fn query<T: FromRedisValue>(
        &self,
        conn: &mut MultiplexedConnection,
        cmd: &Cmd,
    ) -> Result<T, BrokerError> {
        self.query_within(conn, cmd, self.options.command_timeout)
            .await
    }

    /// Run one command, waiting at most `deadline` for its reply. Blocking
    /// commands pass their own block time plus slack.
    pub async fn query_within<T: FromRedisValue>(
        &self,
        conn: &mut MultiplexedConnection,
        cmd: &Cmd,
        deadline: Duration,
    ) -> Result<T, BrokerError> {
        match tokio::time::timeout(deadline, cmd.query_async(conn)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(BrokerError::Timeout(format!(
                "no reply from {} within {deadline:?}",
                self.address
            ))),
        }
    }
}

fn describe(addr: &ConnectionAddr, db: i64) -> (String, bool) {
    match addr {
        ConnectionAddr::Tcp(host, port) => (format!("redis://{host}:{port}/{db}"), false),
        ConnectionAddr::TcpTls { host, port, .. } => {
            (format!("rediss://{host}:{port}/{db}"), true)
        }
        other => (format!("{other:?}"), false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions::new(CertVerification::Disabled, Duration::from_secs(1))
    }

    #[test]
    fn address_hides_credentials() {
        let link = BrokerLink::open("redis://:hunter2@10.0.0.5:6380/2", options()).unwrap();
        assert_eq!(link.address(), "redis://10.0.0.5:6380/2");
        assert!(!format!("{link:?}").contains("hunter2"));
    }

    #[test]
    fn tls_link_without_validation() {
        let link = BrokerLink::open("rediss://:pw@broker.example:6378/1", options()).unwrap();
        assert_eq!(link.address(), "rediss://broker.example:6378/1");
    }

    #[test]
    fn validated_tls_link_needs_a_bundle() {
        let options = ConnectOptions::new(
            CertVerification::Verified {
                ca_certs: "/nonexistent/ca.pem".into(),
            },
            Duration::from_secs(1),
        );
        let err = BrokerLink::open("rediss://broker.example:6378/0", options).unwrap_err();
        assert!(matches!(err, BrokerError::Tls(_)));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(BrokerLink::open("amqp://broker", options()).is_err());
    }

    #[test]
    fn command_timeout_defaults_to_connect_timeout() {
        let options = options();
        assert_eq!(options.command_timeout, Duration::from_secs(1));
        let options = options.with_command_timeout(Duration::from_millis(250));
        assert_eq!(options.command_timeout, Duration::from_millis(250));
    }
}
