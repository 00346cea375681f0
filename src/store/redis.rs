//! Redis status store.
//!
//! [`RedisStatusStore`] serves normal execution through one
//! [`ConnectionManager`] per configured index: connections are opened lazily
//! and re-established after a dropped socket, so an unreachable Redis at boot
//! or a Redis restart only fails the writes attempted while it is down.
//! [`RedisCrashNotifier`] is the synchronous variant used from the
//! fatal-signal path, where no runtime can be relied on: it opens a fresh
//! blocking connection per call, bounded by the configured timeout.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{
    AsyncCommands, Commands, ConnectionAddr, ConnectionInfo, IntoConnectionInfo,
    RedisConnectionInfo,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::RedisConfig;
use crate::error::{CrashNotificationError, StoreError};
use crate::store::traits::StatusStore;
use crate::store::{ERROR_CHANNEL, StatusKey};
use crate::worker::crash::CrashNotifier;

/// Reconnect attempts made in the background after a dropped connection.
const RECONNECT_RETRIES: usize = 3;

/// Connection settings for one index: address, database and optional auth.
fn connection_info(config: &RedisConfig, index: u32) -> Result<ConnectionInfo, StoreError> {
    let mut settings = RedisConnectionInfo::default().set_db(i64::from(index));
    if let Some(auth) = &config.auth {
        settings = settings.set_password(auth.expose_secret());
    }
    let info = ConnectionAddr::Tcp(config.ip.clone(), config.port)
        .into_connection_info()
        .map_err(|e| StoreError::Connect(e.to_string()))?;
    Ok(info.set_redis_settings(settings))
}

fn client(config: &RedisConfig, index: u32) -> Result<::redis::Client, StoreError> {
    ::redis::Client::open(connection_info(config, index)?)
        .map_err(|e| StoreError::Connect(e.to_string()))
}

/// Async Redis-backed [`StatusStore`].
pub struct RedisStatusStore {
    connections: HashMap<u32, ConnectionManager>,
    timeout: Duration,
}

impl RedisStatusStore {
    /// Prepare a lazily-connecting manager for every index named in `config`.
    ///
    /// Nothing is sent to Redis here. Must be called from within a tokio
    /// runtime.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Some(config.timeout))
            .set_response_timeout(Some(config.timeout))
            .set_number_of_retries(RECONNECT_RETRIES);

        let mut connections = HashMap::new();
        for index in [config.index_set, config.index_pub] {
            if connections.contains_key(&index) {
                continue;
            }
            let manager = ConnectionManager::new_lazy_with_config(
                client(config, index)?,
                manager_config.clone(),
            )
            .map_err(|e| StoreError::Connect(e.to_string()))?;
            info!(ip = %config.ip, port = config.port, index, "Redis status store ready");
            connections.insert(index, manager);
        }

        Ok(Self {
            connections,
            timeout: config.timeout,
        })
    }

    fn connection(&self, index: u32) -> Result<ConnectionManager, StoreError> {
        self.connections
            .get(&index)
            .cloned()
            .ok_or(StoreError::UnknownIndex { index })
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn set(
        &self,
        index: u32,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection(index)?;
        let write = async {
            if ttl.as_secs() == 0 {
                conn.set::<_, _, ()>(key, value).await
            } else {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await
            }
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(|e| StoreError::Set {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, index: u32, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.connection(index)?;
        tokio::time::timeout(self.timeout, conn.publish::<_, _, ()>(channel, message))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(|e| StoreError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Blocking Redis client for crash notifications.
pub struct RedisCrashNotifier {
    set_client: ::redis::Client,
    pub_client: ::redis::Client,
    ttl: Duration,
    timeout: Duration,
}

impl RedisCrashNotifier {
    /// Prepare clients; no connection is opened until a notification is sent.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        Ok(Self {
            set_client: client(config, config.index_set)?,
            pub_client: client(config, config.index_pub)?,
            ttl: config.data_ttl,
            timeout: config.timeout,
        })
    }

    fn connect(
        &self,
        client: &::redis::Client,
    ) -> Result<::redis::Connection, CrashNotificationError> {
        let conn = client
            .get_connection_with_timeout(self.timeout)
            .map_err(|e| CrashNotificationError::Connect(e.to_string()))?;
        conn.set_read_timeout(Some(self.timeout))
            .and_then(|_| conn.set_write_timeout(Some(self.timeout)))
            .map_err(|e| CrashNotificationError::Connect(e.to_string()))?;
        Ok(conn)
    }

    fn write_error(&self, task_id: &str, payload: &str) -> Result<(), CrashNotificationError> {
        let key = StatusKey::Error.for_task(task_id);
        let mut conn = self.connect(&self.set_client)?;
        let secs = self.ttl.as_secs();
        let result: ::redis::RedisResult<()> = if secs == 0 {
            conn.set(&key, payload)
        } else {
            conn.set_ex(&key, payload, secs)
        };
        result.map_err(|e| CrashNotificationError::Set {
            key,
            reason: e.to_string(),
        })
    }

    fn publish_error(&self, task_id: &str) -> Result<(), CrashNotificationError> {
        let mut conn = self.connect(&self.pub_client)?;
        conn.publish::<_, _, ()>(ERROR_CHANNEL, task_id)
            .map_err(|e| CrashNotificationError::Publish {
                channel: ERROR_CHANNEL.to_string(),
                reason: e.to_string(),
            })
    }
}

impl CrashNotifier for RedisCrashNotifier {
    fn notify(&self, task_id: &str, payload: &str) -> Result<(), CrashNotificationError> {
        // The publish is attempted even when the write failed.
        let written = self.write_error(task_id, payload);
        let published = self.publish_error(task_id);
        written.and(published)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use secrecy::SecretString;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::net::tcp::OwnedReadHalf;

    use super::*;
    use crate::config::ServerConfig;

    /// Read one RESP array command, or `None` once the peer is gone.
    async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8_lossy(&buf).into_owned());
        }
        Some(args)
    }

    /// Minimal Redis stand-in that answers `+OK` to everything, except that
    /// the first connection is dropped as soon as it receives a write.
    /// Returns the port and the keys written successfully.
    async fn flaky_redis() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let written = Arc::new(Mutex::new(Vec::new()));

        let keys = Arc::clone(&written);
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((stream, _)) = listener.accept().await {
                let drop_on_write = std::mem::replace(&mut first, false);
                let keys = Arc::clone(&keys);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    while let Some(args) = read_command(&mut reader).await {
                        if args[0].to_ascii_uppercase().starts_with("SET") {
                            if drop_on_write {
                                return;
                            }
                            keys.lock().push(args[1].clone());
                        }
                        if write.write_all(b"+OK\r\n").await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (port, written)
    }

    fn config_for(port: u16) -> RedisConfig {
        let mut config = ServerConfig::default().redis;
        config.port = port;
        config.timeout = Duration::from_secs(2);
        config
    }

    #[test]
    fn connection_info_carries_index_and_auth() {
        let mut config = ServerConfig::default().redis;
        config.auth = Some(SecretString::from("p@ss:word"));

        let info = connection_info(&config, 3).unwrap();
        assert!(matches!(info.addr(), ConnectionAddr::Tcp(host, 6379) if host == "127.0.0.1"));
        assert_eq!(info.redis_settings().db(), 3);
        assert_eq!(info.redis_settings().password(), Some("p@ss:word"));
    }

    #[test]
    fn connection_info_without_auth() {
        let config = ServerConfig::default().redis;
        let info = connection_info(&config, 0).unwrap();
        assert_eq!(info.redis_settings().password(), None);
    }

    #[tokio::test]
    async fn store_builds_without_reachable_redis() {
        // Port 1 refuses connections: building succeeds, writes fail.
        let mut config = config_for(1);
        config.timeout = Duration::from_millis(300);
        let store = RedisStatusStore::new(&config).unwrap();

        assert!(store.set(0, "t1:status", "10", Duration::ZERO).await.is_err());
        assert!(store.publish(0, "ALGO_STATUS", "t1").await.is_err());
    }

    #[tokio::test]
    async fn dropped_connection_does_not_poison_later_writes() {
        let (port, written) = flaky_redis().await;
        let store = RedisStatusStore::new(&config_for(port)).unwrap();

        assert!(store.set(0, "t1:status", "10", Duration::ZERO).await.is_err());

        let mut recovered = false;
        for _ in 0..20 {
            if store.set(0, "t1:status", "20", Duration::ZERO).await.is_ok() {
                recovered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(recovered);
        assert_eq!(*written.lock(), vec!["t1:status".to_string()]);
        store.publish(0, "ALGO_STATUS", "t1").await.unwrap();
    }

    #[test]
    fn notifier_builds_without_connecting() {
        let config = ServerConfig::default().redis;
        assert!(RedisCrashNotifier::new(&config).is_ok());
    }

    #[tokio::test]
    async fn unknown_index_is_reported() {
        let store = RedisStatusStore::new(&ServerConfig::default().redis).unwrap();
        assert!(matches!(
            store.connection(9),
            Err(StoreError::UnknownIndex { index: 9 })
        ));
    }
}
