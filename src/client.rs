use std::time::Duration;

use redis::Commands;
use tracing::{debug, warn};

use crate::error::Result;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// The primitive operations the resolver, inode, and snapshot layers need
/// from a key-value store. Kept as a trait (rather than a concrete
/// `StoreClient` parameter everywhere) so those layers can be exercised in
/// tests against an in-memory double instead of a live connection.
pub trait Store {
    fn ensure_alive(&mut self) -> Result<()>;
    fn incr(&mut self, key: &str) -> Result<i64>;
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn mset(&mut self, pairs: &[(&str, &[u8])]) -> Result<()>;
    fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
    fn append(&mut self, key: &str, value: &[u8]) -> Result<i64>;
    fn incrby(&mut self, key: &str, delta: i64) -> Result<i64>;
    fn del(&mut self, keys: &[String]) -> Result<()>;
    fn keys(&mut self, pattern: &str) -> Result<Vec<String>>;
    fn key_type(&mut self, key: &str) -> Result<String>;
    fn sadd(&mut self, key: &str, member: &str) -> Result<()>;
    fn srem(&mut self, key: &str, member: &str) -> Result<()>;
    fn smembers(&mut self, key: &str) -> Result<Vec<String>>;
    fn getrange(&mut self, key: &str, offset: i64, size: i64) -> Result<Vec<u8>>;
}

/// A synchronous connection to the RESP key-value store, with transparent
/// liveness-checked reconnect. Every filesystem operation goes through one
/// `StoreClient`, reached only while the filesystem's global lock is held,
/// so no internal locking is needed here.
pub struct StoreClient {
    host: String,
    port: u16,
    conn: redis::Connection,
}

impl StoreClient {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let conn = Self::new_connection(host, port)?;
        Ok(Self {
            host: host.to_string(),
            port,
            conn,
        })
    }

    fn new_connection(host: &str, port: u16) -> Result<redis::Connection> {
        let client = redis::Client::open(format!("redis://{host}:{port}/"))?;
        let conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        Ok(conn)
    }

    /// Verifies the connection is alive via PING/PONG; reconnects once on
    /// any other outcome. A reconnect failure is returned as a transport
    /// error, which callers at the process boundary treat as fatal.
    pub fn ensure_alive(&mut self) -> Result<()> {
        match redis::cmd("PING").query::<String>(&mut self.conn) {
            Ok(ref pong) if pong == "PONG" => Ok(()),
            _ => {
                warn!(host = %self.host, port = self.port, "store connection unhealthy, reconnecting");
                self.conn = Self::new_connection(&self.host, self.port)?;
                Ok(())
            }
        }
    }

    pub fn incr(&mut self, key: &str) -> Result<i64> {
        Ok(self.conn.incr(key, 1)?)
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.conn.get(key)?)
    }

    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let _: () = self.conn.set(key, value)?;
        Ok(())
    }

    pub fn mset(&mut self, pairs: &[(&str, &[u8])]) -> Result<()> {
        let _: () = self.conn.mset(pairs)?;
        Ok(())
    }

    pub fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.conn.mget(keys)?)
    }

    pub fn append(&mut self, key: &str, value: &[u8]) -> Result<i64> {
        Ok(self.conn.append(key, value)?)
    }

    pub fn incrby(&mut self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.conn.incr(key, delta)?)
    }

    pub fn del(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = self.conn.del(keys)?;
        Ok(())
    }

    pub fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.conn.keys(pattern)?)
    }

    pub fn key_type(&mut self, key: &str) -> Result<String> {
        Ok(redis::cmd("TYPE").arg(key).query(&mut self.conn)?)
    }

    pub fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        let _: () = self.conn.sadd(key, member)?;
        Ok(())
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        let _: () = self.conn.srem(key, member)?;
        Ok(())
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(self.conn.smembers(key)?)
    }

    /// Ranged read of a string value, inclusive of `offset + size - 1`.
    /// Retries under the legacy `SUBSTR` name if `GETRANGE` errors, for
    /// compatibility with older stores.
    pub fn getrange(&mut self, key: &str, offset: i64, size: i64) -> Result<Vec<u8>> {
        if size <= 0 {
            return Ok(Vec::new());
        }
        let end = offset + size - 1;
        match redis::cmd("GETRANGE")
            .arg(key)
            .arg(offset)
            .arg(end)
            .query::<Vec<u8>>(&mut self.conn)
        {
            Ok(data) => Ok(data),
            Err(err) => {
                debug!(%err, "GETRANGE failed, retrying as SUBSTR");
                Ok(redis::cmd("SUBSTR")
                    .arg(key)
                    .arg(offset)
                    .arg(end)
                    .query(&mut self.conn)?)
            }
        }
    }

}

impl Store for StoreClient {
    fn ensure_alive(&mut self) -> Result<()> {
        StoreClient::ensure_alive(self)
    }
    fn incr(&mut self, key: &str) -> Result<i64> {
        StoreClient::incr(self, key)
    }
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        StoreClient::get(self, key)
    }
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        StoreClient::set(self, key, value)
    }
    fn mset(&mut self, pairs: &[(&str, &[u8])]) -> Result<()> {
        StoreClient::mset(self, pairs)
    }
    fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        StoreClient::mget(self, keys)
    }
    fn append(&mut self, key: &str, value: &[u8]) -> Result<i64> {
        StoreClient::append(self, key, value)
    }
    fn incrby(&mut self, key: &str, delta: i64) -> Result<i64> {
        StoreClient::incrby(self, key, delta)
    }
    fn del(&mut self, keys: &[String]) -> Result<()> {
        StoreClient::del(self, keys)
    }
    fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        StoreClient::keys(self, pattern)
    }
    fn key_type(&mut self, key: &str) -> Result<String> {
        StoreClient::key_type(self, key)
    }
    fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        StoreClient::sadd(self, key, member)
    }
    fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        StoreClient::srem(self, key, member)
    }
    fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        StoreClient::smembers(self, key)
    }
    fn getrange(&mut self, key: &str, offset: i64, size: i64) -> Result<Vec<u8>> {
        StoreClient::getrange(self, key, offset, size)
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::{HashMap, HashSet};

    use super::Store;
    use crate::error::Result;

    /// An in-memory double for [`Store`], enough to exercise the resolver,
    /// inode, and snapshot layers without a live connection. Strings and
    /// sets are modeled separately, the same two RESP types this crate
    /// actually uses.
    #[derive(Default)]
    pub struct FakeStore {
        strings: HashMap<String, Vec<u8>>,
        sets: HashMap<String, HashSet<String>>,
    }

    impl FakeStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Store for FakeStore {
        fn ensure_alive(&mut self) -> Result<()> {
            Ok(())
        }

        fn incr(&mut self, key: &str) -> Result<i64> {
            self.incrby(key, 1)
        }

        fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.strings.get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
            self.strings.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn mset(&mut self, pairs: &[(&str, &[u8])]) -> Result<()> {
            for (key, value) in pairs {
                self.strings.insert(key.to_string(), value.to_vec());
            }
            Ok(())
        }

        fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            Ok(keys.iter().map(|k| self.strings.get(k).cloned()).collect())
        }

        fn append(&mut self, key: &str, value: &[u8]) -> Result<i64> {
            let entry = self.strings.entry(key.to_string()).or_default();
            entry.extend_from_slice(value);
            Ok(entry.len() as i64)
        }

        fn incrby(&mut self, key: &str, delta: i64) -> Result<i64> {
            let current = self
                .strings
                .get(key)
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + delta;
            self.strings.insert(key.to_string(), next.to_string().into_bytes());
            Ok(next)
        }

        fn del(&mut self, keys: &[String]) -> Result<()> {
            for key in keys {
                self.strings.remove(key);
                self.sets.remove(key);
            }
            Ok(())
        }

        fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            let mut found: Vec<String> = self
                .strings
                .keys()
                .chain(self.sets.keys())
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            found.sort();
            found.dedup();
            Ok(found)
        }

        fn key_type(&mut self, key: &str) -> Result<String> {
            if self.sets.contains_key(key) {
                Ok("set".to_string())
            } else if self.strings.contains_key(key) {
                Ok("string".to_string())
            } else {
                Ok("none".to_string())
            }
        }

        fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
            self.sets.entry(key.to_string()).or_default().insert(member.to_string());
            Ok(())
        }

        fn srem(&mut self, key: &str, member: &str) -> Result<()> {
            if let Some(set) = self.sets.get_mut(key) {
                set.remove(member);
            }
            Ok(())
        }

        fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
            Ok(self.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
        }

        fn getrange(&mut self, key: &str, offset: i64, size: i64) -> Result<Vec<u8>> {
            let value = self.strings.get(key).cloned().unwrap_or_default();
            if size <= 0 || offset < 0 || offset as usize >= value.len() {
                return Ok(Vec::new());
            }
            let start = offset as usize;
            let end = (start + size as usize).min(value.len());
            Ok(value[start..end].to_vec())
        }
    }
}
