use tracing::{error, info};

use crate::client::Store;
use crate::error::{Error, Result};

/// Clones every key under `from_prefix` to the same key under `to_prefix`,
/// mirroring `clone_keys()`: enumerate by `KEYS <prefix>*`, dispatch on
/// `TYPE`, and copy strings via GET/SET and sets via SMEMBERS/SADD. Inode
/// identifiers inside sets are opaque strings and need no remapping.
///
/// Not point-in-time consistent: concurrent mutation of the source prefix
/// during the scan can be observed partially.
pub fn clone_keys(client: &mut dyn Store, from_prefix: &str, to_prefix: &str) -> Result<usize> {
    let pattern = format!("{from_prefix}*");
    let keys = client.keys(&pattern)?;
    let mut copied = 0;

    for key in &keys {
        let Some(suffix) = key.strip_prefix(from_prefix) else {
            continue;
        };
        let new_key = format!("{to_prefix}{suffix}");

        match client.key_type(key)?.as_str() {
            "string" => {
                if let Some(value) = client.get(key)? {
                    client.set(&new_key, &value)?;
                    copied += 1;
                }
            }
            "set" => {
                for member in client.smembers(key)? {
                    client.sadd(&new_key, &member)?;
                }
                copied += 1;
            }
            other => {
                error!(key, other, "unexpected key type during snapshot, aborting");
                return Err(Error::Store(format!(
                    "key {key} has type {other}, not one we expect to find"
                )));
            }
        }
    }

    info!(copied, from_prefix, to_prefix, "snapshot complete");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeStore;

    #[test]
    fn prefix_rewrite() {
        let key = "skx:INODE:1:NAME";
        let suffix = key.strip_prefix("skx").unwrap();
        assert_eq!(format!("snap{suffix}"), "snap:INODE:1:NAME");
    }

    #[test]
    fn clones_strings_and_sets() {
        let mut store = FakeStore::new();
        store.set("skx:GLOBAL:INODE", b"7").unwrap();
        store.set("skx:INODE:1:NAME", b"passwd").unwrap();
        store.sadd("skx:DIRENT:-99", "1").unwrap();

        let copied = clone_keys(&mut store, "skx", "snap").unwrap();
        assert_eq!(copied, 3);

        assert_eq!(store.get("snap:GLOBAL:INODE").unwrap().unwrap(), b"7");
        assert_eq!(store.get("snap:INODE:1:NAME").unwrap().unwrap(), b"passwd");
        assert_eq!(store.smembers("snap:DIRENT:-99").unwrap(), vec!["1".to_string()]);
    }
}
