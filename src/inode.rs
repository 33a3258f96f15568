use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::client::Store;
use crate::error::{Error, Result};

/// One of the three node kinds this filesystem understands. Hard links are
/// out of scope, so every inode has exactly one parent/name binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Dir,
    File,
    Link,
}

impl NodeType {
    fn as_str(self) -> &'static str {
        match self {
            NodeType::Dir => "DIR",
            NodeType::File => "FILE",
            NodeType::Link => "LINK",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "DIR" => Some(NodeType::Dir),
            "FILE" => Some(NodeType::File),
            "LINK" => Some(NodeType::Link),
            _ => None,
        }
    }

    /// The S_IFxxx bit this type contributes to `st_mode`.
    pub fn type_bits(self) -> u32 {
        match self {
            NodeType::Dir => libc::S_IFDIR,
            NodeType::File => libc::S_IFREG,
            NodeType::Link => libc::S_IFLNK,
        }
    }
}

/// The attributes of one inode, assembled from its per-field keys.
#[derive(Debug, Clone)]
pub struct Attrs {
    pub ino: i64,
    pub node_type: NodeType,
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub nlink: u32,
}

impl Attrs {
    /// Full `st_mode` including the type bits.
    pub fn full_mode(&self) -> u32 {
        self.node_type.type_bits() | (self.mode & 0o7777)
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn key(prefix: &str, inode: i64, field: &str) -> String {
    format!("{prefix}:INODE:{inode}:{field}")
}

fn dirent_key(prefix: &str, inode: i64) -> String {
    format!("{prefix}:DIRENT:{inode}")
}

fn counter_key(prefix: &str) -> String {
    format!("{prefix}:GLOBAL:INODE")
}

fn parse_i64(bytes: &Option<Vec<u8>>) -> i64 {
    bytes
        .as_ref()
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Allocates a new inode from the global counter and writes every required
/// attribute field in one grouped MSET, mirroring `get_next_inode` plus
/// the per-field `MSET` issued by `fs_mkdir`/`fs_create`/`fs_symlink` in
/// the original source.
#[allow(clippy::too_many_arguments)]
pub fn create(
    client: &mut dyn Store,
    prefix: &str,
    parent: i64,
    name: &str,
    node_type: NodeType,
    mode: u32,
    uid: u32,
    gid: u32,
    target: Option<&str>,
) -> Result<i64> {
    let ino = client.incr(&counter_key(prefix))?;
    let ts = now().to_string();
    let mode_s = mode.to_string();
    let uid_s = uid.to_string();
    let gid_s = gid.to_string();

    let name_key = key(prefix, ino, "NAME");
    let type_key = key(prefix, ino, "TYPE");
    let mode_key = key(prefix, ino, "MODE");
    let uid_key = key(prefix, ino, "UID");
    let gid_key = key(prefix, ino, "GID");
    let size_key = key(prefix, ino, "SIZE");
    let atime_key = key(prefix, ino, "ATIME");
    let ctime_key = key(prefix, ino, "CTIME");
    let mtime_key = key(prefix, ino, "MTIME");
    let link_key = key(prefix, ino, "LINK");
    let target_key = key(prefix, ino, "TARGET");

    let mut pairs: Vec<(&str, &[u8])> = vec![
        (&name_key, name.as_bytes()),
        (&type_key, node_type.as_str().as_bytes()),
        (&mode_key, mode_s.as_bytes()),
        (&uid_key, uid_s.as_bytes()),
        (&gid_key, gid_s.as_bytes()),
        (&size_key, b"0"),
        (&atime_key, ts.as_bytes()),
        (&ctime_key, ts.as_bytes()),
        (&mtime_key, ts.as_bytes()),
        (&link_key, b"1"),
    ];
    if let Some(target) = target {
        pairs.push((&target_key, target.as_bytes()));
    }
    client.mset(&pairs)?;
    client.sadd(&dirent_key(prefix, parent), &ino.to_string())?;
    debug!(ino, parent, name, "created inode");
    Ok(ino)
}

/// Grouped multi-get of TYPE, MODE, SIZE, UID, GID, ATIME, CTIME, MTIME,
/// LINK, assembled by field name (not by positional index, which is the
/// source of the reply-index bug the original implementation had).
pub fn read_attrs(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<Option<Attrs>> {
    let fields = [
        "TYPE", "MODE", "SIZE", "UID", "GID", "ATIME", "CTIME", "MTIME", "LINK",
    ];
    let keys: Vec<String> = fields.iter().map(|f| key(prefix, ino, f)).collect();
    let values = client.mget(&keys)?;

    let node_type = match values[0].as_ref().and_then(|v| std::str::from_utf8(v).ok()) {
        Some(s) => match NodeType::parse(s) {
            Some(t) => t,
            None => return Ok(None),
        },
        None => return Ok(None),
    };

    Ok(Some(Attrs {
        ino,
        node_type,
        mode: parse_i64(&values[1]) as u32,
        size: parse_i64(&values[2]) as u64,
        uid: parse_i64(&values[3]) as u32,
        gid: parse_i64(&values[4]) as u32,
        atime: parse_i64(&values[5]),
        ctime: parse_i64(&values[6]),
        mtime: parse_i64(&values[7]),
        nlink: parse_i64(&values[8]) as u32,
    }))
}

pub fn update_mode(client: &mut dyn Store, prefix: &str, ino: i64, mode: u32) -> Result<()> {
    let mode_s = mode.to_string();
    let ts = now().to_string();
    client.mset(&[
        (key(prefix, ino, "MODE").as_str(), mode_s.as_bytes()),
        (key(prefix, ino, "MTIME").as_str(), ts.as_bytes()),
    ])
}

pub fn update_owner(client: &mut dyn Store, prefix: &str, ino: i64, uid: u32, gid: u32) -> Result<()> {
    let uid_s = uid.to_string();
    let gid_s = gid.to_string();
    let ts = now().to_string();
    client.mset(&[
        (key(prefix, ino, "UID").as_str(), uid_s.as_bytes()),
        (key(prefix, ino, "GID").as_str(), gid_s.as_bytes()),
        (key(prefix, ino, "MTIME").as_str(), ts.as_bytes()),
    ])
}

pub fn update_times(client: &mut dyn Store, prefix: &str, ino: i64, atime: i64, mtime: i64) -> Result<()> {
    let atime_s = atime.to_string();
    let mtime_s = mtime.to_string();
    client.mset(&[
        (key(prefix, ino, "ATIME").as_str(), atime_s.as_bytes()),
        (key(prefix, ino, "MTIME").as_str(), mtime_s.as_bytes()),
    ])
}

pub fn touch_atime(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<()> {
    let ts = now().to_string();
    client.set(&key(prefix, ino, "ATIME"), ts.as_bytes())
}

/// Ranged read of file data, clamped to `[offset, size)` by the caller via
/// the inode's recorded SIZE.
pub fn read_data(client: &mut dyn Store, prefix: &str, ino: i64, offset: i64, size: i64) -> Result<Vec<u8>> {
    client.getrange(&key(prefix, ino, "DATA"), offset, size)
}

/// Writes `data` at `offset`. A zero offset is a full overwrite (one
/// grouped MSET of SIZE/MTIME/DATA); a positive offset appends, bumping
/// SIZE and DATA independently and skipping the MTIME update in fast
/// mode, matching `fs_write`'s two code paths.
pub fn write_data(
    client: &mut dyn Store,
    prefix: &str,
    ino: i64,
    data: &[u8],
    offset: i64,
    fast: bool,
) -> Result<usize> {
    if offset == 0 {
        let size_s = data.len().to_string();
        let ts = now().to_string();
        client.mset(&[
            (key(prefix, ino, "SIZE").as_str(), size_s.as_bytes()),
            (key(prefix, ino, "MTIME").as_str(), ts.as_bytes()),
            (key(prefix, ino, "DATA").as_str(), data),
        ])?;
    } else {
        client.incrby(&key(prefix, ino, "SIZE"), data.len() as i64)?;
        client.append(&key(prefix, ino, "DATA"), data)?;
        if !fast {
            let ts = now().to_string();
            client.set(&key(prefix, ino, "MTIME"), ts.as_bytes())?;
        }
    }
    Ok(data.len())
}

/// Always truncates to zero length regardless of the requested size; this
/// matches the original implementation's behavior and is a deliberate
/// simplification, not a bug.
pub fn truncate(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<()> {
    client.del(&[key(prefix, ino, "DATA")])?;
    let ts = now().to_string();
    client.mset(&[
        (key(prefix, ino, "SIZE").as_str(), b"0"),
        (key(prefix, ino, "MTIME").as_str(), ts.as_bytes()),
    ])
}

pub fn read_target(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<Option<Vec<u8>>> {
    client.get(&key(prefix, ino, "TARGET"))
}

/// Deletes every attribute key for `ino`, whether or not each was ever
/// set, mirroring `remove_inode`'s unconditional pipeline of twelve DELs.
pub fn remove(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<()> {
    let fields = [
        "NAME", "TYPE", "MODE", "GID", "UID", "ATIME", "CTIME", "MTIME", "SIZE", "DATA", "LINK",
        "TARGET",
    ];
    let keys: Vec<String> = fields.iter().map(|f| key(prefix, ino, f)).collect();
    client.del(&keys)?;
    client.del(&[dirent_key(prefix, ino)])?;
    Ok(())
}

pub fn dirent_set_key(prefix: &str, inode: i64) -> String {
    dirent_key(prefix, inode)
}

pub fn set_name(client: &mut dyn Store, prefix: &str, ino: i64, name: &str) -> Result<()> {
    client.set(&key(prefix, ino, "NAME"), name.as_bytes())
}

pub fn require_attrs(client: &mut dyn Store, prefix: &str, ino: i64) -> Result<Attrs> {
    read_attrs(client, prefix, ino)?.ok_or(Error::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeStore;

    #[test]
    fn create_populates_expected_fields_for_file() {
        let mut store = FakeStore::new();
        let ino = create(&mut store, "skx", -99, "f", NodeType::File, 0o644, 1, 1, None).unwrap();
        let attrs = read_attrs(&mut store, "skx", ino).unwrap().unwrap();
        assert_eq!(attrs.node_type, NodeType::File);
        assert_eq!(attrs.mode, 0o644);
        assert_eq!(attrs.size, 0);
        assert_eq!(attrs.uid, 1);
        assert_eq!(attrs.gid, 1);
        assert!(store.smembers("skx:DIRENT:-99").unwrap().contains(&ino.to_string()));
    }

    #[test]
    fn create_symlink_stores_target() {
        let mut store = FakeStore::new();
        let ino = create(
            &mut store,
            "skx",
            -99,
            "l",
            NodeType::Link,
            0o444,
            0,
            0,
            Some("/tmp/foo"),
        )
        .unwrap();
        let target = read_target(&mut store, "skx", ino).unwrap().unwrap();
        assert_eq!(target, b"/tmp/foo");
    }

    #[test]
    fn remove_deletes_all_fields_even_if_unset() {
        let mut store = FakeStore::new();
        let ino = create(&mut store, "skx", -99, "f", NodeType::File, 0o644, 0, 0, None).unwrap();
        remove(&mut store, "skx", ino).unwrap();
        assert!(read_attrs(&mut store, "skx", ino).unwrap().is_none());
    }

    #[test]
    fn write_offset_zero_overwrites() {
        let mut store = FakeStore::new();
        let ino = create(&mut store, "skx", -99, "f", NodeType::File, 0o644, 0, 0, None).unwrap();
        write_data(&mut store, "skx", ino, b"hello", 0, false).unwrap();
        let attrs = read_attrs(&mut store, "skx", ino).unwrap().unwrap();
        assert_eq!(attrs.size, 5);
        assert_eq!(read_data(&mut store, "skx", ino, 0, 5).unwrap(), b"hello");
    }

    #[test]
    fn write_offset_positive_appends() {
        let mut store = FakeStore::new();
        let ino = create(&mut store, "skx", -99, "f", NodeType::File, 0o644, 0, 0, None).unwrap();
        write_data(&mut store, "skx", ino, b"hello", 0, false).unwrap();
        write_data(&mut store, "skx", ino, b" world", 5, false).unwrap();
        let attrs = read_attrs(&mut store, "skx", ino).unwrap().unwrap();
        assert_eq!(attrs.size, 11);
        assert_eq!(read_data(&mut store, "skx", ino, 0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn truncate_clears_data_and_resets_size() {
        let mut store = FakeStore::new();
        let ino = create(&mut store, "skx", -99, "f", NodeType::File, 0o644, 0, 0, None).unwrap();
        write_data(&mut store, "skx", ino, b"hello", 0, false).unwrap();
        truncate(&mut store, "skx", ino).unwrap();
        let attrs = read_attrs(&mut store, "skx", ino).unwrap().unwrap();
        assert_eq!(attrs.size, 0);
        assert_eq!(read_data(&mut store, "skx", ino, 0, 10).unwrap(), Vec::<u8>::new());
    }
}
