use crate::client::Store;
use crate::error::Result;

/// Parent of every top-level entry; never allocated from the inode counter.
pub const ROOT_ID: i64 = -99;

/// Splits `path` into its directory and basename, mirroring `get_parent`
/// and `get_basename` from the original path-splitting helpers.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        None => ("", path),
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

fn dirent_key(prefix: &str, inode: i64) -> String {
    format!("{prefix}:DIRENT:{inode}")
}

fn name_key(prefix: &str, inode: i64) -> String {
    format!("{prefix}:INODE:{inode}:NAME")
}

/// Resolves `path` to an inode identifier by walking the directory tree
/// one component at a time from the root sentinel, two round trips per
/// component (SMEMBERS of the parent's children, then one MGET of their
/// names). Returns `Ok(None)` when any component is not found.
pub fn resolve(client: &mut dyn Store, prefix: &str, path: &str) -> Result<Option<i64>> {
    if path.is_empty() || path == "/" {
        return Ok(Some(ROOT_ID));
    }

    let mut current = ROOT_ID;
    for component in components(path) {
        match resolve_child(client, prefix, current, component)? {
            Some(inode) => current = inode,
            None => return Ok(None),
        }
    }

    Ok(Some(current))
}

/// A single resolution step: finds the child of `parent` named `name`.
/// Two round trips (SMEMBERS of the parent's children, then one MGET of
/// their names), used both by `resolve` and directly by `lookup`.
pub fn resolve_child(client: &mut dyn Store, prefix: &str, parent: i64, name: &str) -> Result<Option<i64>> {
    let members = client.smembers(&dirent_key(prefix, parent))?;
    if members.is_empty() {
        return Ok(None);
    }

    let keys: Vec<String> = members.iter().map(|m| name_key(prefix, parse_inode(m))).collect();
    let names = client.mget(&keys)?;

    for (member, found_name) in members.iter().zip(names.iter()) {
        if let Some(found_name) = found_name {
            if found_name.as_slice() == name.as_bytes() {
                return Ok(Some(parse_inode(member)));
            }
        }
    }

    Ok(None)
}

fn parse_inode(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeStore;
    use crate::inode::{self, NodeType};

    #[test]
    fn split_root() {
        assert_eq!(split("/"), ("/", ""));
    }

    #[test]
    fn split_top_level() {
        assert_eq!(split("/foo"), ("/", "foo"));
    }

    #[test]
    fn split_nested() {
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
    }

    #[test]
    fn components_nested() {
        assert_eq!(components("/a/b/c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn components_root() {
        assert_eq!(components("/"), Vec::<&str>::new());
    }

    #[test]
    fn resolve_root() {
        let mut store = FakeStore::new();
        assert_eq!(resolve(&mut store, "skx", "/").unwrap(), Some(ROOT_ID));
    }

    #[test]
    fn resolve_single_level() {
        let mut store = FakeStore::new();
        let ino = inode::create(&mut store, "skx", ROOT_ID, "a", NodeType::Dir, 0o755, 0, 0, None).unwrap();
        assert_eq!(resolve(&mut store, "skx", "/a").unwrap(), Some(ino));
    }

    #[test]
    fn resolve_multi_level() {
        let mut store = FakeStore::new();
        let dir = inode::create(&mut store, "skx", ROOT_ID, "a", NodeType::Dir, 0o755, 0, 0, None).unwrap();
        let file = inode::create(&mut store, "skx", dir, "b", NodeType::File, 0o644, 0, 0, None).unwrap();
        assert_eq!(resolve(&mut store, "skx", "/a/b").unwrap(), Some(file));
    }

    #[test]
    fn resolve_not_found_at_each_level() {
        let mut store = FakeStore::new();
        assert_eq!(resolve(&mut store, "skx", "/missing").unwrap(), None);

        let dir = inode::create(&mut store, "skx", ROOT_ID, "a", NodeType::Dir, 0o755, 0, 0, None).unwrap();
        let _ = dir;
        assert_eq!(resolve(&mut store, "skx", "/a/missing").unwrap(), None);
    }
}
