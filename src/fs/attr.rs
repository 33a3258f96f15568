use std::mem;
use std::time::Duration;

use fuse_backend_rs::abi::fuse_abi::Attr;

use crate::inode::{Attrs, NodeType};
use crate::resolver::ROOT_ID;

/// getattr/lookup TTL handed back to the kernel for ordinary inodes. Kept
/// short since the store can be mutated by another mount or the snapshot
/// tool at any time.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// The root directory is reported with a fixed identity on every call
/// rather than round-tripping to the store: it has no backing inode
/// fields, by construction (§3, root sentinel).
pub fn root_attr(uid: u32, gid: u32) -> Attr {
    let now = now_secs();
    let mut attr: Attr = unsafe { mem::zeroed() };
    attr.ino = ROOT_ID as u64;
    attr.size = 0;
    attr.blocks = 0;
    attr.atime = now;
    attr.ctime = now;
    attr.mtime = now;
    attr.mode = libc::S_IFDIR | 0o755;
    attr.nlink = 1;
    attr.uid = uid;
    attr.gid = gid;
    attr
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Assembles a kernel `Attr` from the inode attribute record.
pub fn to_attr(ino: u64, attrs: &Attrs) -> Attr {
    let mut attr: Attr = unsafe { mem::zeroed() };
    attr.ino = ino;
    attr.size = attrs.size;
    attr.blocks = attrs.size.div_ceil(512);
    attr.atime = attrs.atime.max(0) as u64;
    attr.ctime = attrs.ctime.max(0) as u64;
    attr.mtime = attrs.mtime.max(0) as u64;
    attr.mode = attrs.full_mode();
    attr.nlink = attrs.nlink.max(1);
    attr.uid = attrs.uid;
    attr.gid = attrs.gid;
    attr
}

/// FUSE directory-entry type bits, used when filling `readdir` results.
pub fn dirent_type(node_type: NodeType) -> u32 {
    match node_type {
        NodeType::Dir => libc::DT_DIR as u32,
        NodeType::File => libc::DT_REG as u32,
        NodeType::Link => libc::DT_LNK as u32,
    }
}
