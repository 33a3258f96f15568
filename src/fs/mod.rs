pub mod attr;

use std::ffi::CStr;
use std::io;
use std::time::Duration;

use fuse_backend_rs::abi::fuse_abi::{stat64, CreateIn};
use fuse_backend_rs::api::filesystem::{
    Context, DirEntry, Entry, FileSystem, FsOptions, OpenOptions, SetattrValid, ZeroCopyReader,
    ZeroCopyWriter,
};
use parking_lot::Mutex;
use tracing::{instrument, warn};

use crate::client::StoreClient;
use crate::config::Config;
use crate::error::Error;
use crate::inode::{self, NodeType};
use crate::resolver::{self, ROOT_ID};

const FUSE_ROOT_ID: u64 = 1;
const ENTRY_TTL: Duration = attr::ATTR_TTL;

fn store_ino(kernel_ino: u64) -> i64 {
    if kernel_ino == FUSE_ROOT_ID {
        ROOT_ID
    } else {
        kernel_ino as i64
    }
}

fn kernel_ino(store_ino: i64) -> u64 {
    if store_ino == ROOT_ID {
        FUSE_ROOT_ID
    } else {
        store_ino as u64
    }
}

fn not_found() -> io::Error {
    Error::NotFound.into()
}

/// A FUSE filesystem whose entire state is a RESP key-value store, guarded
/// by a single process-wide lock matching the store's own single-connection
/// nature (§5). One method per callback, each acquiring the lock on entry
/// and releasing it (via guard drop) on every exit path.
pub struct RedisFs {
    config: Config,
    client: Mutex<StoreClient>,
}

impl RedisFs {
    pub fn new(config: Config, client: StoreClient) -> Self {
        Self {
            config,
            client: Mutex::new(client),
        }
    }

    fn prefix(&self) -> &str {
        self.config.key_prefix()
    }

    fn name_str<'a>(&self, name: &'a CStr) -> io::Result<&'a str> {
        name.to_str()
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn entry_for(&self, client: &mut StoreClient, ino: i64) -> io::Result<Entry> {
        let attrs = inode::require_attrs(client, self.prefix(), ino)?;
        Ok(Entry {
            inode: kernel_ino(ino),
            generation: 0,
            attr: attr::to_attr(kernel_ino(ino), &attrs),
            attr_flags: 0,
            attr_timeout: ENTRY_TTL,
            entry_timeout: ENTRY_TTL,
        })
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.config.read_only {
            return Err(Error::ReadOnly.into());
        }
        Ok(())
    }
}

impl FileSystem for RedisFs {
    type Inode = u64;
    type Handle = u64;

    fn init(&self, capable: FsOptions) -> io::Result<FsOptions> {
        Ok(capable)
    }

    #[instrument(skip(self, _ctx))]
    fn lookup(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<Entry> {
        let name = self.name_str(name)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let child = resolver::resolve_child(&mut *client, self.prefix(), store_ino(parent), name)?
            .ok_or_else(not_found)?;
        self.entry_for(&mut *client, child)
    }

    #[instrument(skip(self, _ctx))]
    fn getattr(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Option<Self::Handle>,
    ) -> io::Result<(stat64, Duration)> {
        let ino = store_ino(inode);
        if ino == ROOT_ID {
            let attr = attr::root_attr(unsafe { libc::getuid() }, unsafe { libc::getgid() });
            return Ok((attr_to_stat64(attr), ENTRY_TTL));
        }
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let attrs = inode::require_attrs(&mut *client, self.prefix(), ino)?;
        Ok((attr_to_stat64(attr::to_attr(inode, &attrs)), ENTRY_TTL))
    }

    #[instrument(skip(self, _ctx, attr))]
    fn setattr(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        attr: stat64,
        _handle: Option<Self::Handle>,
        valid: SetattrValid,
    ) -> io::Result<(stat64, Duration)> {
        self.check_writable()?;
        let ino = store_ino(inode);
        let mut client = self.client.lock();
        client.ensure_alive()?;

        let existing = inode::require_attrs(&mut *client, self.prefix(), ino)?;
        if existing.node_type == NodeType::Dir && valid.contains(SetattrValid::SIZE) {
            return Err(not_found());
        }

        if valid.contains(SetattrValid::MODE) {
            inode::update_mode(&mut *client, self.prefix(), ino, attr.st_mode & 0o7777)?;
        }
        if valid.contains(SetattrValid::UID) || valid.contains(SetattrValid::GID) {
            let uid = if valid.contains(SetattrValid::UID) {
                attr.st_uid
            } else {
                existing.uid
            };
            let gid = if valid.contains(SetattrValid::GID) {
                attr.st_gid
            } else {
                existing.gid
            };
            inode::update_owner(&mut *client, self.prefix(), ino, uid, gid)?;
        }
        if valid.contains(SetattrValid::ATIME) || valid.contains(SetattrValid::MTIME) {
            let atime = if valid.contains(SetattrValid::ATIME) {
                attr.st_atime
            } else {
                existing.atime
            };
            let mtime = if valid.contains(SetattrValid::MTIME) {
                attr.st_mtime
            } else {
                existing.mtime
            };
            inode::update_times(&mut *client, self.prefix(), ino, atime, mtime)?;
        }
        if valid.contains(SetattrValid::SIZE) {
            // Only truncation to zero is supported, regardless of the
            // requested size; matches the original implementation.
            inode::truncate(&mut *client, self.prefix(), ino)?;
        }

        let attrs = inode::require_attrs(&mut *client, self.prefix(), ino)?;
        Ok((attr_to_stat64(attr::to_attr(inode, &attrs)), ENTRY_TTL))
    }

    #[instrument(skip(self, _ctx))]
    fn readlink(&self, _ctx: &Context, inode: Self::Inode) -> io::Result<Vec<u8>> {
        let ino = store_ino(inode);
        let mut client = self.client.lock();
        client.ensure_alive()?;
        inode::read_target(&mut *client, self.prefix(), ino)?.ok_or_else(not_found)
    }

    #[instrument(skip(self, ctx, linkname))]
    fn symlink(
        &self,
        ctx: &Context,
        linkname: &CStr,
        parent: Self::Inode,
        name: &CStr,
    ) -> io::Result<Entry> {
        self.check_writable()?;
        let name = self.name_str(name)?;
        let target = self.name_str(linkname)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let ino = inode::create(
            &mut *client,
            self.prefix(),
            store_ino(parent),
            name,
            NodeType::Link,
            0o444,
            ctx.uid,
            ctx.gid,
            Some(target),
        )?;
        self.entry_for(&mut *client, ino)
    }

    #[instrument(skip(self, ctx))]
    fn mkdir(
        &self,
        ctx: &Context,
        parent: Self::Inode,
        name: &CStr,
        mode: u32,
        _umask: u32,
    ) -> io::Result<Entry> {
        self.check_writable()?;
        let name = self.name_str(name)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let ino = inode::create(
            &mut *client,
            self.prefix(),
            store_ino(parent),
            name,
            NodeType::Dir,
            mode & 0o7777,
            ctx.uid,
            ctx.gid,
            None,
        )?;
        self.entry_for(&mut *client, ino)
    }

    #[instrument(skip(self, ctx))]
    fn create(
        &self,
        ctx: &Context,
        parent: Self::Inode,
        name: &CStr,
        args: CreateIn,
    ) -> io::Result<(Entry, Option<Self::Handle>, OpenOptions)> {
        self.check_writable()?;
        let name = self.name_str(name)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let ino = inode::create(
            &mut *client,
            self.prefix(),
            store_ino(parent),
            name,
            NodeType::File,
            args.mode & 0o7777,
            ctx.uid,
            ctx.gid,
            None,
        )?;
        let entry = self.entry_for(&mut *client, ino)?;
        Ok((entry, None, OpenOptions::empty()))
    }

    #[instrument(skip(self, _ctx))]
    fn unlink(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<()> {
        self.check_writable()?;
        let name = self.name_str(name)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let parent_ino = store_ino(parent);
        let ino = resolver::resolve_child(&mut *client, self.prefix(), parent_ino, name)?
            .ok_or_else(not_found)?;
        client.srem(&inode::dirent_set_key(self.prefix(), parent_ino), &ino.to_string())?;
        inode::remove(&mut *client, self.prefix(), ino)?;
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    fn rmdir(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<()> {
        self.check_writable()?;
        let name = self.name_str(name)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let parent_ino = store_ino(parent);
        let ino = resolver::resolve_child(&mut *client, self.prefix(), parent_ino, name)?
            .ok_or_else(not_found)?;

        let attrs = inode::require_attrs(&mut *client, self.prefix(), ino)?;
        if attrs.node_type != NodeType::Dir {
            return Err(not_found());
        }
        let children = client.smembers(&inode::dirent_set_key(self.prefix(), ino))?;
        if !children.is_empty() {
            return Err(Error::NotEmpty.into());
        }

        client.srem(&inode::dirent_set_key(self.prefix(), parent_ino), &ino.to_string())?;
        inode::remove(&mut *client, self.prefix(), ino)?;
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    fn rename(
        &self,
        _ctx: &Context,
        olddir: Self::Inode,
        oldname: &CStr,
        newdir: Self::Inode,
        newname: &CStr,
        _flags: u32,
    ) -> io::Result<()> {
        self.check_writable()?;
        let oldname = self.name_str(oldname)?;
        let newname = self.name_str(newname)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;

        let old_parent = store_ino(olddir);
        let new_parent = store_ino(newdir);
        let ino = resolver::resolve_child(&mut *client, self.prefix(), old_parent, oldname)?
            .ok_or_else(not_found)?;

        // Replace an existing destination instead of silently orphaning
        // it, unlike the original implementation (see REDESIGN FLAGS).
        if let Some(existing) = resolver::resolve_child(&mut *client, self.prefix(), new_parent, newname)? {
            if existing != ino {
                client.srem(&inode::dirent_set_key(self.prefix(), new_parent), &existing.to_string())?;
                inode::remove(&mut *client, self.prefix(), existing)?;
            }
        }

        inode::set_name(&mut *client, self.prefix(), ino, newname)?;
        client.srem(&inode::dirent_set_key(self.prefix(), old_parent), &ino.to_string())?;
        client.sadd(&inode::dirent_set_key(self.prefix(), new_parent), &ino.to_string())?;
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    fn open(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions)> {
        let ino = store_ino(inode);
        if self.config.fast {
            return Ok((None, OpenOptions::empty()));
        }
        let mut client = self.client.lock();
        client.ensure_alive()?;
        if inode::read_attrs(&mut *client, self.prefix(), ino)?.is_none() {
            return Err(not_found());
        }
        inode::touch_atime(&mut *client, self.prefix(), ino)?;
        Ok((None, OpenOptions::empty()))
    }

    #[instrument(skip(self, _ctx, mask))]
    fn access(&self, _ctx: &Context, inode: Self::Inode, mask: u32) -> io::Result<()> {
        let _ = mask;
        let ino = store_ino(inode);
        if self.config.fast {
            return Ok(());
        }
        let mut client = self.client.lock();
        client.ensure_alive()?;
        if inode::read_attrs(&mut *client, self.prefix(), ino)?.is_none() {
            return Err(not_found());
        }
        inode::touch_atime(&mut *client, self.prefix(), ino)?;
        Ok(())
    }

    #[instrument(skip(self, _ctx, w))]
    fn read(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        let ino = store_ino(inode);
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let attrs = inode::require_attrs(&mut *client, self.prefix(), ino)?;
        let remaining = attrs.size.saturating_sub(offset);
        let clamped = remaining.min(size as u64) as i64;
        if clamped <= 0 {
            return Ok(0);
        }
        let data = inode::read_data(&mut *client, self.prefix(), ino, offset as i64, clamped)?;
        w.write(&data)
    }

    #[instrument(skip(self, _ctx, r))]
    fn write(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        r: &mut dyn ZeroCopyReader,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _delayed_write: bool,
        _flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<usize> {
        self.check_writable()?;
        let ino = store_ino(inode);
        let mut buf = vec![0u8; size as usize];
        r.read_exact(&mut buf)?;
        let mut client = self.client.lock();
        client.ensure_alive()?;
        let written = inode::write_data(&mut *client, self.prefix(), ino, &buf, offset as i64, self.config.fast)?;
        Ok(written)
    }

    #[instrument(skip(self, _ctx, add_entry))]
    fn readdir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        _size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(DirEntry) -> io::Result<usize>,
    ) -> io::Result<()> {
        let ino = store_ino(inode);
        let mut client = self.client.lock();
        client.ensure_alive()?;

        let mut entries: Vec<(u64, String, u32)> = vec![
            (kernel_ino(ino), ".".to_string(), libc::DT_DIR as u32),
            (kernel_ino(ino), "..".to_string(), libc::DT_DIR as u32),
        ];

        let members = client.smembers(&inode::dirent_set_key(self.prefix(), ino))?;
        for member in members {
            let Ok(child_ino) = member.parse::<i64>() else {
                continue;
            };
            match inode::read_attrs(&mut *client, self.prefix(), child_ino)? {
                Some(attrs) => {
                    let name = String::from_utf8_lossy(
                        client
                            .get(&format!("{}:INODE:{}:NAME", self.prefix(), child_ino))?
                            .unwrap_or_default()
                            .as_slice(),
                    )
                    .to_string();
                    entries.push((kernel_ino(child_ino), name, attr::dirent_type(attrs.node_type)));
                }
                None => {
                    warn!(child_ino, "dangling directory entry, skipping");
                }
            }
        }

        for (idx, (ino, name, dtype)) in entries.into_iter().enumerate().skip(offset as usize) {
            let written = add_entry(DirEntry {
                ino,
                offset: (idx + 1) as u64,
                type_: dtype,
                name: name.as_bytes(),
            })?;
            if written == 0 {
                break;
            }
        }
        Ok(())
    }

    fn release(
        &self,
        _ctx: &Context,
        _inode: Self::Inode,
        _flags: u32,
        _handle: Self::Handle,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> io::Result<()> {
        Ok(())
    }
}

fn attr_to_stat64(attr: fuse_backend_rs::abi::fuse_abi::Attr) -> stat64 {
    let mut st: stat64 = unsafe { std::mem::zeroed() };
    st.st_ino = attr.ino;
    st.st_mode = attr.mode;
    st.st_nlink = attr.nlink as u64;
    st.st_uid = attr.uid;
    st.st_gid = attr.gid;
    st.st_size = attr.size as i64;
    st.st_atime = attr.atime as i64;
    st.st_mtime = attr.mtime as i64;
    st.st_ctime = attr.ctime as i64;
    st.st_blksize = 4096;
    st.st_blocks = attr.blocks as i64;
    st
}
