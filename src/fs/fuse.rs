//! FUSE adapter that projects the remote object store through the
//! dispatcher. Inode numbers are minted locally and mapped to remote paths;
//! the remote store itself only ever sees path strings.

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
    ReplyXattr, Request, TimeOrNow,
};
use tracing::warn;

use crate::{
    errno_of,
    fs::{ops::Dispatcher, OpenMode},
    remote::{join_path, Metadata},
    Result,
};

const ATTR_TTL: Duration = Duration::from_secs(1);

pub struct RemoteFs {
    ops: Arc<Dispatcher>,
    paths: Mutex<HashMap<u64, String>>,  // ino -> remote path
    inodes: Mutex<HashMap<String, u64>>, // remote path -> ino
    next_ino: Mutex<u64>,
    uid: u32,
    gid: u32,
}

impl RemoteFs {
    pub fn new(ops: Arc<Dispatcher>) -> Self {
        let mut paths = HashMap::new();
        let mut inodes = HashMap::new();
        paths.insert(1, "/".to_string());
        inodes.insert("/".to_string(), 1);
        Self {
            ops,
            paths: Mutex::new(paths),
            inodes: Mutex::new(inodes),
            next_ino: Mutex::new(2),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.paths.lock().unwrap().get(&ino).cloned()
    }

    fn get_or_insert_ino(&self, path: &str) -> u64 {
        if let Some(id) = self.inodes.lock().unwrap().get(path).copied() {
            return id;
        }
        let mut next = self.next_ino.lock().unwrap();
        let ino = *next;
        *next += 1;
        self.paths.lock().unwrap().insert(ino, path.to_string());
        self.inodes.lock().unwrap().insert(path.to_string(), ino);
        ino
    }

    fn forget_path(&self, path: &str) {
        if let Some(ino) = self.inodes.lock().unwrap().remove(path) {
            self.paths.lock().unwrap().remove(&ino);
        }
    }

    /// Rebind every inode at or under `from` to its post-rename path.
    fn remap_paths(&self, from: &str, to: &str) {
        let prefix = format!("{from}/");
        let mut paths = self.paths.lock().unwrap();
        let mut inodes = self.inodes.lock().unwrap();
        let affected: Vec<(u64, String)> = paths
            .iter()
            .filter(|(_, p)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(ino, p)| (*ino, p.clone()))
            .collect();
        for (ino, old) in affected {
            let new = format!("{to}{}", &old[from.len()..]);
            inodes.remove(&old);
            inodes.insert(new.clone(), ino);
            paths.insert(ino, new);
        }
    }

    fn attr_from_metadata(&self, ino: u64, stats: &Metadata) -> FileAttr {
        let kind = if stats.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        FileAttr {
            ino,
            size: stats.size,
            blocks: stats.size.div_ceil(512),
            atime: stats.modified,
            mtime: stats.modified,
            ctime: stats.modified,
            crtime: stats.modified,
            kind,
            // The store has no permission model to map onto.
            perm: 0o755,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn attr_for(&self, path: &str) -> Result<FileAttr> {
        let stats = self.ops.getattr(path)?;
        let ino = self.get_or_insert_ino(path);
        Ok(self.attr_from_metadata(ino, &stats))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.path_for(parent)?;
        Some(join_path(&parent_path, &name.to_string_lossy()))
    }
}

impl Filesystem for RemoteFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.attr_for(&path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_for(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.attr_for(&path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Only size changes reach the store; chmod/chown/utimens have
        // nothing to map onto and are silently accepted.
        if let Some(length) = size {
            if let Err(err) = self.ops.truncate(&path, length) {
                reply.error(errno_of(&err));
                return;
            }
        }

        match self.attr_for(&path) {
            Ok(mut attr) => {
                if let Some(length) = size {
                    // The cached stat may predate the truncate within its TTL.
                    attr.size = length;
                    attr.blocks = length.div_ceil(512);
                }
                reply.attr(&ATTR_TTL, &attr)
            }
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.path_for(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.ops.readlink(&path) {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        // Device nodes cannot exist in an object store.
        reply.error(crate::Error::Unsupported("device node creation").errno());
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        if let Err(err) = self.ops.mkdir(&path) {
            reply.error(errno_of(&err));
            return;
        }
        match self.attr_for(&path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.ops.unlink(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.ops.rmdir(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        // No symlink concept remotely; approximate with a copy of the
        // target object.
        let dest = match self.child_path(parent, link_name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let raw = target.to_string_lossy().to_string();
        let source = if raw.starts_with('/') {
            raw
        } else {
            let parent_path = self.path_for(parent).unwrap_or_else(|| "/".into());
            join_path(&parent_path, &raw)
        };
        if let Err(err) = self.ops.link(&source, &dest) {
            reply.error(errno_of(&err));
            return;
        }
        match self.attr_for(&dest) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.ops.rename(&from, &to) {
            Ok(()) => {
                self.remap_paths(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (source, dest) = match (self.path_for(ino), self.child_path(newparent, newname)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        if let Err(err) = self.ops.link(&source, &dest) {
            reply.error(errno_of(&err));
            return;
        }
        match self.attr_for(&dest) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_for(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.ops.open(&path, OpenMode::from_flags(flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let fh = match self.ops.open(&path, OpenMode::create()) {
            Ok(fh) => fh,
            Err(err) => {
                reply.error(errno_of(&err));
                return;
            }
        };
        match self.attr_for(&path) {
            Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, fh, 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.ops.read(fh, offset.max(0) as u64, size) {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.ops.write(fh, offset.max(0) as u64, data) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Write-back happens at release; flush has nothing to push.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.ops.release(fh) {
            Ok(()) => reply.ok(),
            Err(err) => {
                warn!(fh, error = %err, "release write-back failed");
                reply.error(errno_of(&err));
            }
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if self.path_for(ino).is_none() {
            reply.error(libc::ENOENT);
            return;
        }
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if offset != 0 {
            reply.ok();
            return;
        }
        let path = match self.path_for(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let children = match self.ops.readdir(&path) {
            Ok(children) => children,
            Err(err) => {
                reply.error(errno_of(&err));
                return;
            }
        };

        let mut entries = Vec::new();
        entries.push((ino, FileType::Directory, ".".to_string()));
        let parent_ino = if path == "/" {
            ino
        } else {
            self.get_or_insert_ino(crate::remote::parent_path(&path))
        };
        entries.push((parent_ino, FileType::Directory, "..".to_string()));

        for (name, stats) in children {
            let child = join_path(&path, &name);
            let child_ino = self.get_or_insert_ino(&child);
            let kind = if stats.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_ino, kind, name));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate() {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // Fixed synthetic numbers; the store exposes no usage totals here.
        reply.statfs(4096, 2048, 2048, 0, 0, 512, 255, 512);
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, size: u32, reply: ReplyXattr) {
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

/// Handle to a running mount; dropping it will not unmount automatically, so
/// callers should invoke `unmount` explicitly to clean up.
pub struct MountHandle {
    mountpoint: String,
    session: BackgroundSession,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("mountpoint", &self.mountpoint)
            .finish()
    }
}

impl MountHandle {
    pub fn unmount(self) {
        self.session.join();
    }
}

/// Spawn a background FUSE mount serving the dispatcher at `mountpoint`.
pub fn spawn_fs<P: AsRef<Path>>(ops: Arc<Dispatcher>, mountpoint: P) -> Result<MountHandle> {
    let mountpoint = mountpoint.as_ref().to_string_lossy().to_string();
    let fs = RemoteFs::new(Arc::clone(&ops));
    let options = vec![MountOption::FSName("boxfs".into())];
    match fuser::spawn_mount2(fs, &mountpoint, &options) {
        Ok(session) => Ok(MountHandle {
            mountpoint,
            session,
        }),
        Err(e) => {
            // Fallback to legacy spawn_mount for environments where spawn_mount2 isn't supported
            // (older fusermount/fuse). Keep the error if fallback also fails.
            if let Some(code) = e.raw_os_error() {
                if code != libc::ENOSYS && code != libc::EPERM && code != libc::EACCES {
                    return Err(e.into());
                }
            }

            let fs_fallback = RemoteFs::new(ops);
            let opt = std::ffi::OsString::from("fsname=boxfs");
            let args: [&std::ffi::OsStr; 2] = [std::ffi::OsStr::new("-o"), opt.as_os_str()];
            #[allow(deprecated)]
            let session = fuser::spawn_mount(fs_fallback, &mountpoint, &args)?;
            Ok(MountHandle {
                mountpoint,
                session,
            })
        }
    }
}
