//! `fuser::Filesystem` adapter bridging inode-addressed FUSE callbacks into
//! the path-addressed C1 (catalog)/C3 (download cache)/C4 (resolver) core.
//!
//! `fuser` addresses filesystem objects by inode, unlike the original
//! `fusepy`-based adapter, which received the full path string on every
//! call. `Inodes` is the small bidirectional table that bridges the two:
//! `lookup`/`readdir` mint an inode for a resolved virtual path the first
//! time they see it and never evict it, mirroring the download cache's own
//! "never evicted" policy for the process lifetime.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};

use crate::cache::{Attrs, DownloadCache, Handle, OpenError};
use crate::catalog::{Facet, Index};
use crate::resolver::{self, DirName, ParseResult};

const ATTR_TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 512;
const ROOT_INO: u64 = 1;

/// The seven filenames exposed under every accession directory (spec §3):
/// two literal, five templated on the accession slug.
fn accession_file_names(accession: &str) -> Vec<String> {
    vec![
        "README.txt".to_string(),
        "md5checksums.txt".to_string(),
        format!("{accession}_assembly_stats.txt"),
        format!("{accession}_assembly_report.txt"),
        format!("{accession}_genomic.fna.gz"),
        format!("{accession}_genomic.gbff.gz"),
        format!("{accession}_genomic.gff.gz"),
    ]
}

/// Directory children of a listing `ParseResult`, excluding `.`/`..`
/// (those are added by `readdir` itself). Empty for a terminal-file result.
fn list_entries(result: &ParseResult, catalog: &Index) -> Vec<String> {
    if let Some(accession) = result.query.get(&Facet::Accession) {
        return accession_file_names(accession);
    }
    match result.dir_name {
        Some(DirName::Default) => {
            let mut names: Vec<String> = Facet::ALL
                .iter()
                .filter(|facet| !result.query.contains_key(facet))
                .map(|facet| facet.as_str().to_string())
                .collect();
            names.sort_unstable();
            names
        }
        Some(DirName::Facet(facet)) => {
            let mut values: Vec<String> = catalog.list(facet, &result.query).into_iter().collect();
            values.sort_unstable();
            values
        }
        None => Vec::new(),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// `u64` inode <-> virtual path table. Inodes are minted lazily by
/// `lookup`/`readdir` and live for the process lifetime; the directory tree
/// is immutable once the catalog is loaded, so nothing is ever evicted.
struct Inodes {
    path_of: HashMap<u64, String>,
    ino_of: HashMap<String, u64>,
    next: u64,
}

impl Inodes {
    fn new() -> Self {
        let mut path_of = HashMap::new();
        let mut ino_of = HashMap::new();
        path_of.insert(ROOT_INO, "/".to_string());
        ino_of.insert("/".to_string(), ROOT_INO);
        Inodes { path_of, ino_of, next: ROOT_INO + 1 }
    }

    fn path(&self, ino: u64) -> Option<String> {
        self.path_of.get(&ino).cloned()
    }

    fn get_or_insert(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.ino_of.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.path_of.insert(ino, path.to_string());
        self.ino_of.insert(path.to_string(), ino);
        ino
    }
}

/// Open file handles: fh -> the cache [`Handle`] backing it.
struct OpenFiles {
    handles: HashMap<u64, Handle>,
    next_fh: u64,
}

impl OpenFiles {
    fn new() -> Self {
        OpenFiles { handles: HashMap::new(), next_fh: 1 }
    }

    fn insert(&mut self, handle: Handle) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        fh
    }
}

/// The read-only assembly-catalog filesystem.
pub struct AssemblyFs {
    catalog: Arc<Index>,
    cache: Arc<DownloadCache>,
    rt: tokio::runtime::Handle,
    inodes: Mutex<Inodes>,
    open_files: Mutex<OpenFiles>,
}

impl AssemblyFs {
    pub fn new(catalog: Arc<Index>, cache: Arc<DownloadCache>, rt: tokio::runtime::Handle) -> Self {
        AssemblyFs {
            catalog,
            cache,
            rt,
            inodes: Mutex::new(Inodes::new()),
            open_files: Mutex::new(OpenFiles::new()),
        }
    }

    fn dir_attr(&self, ino: u64) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, attrs: Attrs) -> FileAttr {
        FileAttr {
            ino,
            size: attrs.size,
            blocks: attrs.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attrs.mtime,
            mtime: attrs.mtime,
            ctime: attrs.mtime,
            crtime: attrs.mtime,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Resolves `ino`'s virtual path to an attribute, delegating terminal
    /// files to the cache per spec §4.5 and returning synthetic directory
    /// attributes otherwise.
    fn attr_for(&self, ino: u64, path: &str) -> Result<FileAttr, libc::c_int> {
        let result = resolver::parse(path);
        match result.file_path {
            Some(relative) => {
                let attrs =
                    self.rt.block_on(self.cache.getattr(&relative)).map_err(|err| nix_errno(&err))?;
                Ok(self.file_attr(ino, attrs))
            }
            None => Ok(self.dir_attr(ino)),
        }
    }
}

/// Maps the handful of cache-boundary failures `fuser` needs an errno for.
/// The cache never raises these upward from `read` (those become warning
/// file bytes per spec §7.3); this conversion only applies at `open`/`getattr`.
fn nix_errno(err: &OpenError) -> libc::c_int {
    match err {
        OpenError::PathConfinement => libc::EACCES,
        OpenError::OriginUnknown => libc::ENOENT,
    }
}

impl Filesystem for AssemblyFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name_str) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        let parent_path = {
            let inodes = self.inodes.lock().unwrap();
            match inodes.path(parent) {
                Some(path) => path,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            }
        };

        let parent_result = resolver::parse(&parent_path);
        if parent_result.file_path.is_some() {
            reply.error(libc::ENOTDIR);
            return;
        }
        let entries = list_entries(&parent_result, &self.catalog);
        if !entries.iter().any(|entry| entry == name_str) {
            reply.error(libc::ENOENT);
            return;
        }

        let child_path = join(&parent_path, name_str);
        let child_ino = self.inodes.lock().unwrap().get_or_insert(&child_path);

        match self.attr_for(child_ino, &child_path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = {
            let inodes = self.inodes.lock().unwrap();
            inodes.path(ino)
        };
        let Some(path) = path else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for(ino, &path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = {
            let inodes = self.inodes.lock().unwrap();
            inodes.path(ino)
        };
        let Some(path) = path else {
            reply.error(libc::ENOENT);
            return;
        };

        let result = resolver::parse(&path);
        let names: Vec<String> = match &result.file_path {
            Some(_) => vec![path.rsplit('/').next().unwrap_or(&path).to_string()],
            None => list_entries(&result, &self.catalog),
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];

        for name in names {
            let child_path = join(&path, &name);
            let child_ino = self.inodes.lock().unwrap().get_or_insert(&child_path);
            let kind = if resolver::parse(&child_path).file_path.is_some() {
                FileType::RegularFile
            } else {
                FileType::Directory
            };
            entries.push((child_ino, kind, name));
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name.as_str()) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EROFS);
            return;
        }

        let path = {
            let inodes = self.inodes.lock().unwrap();
            inodes.path(ino)
        };
        let Some(path) = path else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(relative) = resolver::parse(&path).file_path else {
            reply.error(libc::EISDIR);
            return;
        };

        match self.rt.block_on(self.cache.open(&relative)) {
            Ok(handle) => {
                let fh = self.open_files.lock().unwrap().insert(handle);
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(nix_errno(&err)),
        }
    }

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
        let offset = offset.max(0) as u64;
        let result = {
            let mut open_files = self.open_files.lock().unwrap();
            match open_files.handles.get_mut(&fh) {
                Some(handle) => self.rt.block_on(self.cache.read(handle, offset, size)),
                None => {
                    reply.error(libc::EBADF);
                    return;
                }
            }
        };
        match result {
            Ok(bytes) => reply.data(&bytes),
            Err(_) => reply.error(libc::EIO),
        }
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
        self.open_files.lock().unwrap().handles.remove(&fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(4096, 2048, 2048, 0, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accession_file_names_has_seven_entries() {
        let names = accession_file_names("gca_1");
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"README.txt".to_string()));
        assert!(names.contains(&"md5checksums.txt".to_string()));
        assert!(names.contains(&"gca_1_genomic.fna.gz".to_string()));
    }

    #[test]
    fn inodes_reuse_existing_entries() {
        let mut inodes = Inodes::new();
        let a = inodes.get_or_insert("/genus/foo");
        let b = inodes.get_or_insert("/genus/foo");
        assert_eq!(a, b);
        assert_eq!(inodes.path(a).as_deref(), Some("/genus/foo"));
    }

    #[test]
    fn root_inode_is_preassigned() {
        let inodes = Inodes::new();
        assert_eq!(inodes.path(ROOT_INO).as_deref(), Some("/"));
    }

    #[test]
    fn join_handles_root_specially() {
        assert_eq!(join("/", "genus"), "/genus");
        assert_eq!(join("/genus", "foo"), "/genus/foo");
    }

    #[test]
    fn list_entries_prefers_accession_file_set_over_dir_name() {
        let tsv = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\nGCA_1\t1\t1\tHomo sapiens\thttps://example.org/all/GCA_1\n";
        let catalog = Index::build(std::io::Cursor::new(tsv.as_bytes())).unwrap();
        let result = resolver::parse("/accession/gca_1");
        let entries = list_entries(&result, &catalog);
        assert_eq!(entries.len(), 7);
    }

    #[test]
    fn list_entries_default_excludes_constrained_facets() {
        let tsv = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\nGCA_1\t1\t1\tHomo sapiens\thttps://example.org/all/GCA_1\n";
        let catalog = Index::build(std::io::Cursor::new(tsv.as_bytes())).unwrap();
        let result = resolver::parse("/genus/homo");
        let entries = list_entries(&result, &catalog);
        assert!(!entries.contains(&"genus".to_string()));
        assert!(entries.contains(&"taxid".to_string()));
    }
}
