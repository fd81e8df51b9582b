//! The materialised workspace tree and its checkout marker.
//!
//! Entry writing, pruning and enumeration are synchronous and run inside
//! blocking tasks; the marker accessors are async and called from the
//! system facade directly.

use std::fs::{self, FileTimes};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// File name of the checkout marker inside the workspace root.
pub const CHECKOUT_MARKER: &str = ".dcd";

/// Permission mask applied to everything the workspace writes. Write bits
/// are stripped from all classes: workspace files are mastered read-only so
/// tampering shows up as a newer mtime.
const MODE_MASK: u32 = 0o777555;

/// Kind of a workspace entry, as derived from its tar header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One materialised repository tree.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(CHECKOUT_MARKER)
    }

    fn write_reg_file(
        &self,
        path: &Path,
        mode: u32,
        mtime: SystemTime,
        reader: &mut dyn Read,
    ) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        let n = io::copy(reader, &mut file)?;
        tracing::debug!(path = %path.display(), bytes = n, "adding workspace file");

        file.set_times(
            FileTimes::new()
                .set_accessed(SystemTime::now())
                .set_modified(mtime),
        )?;
        drop(file);

        fs::set_permissions(path, fs::Permissions::from_mode(mode & MODE_MASK))
    }

    fn make_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & MODE_MASK))
    }

    /// Materialise one tar entry.
    ///
    /// An existing entry of the same kind is refreshed (directories get
    /// their permissions updated; files are rewritten only when the
    /// incoming mtime is newer or `replace` is set). A kind mismatch
    /// replaces the existing entry under the same mtime/`replace` rule and
    /// otherwise keeps it.
    pub fn write_entry(
        &self,
        name: &str,
        kind: EntryKind,
        mode: u32,
        mtime: SystemTime,
        reader: &mut dyn Read,
        replace: bool,
    ) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.entry_path(name);

        let existing = match fs::metadata(&path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let Some(info) = existing else {
            return match kind {
                EntryKind::Dir => self.make_dir(&path, mode),
                EntryKind::File => self.write_reg_file(&path, mode, mtime, reader),
            };
        };

        let newer = info.modified()? < mtime;
        match (info.is_dir(), kind) {
            (true, EntryKind::Dir) => {
                fs::set_permissions(&path, fs::Permissions::from_mode(mode & MODE_MASK))
            }
            (true, EntryKind::File) => {
                if newer || replace {
                    fs::remove_dir_all(&path)?;
                    self.write_reg_file(&path, mode, mtime, reader)
                } else {
                    Ok(())
                }
            }
            (false, EntryKind::Dir) => {
                if newer || replace {
                    fs::remove_file(&path)?;
                    self.make_dir(&path, mode)
                } else {
                    Ok(())
                }
            }
            (false, EntryKind::File) => {
                if newer || replace {
                    self.write_reg_file(&path, mode, mtime, reader)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Recursive enumeration in lexical order.
    ///
    /// The visitor receives the relative path, stat info and, for regular
    /// files, an open read stream. The literal paths `"."` and `".dcd"`
    /// are not suppressed at this layer.
    pub fn walk<F>(&self, mut visitor: F) -> io::Result<()>
    where
        F: FnMut(&str, &fs::Metadata, Option<&mut fs::File>) -> io::Result<()>,
    {
        fs::create_dir_all(&self.root)?;
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            let rel = relative_name(&self.root, entry.path());
            tracing::debug!(path = %rel, "walking workspace entry");
            let meta = entry.metadata().map_err(io::Error::other)?;
            if meta.is_dir() {
                visitor(&rel, &meta, None)?;
            } else {
                let mut file = fs::File::open(entry.path())?;
                visitor(&rel, &meta, Some(&mut file))?;
            }
        }
        Ok(())
    }

    /// Recursively delete every entry matching the predicate.
    ///
    /// `"."` and the checkout marker are always kept. Removal failures are
    /// logged and skipped.
    pub fn remove_all<F>(&self, mut predicate: F)
    where
        F: FnMut(&str) -> bool,
    {
        let mut it = WalkDir::new(&self.root).sort_by_file_name().into_iter();
        while let Some(entry) = it.next() {
            let Ok(entry) = entry else { continue };
            let rel = relative_name(&self.root, entry.path());
            if rel == "." || rel == CHECKOUT_MARKER {
                continue;
            }
            if predicate(&rel) {
                tracing::debug!(path = %rel, "removing workspace entry");
                let res = if entry.file_type().is_dir() {
                    let res = fs::remove_dir_all(entry.path());
                    if res.is_ok() {
                        it.skip_current_dir();
                    }
                    res
                } else {
                    fs::remove_file(entry.path())
                };
                if let Err(e) = res {
                    tracing::warn!(path = %rel, error = %e, "cannot remove workspace entry");
                }
            }
        }
    }

    /// Synchronous marker read for the blocking unpack path.
    pub(crate) fn checkout_sync(&self) -> io::Result<String> {
        match fs::read_to_string(self.marker_path()) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Read the checkout marker; empty string when the workspace is clean.
    pub async fn get_checkout(&self) -> io::Result<String> {
        match tokio::fs::read_to_string(self.marker_path()).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Write the checkout marker, creating the root on demand.
    pub async fn set_checkout(&self, digest: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.marker_path();
        tokio::fs::write(&path, digest).await?;
        tokio::fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).await
    }

    /// Remove the checkout marker; absence is not an error.
    pub async fn remove_checkout(&self) -> io::Result<()> {
        match tokio::fs::remove_file(self.marker_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    if rel.as_os_str().is_empty() {
        ".".to_string()
    } else {
        rel.to_string_lossy().into_owned()
    }
}
