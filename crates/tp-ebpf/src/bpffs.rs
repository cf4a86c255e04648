//! One-time preparation of the BPF filesystem used to pin maps.
//!
//! The emptiness check is the only guard: two processes bootstrapping the
//! same path at once can both see it empty and both mount. A directory that
//! holds anything at all is taken as already initialised, its contents are
//! not verified.

use crate::error::{EbpfError, EbpfResult};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use tracing::{debug, info};

/// Mounts a bpf filesystem at a path
pub trait Mounter {
    fn mount_bpf(&self, target: &Path) -> std::io::Result<()>;
}

pub struct BpfMounter;

impl Mounter for BpfMounter {
    fn mount_bpf(&self, target: &Path) -> std::io::Result<()> {
        use rustix::mount::{MountFlags, mount};

        debug!(target = %target.display(), "Mounting bpf filesystem");
        mount("bpf", target, "bpf", MountFlags::empty(), None)?;
        Ok(())
    }
}

/// True when the directory holds nothing but (recursively) empty directories
pub fn is_dir_empty(path: &Path) -> std::io::Result<bool> {
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            return Ok(false);
        }

        if !is_dir_empty(&entry.path())? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Mount the BPF filesystem at `fs_path` and create `tc/globals` under it,
/// unless the directory already has content
pub fn init_bpffs_maybe(fs_path: &Path, mounter: &dyn Mounter) -> EbpfResult<()> {
    let stat = std::fs::metadata(fs_path).map_err(|source| EbpfError::Stat {
        path: fs_path.to_path_buf(),
        source,
    })?;

    if !stat.is_dir() {
        return Err(EbpfError::NotADirectory(fs_path.to_path_buf()));
    }

    if !is_dir_empty(fs_path).map_err(EbpfError::ReadDir)? {
        debug!(path = %fs_path.display(), "BPF file system path not empty, assuming initialized");
        return Ok(());
    }

    mounter.mount_bpf(fs_path).map_err(EbpfError::Mount)?;

    DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(fs_path.join("tc").join("globals"))
        .map_err(EbpfError::CreateDir)?;

    info!(path = %fs_path.display(), "Initialized BPF file system");
    Ok(())
}
