//! Bulk package operations
//!
//! Directory-level orchestration over the core archive API: pack a source
//! tree into a fresh package, or extract a package back onto disk. Both
//! report progress through the same phased callback the archive's flush
//! path uses.

use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::archive::{Package, ProcessState};
use crate::codec::{CompressMethod, EncryptMethod};
use crate::error::{PackError, Result};

/// Packs every regular file under `src_dir` into a new package at
/// `out_path`, applying the same codec settings to each entry, then runs a
/// compacting flush and closes. Entries are added under their
/// separator-normalized relative paths, in sorted order.
pub fn create_package<P, Q, F>(
    src_dir: P,
    out_path: Q,
    compress: CompressMethod,
    encrypt: EncryptMethod,
    encrypt_key: i64,
    progress: F,
) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: FnMut(ProcessState, usize, usize) + Send + 'static,
{
    let src_dir = src_dir.as_ref();
    let files = collect_files(src_dir)?;
    let progress = Arc::new(Mutex::new(progress));

    let mut package = Package::create(out_path.as_ref())?;
    {
        let progress = Arc::clone(&progress);
        package.set_progress_observer(Box::new(move |state, current, total| {
            let mut cb = progress.lock();
            (*cb)(state, current, total);
        }));
    }

    let total = files.len();
    for (i, file) in files.iter().enumerate() {
        let relative = file.strip_prefix(src_dir).map_err(|_| {
            PackError::ApplicationFault("walked file escaped the source root".into())
        })?;
        let logical = relative.to_string_lossy().replace('\\', "/");
        let data = std::fs::read(file)?;
        package.add_file_with_options(&logical, &data, compress, encrypt, encrypt_key)?;
        {
            let mut cb = progress.lock();
            (*cb)(ProcessState::CalculatingBlockInfo, i + 1, total);
        }
    }

    package.flush(true)?;
    package.close()
}

/// Extracts every file in the package at `package_path` under `out_dir`,
/// creating parent directories as needed. Entries whose logical path would
/// escape `out_dir` are skipped with a warning.
pub fn extract_package<P, Q, F>(package_path: P, out_dir: Q, mut progress: F) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: FnMut(ProcessState, usize, usize),
{
    let mut package = Package::mount(package_path.as_ref())?;
    let files = package.list_files()?;
    let out_dir = out_dir.as_ref();

    let total = files.len();
    for (i, file) in files.iter().enumerate() {
        if !is_safe_relative(Path::new(file)) {
            warn!(path = %file, "Skipping entry that would escape the output directory");
            continue;
        }
        let mut stream = package.get_stream(file)?;
        let target = out_dir.join(file);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut stream, &mut out)?;
        progress(ProcessState::ExtractingBlockData, i + 1, total);
    }
    package.close()
}

/// Relative path containing no root or parent-directory components.
fn is_safe_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let kind = entry.file_type()?;
            if kind.is_dir() {
                pending.push(entry.path());
            } else if kind.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}
