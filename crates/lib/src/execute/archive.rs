//! Solution packaging.
//!
//! Only the allow-listed top-level folders of a solution are shipped to a
//! host: zipped for an agent, copied for the local executor.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::consts::SOLUTION_FOLDERS;

use super::types::ExecuteError;

/// Files and directories of the allow-listed folders, relative to `solution_dir`, sorted.
fn solution_entries(solution_dir: &Path) -> Result<Vec<(PathBuf, bool)>, ExecuteError> {
  let mut entries = Vec::new();

  for folder in SOLUTION_FOLDERS {
    let root = solution_dir.join(folder);
    if !root.is_dir() {
      continue;
    }
    for entry in WalkDir::new(&root).sort_by_file_name() {
      let entry = entry.map_err(io::Error::from)?;
      let relative = entry
        .path()
        .strip_prefix(solution_dir)
        .unwrap_or(entry.path())
        .to_path_buf();
      entries.push((relative, entry.file_type().is_dir()));
    }
  }

  Ok(entries)
}

/// Archive name of a relative path, always with forward slashes.
fn entry_name(relative: &Path) -> String {
  relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// Zip the allow-listed folders of a solution into memory.
pub fn solution_archive(solution_dir: &Path) -> Result<Vec<u8>, ExecuteError> {
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
  let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
  let mut files = 0usize;

  for (relative, is_dir) in solution_entries(solution_dir)? {
    let name = entry_name(&relative);
    if is_dir {
      zip.add_directory(format!("{name}/"), options)?;
    } else {
      zip.start_file(name, options)?;
      let mut file = fs::File::open(solution_dir.join(&relative))?;
      io::copy(&mut file, &mut zip)?;
      files += 1;
    }
  }

  let bytes = zip.finish()?.into_inner();
  debug!(solution = %solution_dir.display(), files, size = bytes.len(), "solution archived");
  Ok(bytes)
}

/// Copy the allow-listed folders of a solution under `target`.
pub fn copy_solution(solution_dir: &Path, target: &Path) -> Result<usize, ExecuteError> {
  let mut files = 0usize;

  for (relative, is_dir) in solution_entries(solution_dir)? {
    let dest = target.join(&relative);
    if is_dir {
      fs::create_dir_all(&dest)?;
    } else {
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(solution_dir.join(&relative), &dest)?;
      files += 1;
    }
  }

  debug!(solution = %solution_dir.display(), target = %target.display(), files, "solution copied");
  Ok(files)
}
