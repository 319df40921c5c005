use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::TransferError;
use crate::types::CompletedItem;
use crate::validation::validate_item_name;

/// Writes received items into `dir` and returns the written paths.
///
/// All names are validated before anything is written. A name that is
/// already taken, on disk or earlier in the batch, gets a ` (n)` suffix
/// before its extension.
pub fn export_items(dir: &Path, items: &[CompletedItem]) -> Result<Vec<PathBuf>, TransferError> {
    for item in items {
        validate_item_name(&item.name)?;
    }

    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(items.len());
    for item in items {
        let path = write_new(dir, &item.name, &item.bytes)?;
        debug!(path = %path.display(), size = item.bytes.len(), "item written");
        written.push(path);
    }

    info!(dir = %dir.display(), count = written.len(), "received items saved");
    Ok(written)
}

/// Creates `name` in `dir`, or the first free ` (n)` variant of it.
/// Existing files are never opened for writing.
fn write_new(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, TransferError> {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };

    for n in 0u32.. {
        let path = if n == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{stem} ({n}){ext}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("no free name for {name}")).into())
}
