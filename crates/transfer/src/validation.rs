use std::path::{Component, Path};

use crate::TransferError;

/// Longest item name accepted for export, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validates that an item name is a plain file name that can be written
/// inside a target directory.
///
/// Names come from the remote peer, so anything that could escape the
/// directory is refused:
/// - empty names, `.` and `..`
/// - absolute paths and Windows prefixes (`C:`, `\\server`)
/// - names containing a path separator or NUL
/// - names longer than [`MAX_NAME_LEN`] bytes
pub fn validate_item_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name longer than {MAX_NAME_LEN} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::CurDir), _) => Err(
            TransferError::InvalidName(format!("relative directory not allowed: {name}")),
        ),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
