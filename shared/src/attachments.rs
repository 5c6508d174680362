//! Limits on files attached to notes
//!
//! Clients check a selection with [check_selection] before uploading anything; the server enforces the same
//! limits per upload.

/// Maximum number of attachments a single note may have
pub const MAX_ATTACHMENTS_PER_NOTE: usize = 5;

/// Maximum size of a single attachment, in bytes
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("you can only upload up to {} files per note", MAX_ATTACHMENTS_PER_NOTE)]
    TooMany,

    #[error("each file must be at most 10MB (file {index} is {size} bytes)")]
    TooLarge { index: usize, size: u64 },
}

/// Check whether files of the specified `sizes` may be added to a note which already has `existing` files
/// (attached or pending).
pub fn check_selection(existing: usize, sizes: &[u64]) -> Result<(), SelectionError> {
    if existing + sizes.len() > MAX_ATTACHMENTS_PER_NOTE {
        return Err(SelectionError::TooMany);
    }

    if let Some((index, &size)) = sizes
        .iter()
        .enumerate()
        .find(|(_, size)| **size > MAX_ATTACHMENT_BYTES)
    {
        return Err(SelectionError::TooLarge { index, size });
    }

    Ok(())
}
