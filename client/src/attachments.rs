//! Files selected for upload to a note
//!
//! A selection is checked against the per-note limits as a whole before anything is queued, so a note never ends
//! up with more than [MAX_ATTACHMENTS_PER_NOTE] files and no oversized file is ever sent.

use {
    crate::client::Api,
    classroom_shared::{
        attachments::{self, SelectionError},
        Attachment, Note,
    },
    log::warn,
};

pub use classroom_shared::attachments::{MAX_ATTACHMENTS_PER_NOTE, MAX_ATTACHMENT_BYTES};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingFile {
    pub name: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl PendingFile {
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Result of [PendingAttachments::upload_all]
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<Attachment>,

    /// Files which could not be uploaded, each with the reason
    pub failed: Vec<(PendingFile, String)>,
}

#[derive(Debug, Clone)]
pub struct PendingAttachments {
    note_id: i64,
    existing: usize,
    pending: Vec<PendingFile>,

    /// Reason the most recent selection was refused, if it was
    pub error: Option<String>,
}

impl PendingAttachments {
    pub fn new(note: &Note) -> Self {
        Self {
            note_id: note.id,
            existing: note.attachments.len(),
            pending: Vec::new(),
            error: None,
        }
    }

    pub fn pending(&self) -> &[PendingFile] {
        &self.pending
    }

    /// Number of further files which may still be selected
    pub fn remaining(&self) -> usize {
        MAX_ATTACHMENTS_PER_NOTE.saturating_sub(self.existing + self.pending.len())
    }

    /// Queue `files` for upload, or none of them if the selection would exceed a limit.
    pub fn select(&mut self, files: Vec<PendingFile>) -> Result<(), SelectionError> {
        let sizes = files.iter().map(PendingFile::size).collect::<Vec<_>>();

        match attachments::check_selection(self.existing + self.pending.len(), &sizes) {
            Ok(()) => {
                self.pending.extend(files);
                self.error = None;

                Ok(())
            }

            Err(e) => {
                self.error = Some(e.to_string());

                Err(e)
            }
        }
    }

    /// Drop the pending file at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<PendingFile> {
        if index < self.pending.len() {
            Some(self.pending.remove(index))
        } else {
            None
        }
    }

    /// Upload every pending file in order, continuing past failures.
    ///
    /// Successfully uploaded files count toward the note's existing attachments afterward; failed ones are
    /// reported and dropped from the queue.
    pub async fn upload_all<A: Api>(&mut self, api: &A) -> UploadReport {
        let mut report = UploadReport::default();

        for file in std::mem::take(&mut self.pending) {
            match api
                .upload_attachment(
                    self.note_id,
                    file.name.clone(),
                    file.content_type.clone(),
                    file.body.clone(),
                )
                .await
            {
                Ok(attachment) => {
                    self.existing += 1;
                    report.uploaded.push(attachment);
                }

                Err(e) => {
                    warn!("error uploading {} to note {}: {e:?}", file.name, self.note_id);

                    report.failed.push((file, e.to_string()));
                }
            }
        }

        report
    }
}
