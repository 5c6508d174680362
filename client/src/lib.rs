//! Classroom client library
//!
//! [HttpClient] talks to a Classroom server.  The remaining modules hold the view state a frontend needs on top
//! of it, independent of any particular UI toolkit:
//!
//! - [browser::Browser] loads snippets, tags, and folders and reloads snippets as pickers change, never letting a
//!   stale response replace a newer one,
//! - [share_form::ShareForm] validates and submits new snippets,
//! - [attachments::PendingAttachments] checks and uploads files selected for a note.

#![deny(warnings)]

pub use client::{Api, ApiError, HttpClient};

pub mod attachments;
pub mod browser;
mod client;
pub mod share_form;
