//! Classroom shared (e.g. protocol) code
//!
//! This crate contains code shared between the Classroom server and client crates.  It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs and enums which define the client/server protocol, plus
//! the pure logic both sides need to agree on:
//!
//! - the `hierarchy` submodule projects a flat folder list into chapters and exercises,
//! - the `filter` submodule classifies picker selections and refines snippets by tag,
//! - the `attachments` submodule enforces the per-note attachment limits.

#![deny(warnings)]

use {
    anyhow::{anyhow, Error},
    chrono::{DateTime, Utc},
    serde::de::{Deserialize, Deserializer},
    serde_derive::{Deserialize, Serialize},
    std::{
        fmt::{self, Display},
        str::FromStr,
    },
};

pub mod attachments;
pub mod filter;
pub mod hierarchy;

/// Name of the reserved tag which is hidden from user-facing tag pickers
pub const UNTAGGED: &str = "untagged";

/// Palette from which a color is picked for tags created without one
pub const DEFAULT_COLORS: &[&str] = &[
    "#3B82F6", // blue
    "#10B981", // green
    "#F59E0B", // yellow
    "#EF4444", // red
    "#8B5CF6", // purple
    "#EC4899", // pink
    "#6366F1", // indigo
    "#14B8A6", // teal
    "#F97316", // orange
    "#06B6D4", // cyan
];

/// Return true iff `color` has the form "#RRGGBB".
pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// OAuth 2 grant type (we currently only support the "password" type)
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
}

/// OAuth 2 "password" type authentication request
///
/// The `username` may be a bare user name, in which case the server appends its configured login domain, or a
/// full email address.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    pub username: String,
    pub password: String,
}

/// OAuth 2 access token type (we currently only support the "jwt" type)
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Jwt,
}

/// OAuth 2 authentication success response
#[derive(Serialize, Deserialize)]
pub struct TokenSuccess {
    pub access_token: String,
    pub token_type: TokenType,
}

/// OAuth 2 authentication error type
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorType {
    UnauthorizedClient,
}

/// OAuth 2 authentication error response
#[derive(Serialize, Deserialize)]
pub struct TokenError {
    pub error: TokenErrorType,
    pub error_description: Option<String>,
}

/// Role of a user, stored alongside the user's credentials
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May create, edit, and delete content
    Admin,

    /// May browse content and add comments
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
        }
    }

    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "admin" => Self::Admin,
            "student" => Self::Student,
            _ => return Err(anyhow!("unrecognized role: {s}")),
        })
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON web token claims embedded in access tokens issued by a Classroom server
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Authorization {
    /// When this token expires (in seconds since the start of 1970 UTC)
    #[serde(rename = "exp")]
    pub expiration: u64,

    /// The email address of the user this token represents
    #[serde(rename = "sub")]
    pub subject: String,

    /// The role the user had when the token was issued
    #[serde(rename = "rol")]
    pub role: Role,
}

impl Authorization {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Response to a GET /session request
///
/// Clients resolve this once after logging in and use `is_admin` as the capability flag for any admin-only
/// controls.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Session {
    pub subject: String,
    pub role: Role,
    pub is_admin: bool,
}

impl From<&Authorization> for Session {
    fn from(auth: &Authorization) -> Self {
        Self {
            subject: auth.subject.clone(),
            role: auth.role,
            is_admin: auth.is_admin(),
        }
    }
}

/// Year level to which a chapter (and its exercises) belongs
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum YearLevel {
    #[serde(rename = "2nd Year")]
    Second,

    #[serde(rename = "3rd Year")]
    Third,
}

impl YearLevel {
    pub const ALL: [YearLevel; 2] = [YearLevel::Second, YearLevel::Third];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "2nd Year",
            Self::Third => "3rd Year",
        }
    }
}

impl FromStr for YearLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|year| year.as_str() == s)
            .ok_or_else(|| anyhow!("unrecognized year level: {s}"))
    }
}

impl Display for YearLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Programming languages a snippet may be written in
///
/// Each language has a storage value (e.g. "cpp") and a display label (e.g. "C++").  The serde representation
/// is the storage value.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Html,
    Css,
    Javascript,
    Cpp,
    Java,
    Php,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Html,
        Language::Css,
        Language::Javascript,
        Language::Cpp,
        Language::Java,
        Language::Php,
    ];

    pub fn value(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Javascript => "javascript",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Php => "php",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Css => "CSS",
            Self::Javascript => "JavaScript",
            Self::Cpp => "C++",
            Self::Java => "Java",
            Self::Php => "PHP",
        }
    }

    /// Find the language whose display label is exactly `label`.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|language| language.label() == label)
    }
}

impl FromStr for Language {
    type Err = Error;

    /// Parse a `Language` from its storage value (e.g. "javascript").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|language| language.value() == s)
            .ok_or_else(|| anyhow!("unsupported language: {s}"))
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Deserialize a field which distinguishes "absent" (outer `None`) from "explicitly null" (`Some(None)`).
///
/// Use together with `#[serde(default)]`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// The two kinds of folder
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FolderKind {
    /// Top-level folder scoped to a year level
    Chapter,

    /// Folder nested one level under a chapter
    Exercise,
}

/// A row of the folders table
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub year_level: Option<YearLevel>,
    pub is_chapter: bool,
    pub is_exercise: bool,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    /// Classify this folder by its flags, returning `None` if both or neither of them are set.
    pub fn kind(&self) -> Option<FolderKind> {
        match (self.is_chapter, self.is_exercise) {
            (true, false) => Some(FolderKind::Chapter),
            (false, true) => Some(FolderKind::Exercise),
            _ => None,
        }
    }
}

/// Body of a POST /folders request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewFolder {
    pub name: String,
    pub year_level: Option<YearLevel>,
    pub kind: FolderKind,

    /// Must be `None` for a chapter and the id of an existing chapter for an exercise
    pub parent_id: Option<i64>,
}

/// Body of a PATCH /folders/{id} request
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FolderPatch {
    pub name: Option<String>,
}

/// Query string of a GET /folders/chapters request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChaptersQuery {
    pub year_level: YearLevel,
}

/// A row of the tags table
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Body of a POST /tags request
///
/// If `color` is `None`, the server picks one of `DEFAULT_COLORS`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub color: Option<String>,
}

/// Body of a PATCH /tags/{id} request
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TagPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Identifies a folder for display purposes
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct FolderRef {
    pub id: i64,
    pub name: String,
}

/// The folder a snippet is filed under, plus that folder's parent chapter if it is an exercise
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct FolderPath {
    pub id: i64,
    pub name: String,
    pub parent: Option<FolderRef>,
}

impl Display for FolderPath {
    /// Format as "Chapter / Exercise", or just "Chapter" for a top-level folder.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{} / {}", parent.name, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A code snippet with its tags and folder path resolved
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub language: Language,
    pub code_content: String,
    pub folder_id: Option<i64>,

    /// `None` if `folder_id` is `None` or refers to a folder which no longer exists
    pub folder: Option<FolderPath>,

    pub created_at: DateTime<Utc>,
    pub is_important: bool,
    pub exam_notes: Option<String>,

    /// Tags attached via the link table, excluding links to tags which no longer exist
    pub tags: Vec<Tag>,
}

/// Query string of a GET /snippets request
///
/// All fields are optional and independent.  Note that `folder` matches exactly: selecting a chapter does not
/// include snippets filed under that chapter's exercises.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct SnippetsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<i64>,

    /// Tag name, matched case-insensitively
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

/// Either an existing folder or the name of a folder to create
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FolderChoice {
    Existing(i64),
    New(String),
}

/// Body of a POST /snippets request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewSnippet {
    pub title: String,
    pub description: Option<String>,
    pub language: Language,
    pub code_content: String,

    /// Year level assigned to any chapter or exercise created for this snippet
    pub year_level: YearLevel,

    pub chapter: Option<FolderChoice>,
    pub exercise: Option<FolderChoice>,

    /// Names of tags to attach, created if they don't exist yet
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub is_important: bool,

    pub exam_notes: Option<String>,
}

/// Reasons a `NewSnippet` may be rejected before anything is written
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SubmissionError {
    #[error("title is required")]
    MissingTitle,

    #[error("code content is required")]
    MissingCode,

    #[error("folder names must not be empty")]
    EmptyFolderName,

    #[error("an exercise requires a chapter")]
    ExerciseWithoutChapter,

    #[error("tag names must not be empty")]
    EmptyTagName,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl NewSnippet {
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if blank(&self.title) {
            return Err(SubmissionError::MissingTitle);
        }

        if blank(&self.code_content) {
            return Err(SubmissionError::MissingCode);
        }

        for choice in self.chapter.iter().chain(&self.exercise) {
            if let FolderChoice::New(name) = choice {
                if blank(name) {
                    return Err(SubmissionError::EmptyFolderName);
                }
            }
        }

        if matches!(self.exercise, Some(FolderChoice::New(_))) && self.chapter.is_none() {
            return Err(SubmissionError::ExerciseWithoutChapter);
        }

        if self.tags.iter().any(|tag| blank(tag)) {
            return Err(SubmissionError::EmptyTagName);
        }

        Ok(())
    }
}

/// Body of a PATCH /snippets/{id} request
///
/// Absent fields are left unchanged.  For the nullable columns, an explicit `null` clears the value.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SnippetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_content: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub folder_id: Option<Option<i64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_important: Option<bool>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub exam_notes: Option<Option<String>>,
}

/// A node in the tree of subjects under which notes are filed
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Body of a POST /subjects request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewSubject {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

/// Query string of a GET /subjects request; `None` lists the root subjects
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SubjectsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<i64>,
}

/// Metadata for a file attached to a note
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Attachment {
    pub id: i64,
    pub note_id: i64,
    pub file_name: String,
    pub file_type: String,
    pub file_url: String,
    pub file_size: u64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query string of a POST /notes/{id}/attachments request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadQuery {
    pub file_name: String,
}

/// A study note with its attachments
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub subject_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

/// Body of a POST /notes request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewNote {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub subject_id: Option<i64>,
}

/// Query string of a GET /notes request; `None` lists notes not filed under any subject
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NotesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<i64>,
}

/// A comment on a note
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub note_id: i64,
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Body of a POST /notes/{id}/comments request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewComment {
    pub content: String,
}
