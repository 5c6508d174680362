//! "Share code" form state
//!
//! [ShareFields] holds the raw field values; [ShareForm] adds the cascading year → chapter → exercise pickers and
//! submission.  Nothing is sent to the server until the fields describe a valid [NewSnippet].

use {
    crate::client::Api,
    anyhow::Result,
    classroom_shared::{
        filter, Folder, FolderChoice, Language, NewSnippet, Snippet, SubmissionError, YearLevel,
    },
    log::warn,
    std::{collections::HashSet, sync::Arc},
    thiserror::Error as ThisError,
};

#[derive(ThisError, Debug, Clone, Copy, Eq, PartialEq)]
pub enum FormError {
    #[error("please select a language")]
    MissingLanguage,

    #[error("please select a year level")]
    MissingYearLevel,

    #[error(transparent)]
    Invalid(#[from] SubmissionError),
}

#[derive(Debug, Clone, Default)]
pub struct ShareFields {
    pub title: String,
    pub description: String,
    pub language: Option<Language>,
    pub code: String,
    pub year_level: Option<YearLevel>,

    pub selected_chapter: Option<i64>,
    pub new_chapter_name: String,
    pub selected_exercise: Option<i64>,
    pub new_exercise_name: String,

    /// Comma-separated tag names
    pub tags: String,

    pub is_important: bool,
    pub exam_notes: String,
}

fn optional(s: &str) -> Option<String> {
    let s = s.trim();

    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

/// Split a comma-separated tag list, dropping blanks and case-insensitive duplicates.
pub fn parse_tags(tags: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && seen.insert(filter::tag_key(tag)))
        .map(str::to_owned)
        .collect()
}

impl ShareFields {
    /// Build a validated submission from these fields.
    ///
    /// A selected chapter takes precedence over a typed chapter name, while a typed exercise name takes precedence
    /// over a selected exercise.
    pub fn to_new_snippet(&self) -> Result<NewSnippet, FormError> {
        let language = self.language.ok_or(FormError::MissingLanguage)?;
        let year_level = self.year_level.ok_or(FormError::MissingYearLevel)?;

        let chapter = self
            .selected_chapter
            .map(FolderChoice::Existing)
            .or_else(|| optional(&self.new_chapter_name).map(FolderChoice::New));

        let exercise = optional(&self.new_exercise_name)
            .map(FolderChoice::New)
            .or_else(|| self.selected_exercise.map(FolderChoice::Existing));

        let new = NewSnippet {
            title: self.title.trim().to_owned(),
            description: optional(&self.description),
            language,
            code_content: self.code.clone(),
            year_level,
            chapter,
            exercise,
            tags: parse_tags(&self.tags),
            is_important: self.is_important,
            exam_notes: optional(&self.exam_notes),
        };

        new.validate()?;

        Ok(new)
    }
}

pub struct ShareForm<A> {
    api: Arc<A>,
    pub fields: ShareFields,

    /// Chapters offered for the selected year level
    pub chapters: Vec<Folder>,

    /// Exercises offered for the selected chapter
    pub exercises: Vec<Folder>,

    pub error: Option<String>,
}

impl<A: Api> ShareForm<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            fields: ShareFields::default(),
            chapters: Vec::new(),
            exercises: Vec::new(),
            error: None,
        }
    }

    /// Select a year level, clearing any chapter and exercise selection and loading that year's chapters.
    pub async fn set_year_level(&mut self, year: Option<YearLevel>) -> Result<()> {
        self.fields.year_level = year;
        self.fields.selected_chapter = None;
        self.fields.selected_exercise = None;
        self.chapters.clear();
        self.exercises.clear();

        if let Some(year) = year {
            self.chapters = self.api.chapters(year).await?;
        }

        Ok(())
    }

    /// Select an existing chapter (or none), clearing any exercise selection and loading its exercises.
    pub async fn select_chapter(&mut self, chapter: Option<i64>) -> Result<()> {
        self.fields.selected_chapter = chapter;
        self.fields.selected_exercise = None;
        self.exercises.clear();

        if let Some(chapter) = chapter {
            self.exercises = self.api.exercises(chapter).await?;
        }

        Ok(())
    }

    /// Validate and submit the form.
    ///
    /// On success, the fields are reset and the created snippet is returned.  On failure, `error` describes the
    /// problem, the fields are left as they were, and `None` is returned.
    pub async fn submit(&mut self) -> Option<Snippet> {
        let new = match self.fields.to_new_snippet() {
            Ok(new) => new,
            Err(e) => {
                self.error = Some(e.to_string());
                return None;
            }
        };

        match self.api.create_snippet(new).await {
            Ok(snippet) => {
                self.fields = ShareFields::default();
                self.chapters.clear();
                self.exercises.clear();
                self.error = None;

                Some(snippet)
            }

            Err(e) => {
                warn!("error sharing snippet: {e:?}");

                self.error = Some(e.to_string());

                None
            }
        }
    }
}
