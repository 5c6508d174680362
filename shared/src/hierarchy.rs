//! This module projects a flat list of folder rows into the chapter/exercise hierarchy used by folder pickers.
//!
//! All functions here are pure: they borrow from the already-loaded folder list and never fail.  Rows with
//! inconsistent flags (both or neither of `is_chapter` and `is_exercise` set) are excluded from every projection.

use {
    crate::{Folder, FolderKind, YearLevel},
    std::cmp::Ordering,
};

fn by_name(a: &&Folder, b: &&Folder) -> Ordering {
    a.name.cmp(&b.name).then(a.id.cmp(&b.id))
}

/// Return the chapters for the specified year, ordered by name.
pub fn chapters(folders: &[Folder], year: YearLevel) -> Vec<&Folder> {
    let mut chapters = folders
        .iter()
        .filter(|folder| {
            folder.kind() == Some(FolderKind::Chapter)
                && folder.year_level == Some(year)
                && folder.parent_id.is_none()
        })
        .collect::<Vec<_>>();

    chapters.sort_by(by_name);

    chapters
}

/// Return the exercises nested under the chapter with the specified id, ordered by name.
pub fn exercises(folders: &[Folder], chapter: i64) -> Vec<&Folder> {
    let mut exercises = folders
        .iter()
        .filter(|folder| {
            folder.kind() == Some(FolderKind::Exercise) && folder.parent_id == Some(chapter)
        })
        .collect::<Vec<_>>();

    exercises.sort_by(by_name);

    exercises
}

/// A chapter paired with its exercises
#[derive(Debug, Eq, PartialEq)]
pub struct ChapterNode<'a> {
    pub chapter: &'a Folder,
    pub exercises: Vec<&'a Folder>,
}

/// Return the chapters for the specified year, each with its exercises.
pub fn tree(folders: &[Folder], year: YearLevel) -> Vec<ChapterNode<'_>> {
    chapters(folders, year)
        .into_iter()
        .map(|chapter| ChapterNode {
            chapter,
            exercises: exercises(folders, chapter.id),
        })
        .collect()
}
