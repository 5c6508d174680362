#![deny(warnings)]

pub static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
       id             INTEGER PRIMARY KEY AUTOINCREMENT,
       email          TEXT NOT NULL UNIQUE COLLATE NOCASE,
       password_hash  TEXT NOT NULL,
       role           TEXT NOT NULL DEFAULT 'student' CHECK (role IN ('admin', 'student'))
     )",
    "CREATE TABLE IF NOT EXISTS folders (
       id           INTEGER PRIMARY KEY AUTOINCREMENT,
       name         TEXT NOT NULL,
       year_level   TEXT CHECK (year_level IN ('2nd Year', '3rd Year')),
       is_chapter   INTEGER NOT NULL DEFAULT 0,
       is_exercise  INTEGER NOT NULL DEFAULT 0,
       parent_id    INTEGER,
       user_id      TEXT,
       created_at   TEXT NOT NULL,

       CHECK (is_chapter + is_exercise = 1),
       CHECK (is_chapter = 0 OR parent_id IS NULL),
       CHECK (is_exercise = 0 OR parent_id IS NOT NULL)
     )",
    "CREATE INDEX IF NOT EXISTS folders_parent ON folders (parent_id)",
    "CREATE TABLE IF NOT EXISTS tags (
       id          INTEGER PRIMARY KEY AUTOINCREMENT,
       name        TEXT NOT NULL,
       name_key    TEXT NOT NULL UNIQUE,
       color       TEXT NOT NULL,
       created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS code_snippets (
       id            INTEGER PRIMARY KEY AUTOINCREMENT,
       title         TEXT NOT NULL,
       description   TEXT,
       language      TEXT NOT NULL
                     CHECK (language IN ('html', 'css', 'javascript', 'cpp', 'java', 'php')),
       code_content  TEXT NOT NULL,
       folder_id     INTEGER,
       user_id       TEXT,
       created_at    TEXT NOT NULL,
       is_important  INTEGER NOT NULL DEFAULT 0,
       exam_notes    TEXT
     )",
    "CREATE INDEX IF NOT EXISTS code_snippets_folder ON code_snippets (folder_id)",
    // No foreign keys here: a link may outlive its tag, in which case readers drop it.
    "CREATE TABLE IF NOT EXISTS code_snippets_tags (
       tag_id           INTEGER NOT NULL,
       code_snippet_id  INTEGER NOT NULL,

       PRIMARY KEY (tag_id, code_snippet_id)
     )",
    "CREATE INDEX IF NOT EXISTS code_snippets_tags_snippet ON code_snippets_tags (code_snippet_id)",
    "CREATE TABLE IF NOT EXISTS subjects (
       id           INTEGER PRIMARY KEY AUTOINCREMENT,
       name         TEXT NOT NULL,
       description  TEXT,
       parent_id    INTEGER,
       created_at   TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS notes (
       id          INTEGER PRIMARY KEY AUTOINCREMENT,
       title       TEXT NOT NULL,
       content     TEXT NOT NULL DEFAULT '',
       subject_id  INTEGER,
       created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS attachments (
       id          INTEGER PRIMARY KEY AUTOINCREMENT,
       note_id     INTEGER NOT NULL,
       file_name   TEXT NOT NULL,
       file_type   TEXT NOT NULL,
       file_url    TEXT NOT NULL,
       file_size   INTEGER NOT NULL,
       created_by  TEXT,
       created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS comments (
       id          INTEGER PRIMARY KEY AUTOINCREMENT,
       note_id     INTEGER NOT NULL,
       content     TEXT NOT NULL,
       created_by  TEXT NOT NULL,
       created_at  TEXT NOT NULL
     )",
];
