//! Snippet browser view state
//!
//! A [Browser] holds everything a snippet listing page shows: the snippets matching the current folder and
//! tag/language selection, plus the tags and folders its pickers offer.  Each reload takes a ticket, and only the
//! response to the most recently issued ticket is applied, so a slow response can never overwrite a newer one.

use {
    crate::client::Api,
    anyhow::Result,
    classroom_shared::{
        filter::{self, SnippetFilter},
        hierarchy, Folder, Language, Snippet, Tag, YearLevel,
    },
    log::warn,
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    tokio::sync::Mutex as AsyncMutex,
};

#[derive(Debug, Clone, Default)]
pub struct BrowserState {
    pub snippets: Vec<Snippet>,
    pub tags: Vec<Tag>,
    pub folders: Vec<Folder>,

    /// Folder whose snippets are shown; `None` shows all snippets
    pub folder: Option<i64>,

    pub filter: SnippetFilter,

    /// True while a reload is outstanding
    pub loading: bool,

    pub error: Option<String>,
}

pub struct Browser<A> {
    api: Arc<A>,
    state: AsyncMutex<BrowserState>,
    latest: AtomicU64,
}

impl<A: Api> Browser<A> {
    /// Load snippets, tags, and folders concurrently.  All three must succeed.
    pub async fn load(api: Arc<A>) -> Result<Self> {
        let (snippets, tags, folders) = futures::try_join!(
            api.snippets(SnippetFilter::default().query(None)),
            api.tags(),
            api.folders()
        )?;

        Ok(Self {
            api,
            state: AsyncMutex::new(BrowserState {
                snippets,
                tags,
                folders,
                ..BrowserState::default()
            }),
            latest: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> BrowserState {
        self.state.lock().await.clone()
    }

    /// Show the snippets filed directly under `folder` (or all snippets if `None`).
    ///
    /// Returns true iff the resulting response was applied.
    pub async fn select_folder(&self, folder: Option<i64>) -> bool {
        self.state.lock().await.folder = folder;

        self.reload().await
    }

    /// Apply a tag picker selection, which may name either a tag or a language.
    ///
    /// Returns true iff the resulting response was applied.
    pub async fn select(&self, selection: Option<&str>) -> bool {
        self.state.lock().await.filter = SnippetFilter::from_selection(selection);

        self.reload().await
    }

    /// Fetch snippets for the current folder and filter.
    ///
    /// Returns true iff the response was applied, i.e. no later reload was issued while this one was in flight.
    pub async fn reload(&self) -> bool {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let query = {
            let mut state = self.state.lock().await;

            state.loading = true;

            state.filter.query(state.folder)
        };

        let result = self.api.snippets(query).await;

        let mut state = self.state.lock().await;

        if ticket != self.latest.load(Ordering::SeqCst) {
            return false;
        }

        state.loading = false;

        match result {
            Ok(snippets) => {
                state.snippets = snippets;
                state.error = None;
            }

            Err(e) => {
                warn!("error loading snippets: {e:?}");

                state.error = Some(e.to_string());
            }
        }

        true
    }

    /// Reload the tag list, e.g. after tags were created or deleted elsewhere.
    pub async fn reload_tags(&self) -> Result<()> {
        let tags = self.api.tags().await?;

        self.state.lock().await.tags = tags;

        Ok(())
    }

    /// Options for the combined tag/language picker: pickable tag names, then language labels.
    pub async fn tag_options(&self) -> Vec<String> {
        let state = self.state.lock().await;

        filter::pickable(&state.tags)
            .map(|tag| tag.name.clone())
            .chain(Language::ALL.iter().map(|language| language.label().to_owned()))
            .collect()
    }

    /// Chapters of the specified year, each with its exercises, for the folder picker.
    pub async fn folder_tree(&self, year: YearLevel) -> Vec<(Folder, Vec<Folder>)> {
        let state = self.state.lock().await;

        hierarchy::tree(&state.folders, year)
            .into_iter()
            .map(|node| {
                (
                    node.chapter.clone(),
                    node.exercises.into_iter().cloned().collect(),
                )
            })
            .collect()
    }
}
