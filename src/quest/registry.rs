//! Content Registry
//!
//! Loads cues, subjects, guides and quests from TOML files, in that order,
//! since quests resolve against the cue table. A load produces an immutable
//! `Content` snapshot that the coordinator installs. Supports hot-reloading
//! during development.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::cue::CueTable;
use super::definition::{QuestDef, RawQuestFile, StepKind};
use super::reading::SubjectCatalogue;
use crate::guide::{GuideDef, GuideRegistry};

/// One consistent load of the content directory
#[derive(Debug, Default)]
pub struct Content {
    pub cues: CueTable,
    pub subjects: SubjectCatalogue,
    pub guides: Vec<Arc<GuideDef>>,
    pub quests: HashMap<String, Arc<QuestDef>>,
}

impl Content {
    /// Every experiment controller named by a guide or a quest step
    pub fn experiment_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.guides.iter().filter_map(|g| g.experiment.clone()).collect();
        for quest in self.quests.values() {
            names.extend(quest_experiments(quest));
        }
        names
    }
}

/// Experiment controllers a quest depends on
pub fn quest_experiments(quest: &QuestDef) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = quest.experiment.iter().cloned().collect();
    for step in &quest.steps {
        if let StepKind::Experiment(def) = &step.kind {
            names.insert(def.experiment.clone());
        }
    }
    names
}

/// Registry for all authored content
pub struct ContentRegistry {
    content: RwLock<Arc<Content>>,
    /// Base directory for content
    data_dir: PathBuf,
}

impl ContentRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            content: RwLock::new(Arc::new(Content::default())),
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load everything and swap the new snapshot in
    pub async fn load_all(&self) -> Result<Arc<Content>, String> {
        info!("Loading content from {:?}", self.data_dir);

        let content = Arc::new(load_content(&self.data_dir)?);
        validate_references(&content);

        info!(
            "Loaded {} cues, {} subjects, {} guides, {} quests",
            content.cues.len(),
            content.subjects.len(),
            content.guides.len(),
            content.quests.len()
        );

        *self.content.write().await = Arc::clone(&content);
        Ok(content)
    }

    pub async fn snapshot(&self) -> Arc<Content> {
        Arc::clone(&*self.content.read().await)
    }

    /// Get a quest by ID
    pub async fn get_quest(&self, quest_id: &str) -> Option<Arc<QuestDef>> {
        self.content.read().await.quests.get(quest_id).cloned()
    }

    /// Get count of loaded quests
    pub async fn quest_count(&self) -> usize {
        self.content.read().await.quests.len()
    }

    /// Start file watcher for hot-reload.
    /// Returns a channel receiver that signals when reloads occur.
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> Result<tokio::sync::mpsc::Receiver<HotReloadEvent>, String> {
        use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(self);
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("File watcher needs a tokio runtime: {}", e))?;
        let data_dir = self.data_dir.clone();

        if !data_dir.exists() {
            return Err(format!("Content directory does not exist: {:?}", data_dir));
        }

        // notify is sync, so the watcher lives on its own thread
        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&data_dir, RecursiveMode::Recursive) {
                error!("Failed to watch content directory: {}", e);
                return;
            }

            info!("Content hot-reload watcher started for {:?}", data_dir);

            while let Ok(event) = notify_rx.recv() {
                use notify::EventKind;
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                let Some(path) = event
                    .paths
                    .iter()
                    .find(|p| p.extension().map_or(false, |ext| ext == "toml"))
                    .cloned()
                else {
                    continue;
                };

                info!("Detected change in {:?}, triggering reload", path);
                let reg = Arc::clone(&registry);
                let tx = tx.clone();
                rt.spawn(async move {
                    match reg.load_all().await {
                        Ok(_) => {
                            info!("Hot-reload completed successfully");
                            let _ = tx
                                .send(HotReloadEvent::Reloaded(path.to_string_lossy().to_string()))
                                .await;
                        }
                        Err(e) => {
                            error!("Hot-reload failed: {}", e);
                            let _ = tx.send(HotReloadEvent::Error(e)).await;
                        }
                    }
                });
            }
        });

        Ok(rx)
    }
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// A file was reloaded successfully
    Reloaded(String),
    /// An error occurred during reload
    Error(String),
}

fn load_content(data_dir: &Path) -> Result<Content, String> {
    let mut cues = CueTable::new();
    cues.load_from_directory(data_dir)?;

    let mut subjects = SubjectCatalogue::new();
    subjects.load_from_directory(data_dir)?;

    let mut guides = GuideRegistry::new();
    guides.load_from_directory(data_dir)?;

    let quests_dir = data_dir.join("quests");
    let mut quests = HashMap::new();
    if quests_dir.exists() {
        let mut paths = Vec::new();
        collect_toml_files(&quests_dir, &mut paths)?;
        paths.sort();

        for path in paths {
            match load_quest_file(&path, &cues) {
                Ok(quest) => {
                    info!("Loaded quest: {} ({})", quest.name, quest.id);
                    if quests.insert(quest.id.clone(), Arc::new(quest)).is_some() {
                        warn!("Quest defined twice, {:?} wins", path);
                    }
                }
                Err(e) => warn!("Failed to load quest {:?}: {}", path, e),
            }
        }
    } else {
        warn!("Quest directory does not exist: {:?}", quests_dir);
    }

    Ok(Content {
        cues,
        subjects,
        guides: guides.definitions().cloned().collect(),
        quests,
    })
}

/// Recursively collect quest files (non-async to avoid boxing)
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("Failed to read directory {:?}: {}", dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
        let path = entry.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().map_or(false, |ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn load_quest_file(path: &Path, cues: &CueTable) -> Result<QuestDef, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

    let raw: RawQuestFile =
        toml::from_str(&content).map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;

    QuestDef::from_raw(&raw.quest, cues)
}

/// Dangling cross references are warnings, not load errors
fn validate_references(content: &Content) {
    for quest in content.quests.values() {
        for required in &quest.requires {
            if !content.quests.contains_key(required) {
                warn!("Quest '{}' requires non-existent quest '{}'", quest.id, required);
            }
        }

        if let Some(ref guide_id) = quest.guide {
            if !content.guides.iter().any(|g| g.id == *guide_id) {
                warn!("Quest '{}' references non-existent guide '{}'", quest.id, guide_id);
            }
        }

        for step in &quest.steps {
            if let StepKind::Reading(def) = &step.kind {
                if let super::definition::ReadingRange::Random { subject: Some(subject), .. } =
                    &def.range
                {
                    if !content.subjects.contains(subject) {
                        warn!(
                            "Quest '{}' step '{}' references non-existent subject '{}'",
                            quest.id, step.id, subject
                        );
                    }
                }
            }
        }
    }
}
