//! Cue Table
//!
//! Closed set of voice lines and animations that quest options may play.
//! Built once at load time; quest definitions resolve their cue keys against
//! it and fail to load when a key is unknown.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Voice,
    Animation,
}

impl CueKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "voice" | "voiceline" => Some(CueKind::Voice),
            "animation" | "anim" => Some(CueKind::Animation),
            _ => None,
        }
    }
}

/// A resolved cue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub id: String,
    pub kind: CueKind,
    /// Clip name handed to the host player
    pub clip: String,
}

/// Cue file: `[[cue]]` entries
#[derive(Debug, Clone, Deserialize)]
pub struct RawCueFile {
    #[serde(default)]
    pub cue: Vec<RawCue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCue {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Defaults to the cue id
    pub clip: Option<String>,
}

fn default_kind() -> String {
    "voice".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct CueTable {
    cues: HashMap<String, Cue>,
}

impl CueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<data_dir>/cues/*.toml` file
    pub fn load_from_directory(&mut self, data_dir: &Path) -> Result<usize, String> {
        let cues_dir = data_dir.join("cues");

        if !cues_dir.exists() {
            warn!("Cue directory does not exist: {:?}", cues_dir);
            return Ok(0);
        }

        let entries = std::fs::read_dir(&cues_dir)
            .map_err(|e| format!("Failed to read directory {:?}: {}", cues_dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
            let path = entry.path();

            if path.extension().map_or(false, |ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
                let raw: RawCueFile = toml::from_str(&content)
                    .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;
                self.extend_raw(&raw.cue)
                    .map_err(|e| format!("{:?}: {}", path, e))?;
            }
        }

        info!("Loaded {} cues", self.cues.len());
        Ok(self.cues.len())
    }

    pub fn extend_raw(&mut self, raw: &[RawCue]) -> Result<(), String> {
        for cue in raw {
            let kind = CueKind::from_str(&cue.kind)
                .ok_or_else(|| format!("Cue '{}' has unknown kind '{}'", cue.id, cue.kind))?;
            if self.cues.contains_key(&cue.id) {
                warn!("Duplicate cue '{}', overwriting", cue.id);
            }
            self.insert(Cue {
                id: cue.id.clone(),
                kind,
                clip: cue.clip.clone().unwrap_or_else(|| cue.id.clone()),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, cue: Cue) {
        self.cues.insert(cue.id.clone(), cue);
    }

    pub fn get(&self, key: &str) -> Option<&Cue> {
        self.cues.get(key)
    }

    /// Resolve a cue key, failing on unknown keys
    pub fn resolve(&self, key: &str) -> Result<Cue, String> {
        self.cues
            .get(key)
            .cloned()
            .ok_or_else(|| format!("Unknown cue '{}'", key))
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}
