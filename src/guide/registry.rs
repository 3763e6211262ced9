//! Guide Registry
//!
//! Holds every loaded guide definition and the runtime copy of the one guide
//! that is currently active. Completion state lives only in the runtime copy,
//! so switching or restarting a guide never touches the definitions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::definition::{GuideDef, RawGuideFile};
use super::exam::{ExamStepTracker, ExamSummary};

/// Runtime completion flag for one guide step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuideStep {
    pub id: String,
    pub completed: bool,
}

/// What a completion call did to the current guide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideChange {
    /// Unknown step, no active guide, or step already complete
    Ignored,
    /// Step marked complete, guide still has open steps
    Completed,
    /// Step marked complete and it was the last open step
    Finished,
}

/// Runtime copy of the current guide
#[derive(Debug)]
struct ActiveGuide {
    def: Arc<GuideDef>,
    steps: Vec<GuideStep>,
    cursor: Option<usize>,
    finished: bool,
}

impl ActiveGuide {
    fn new(def: Arc<GuideDef>) -> Self {
        let steps = def
            .steps
            .iter()
            .map(|s| GuideStep { id: s.id.clone(), completed: false })
            .collect();
        Self { def, steps, cursor: None, finished: false }
    }

    fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    fn next_open_after(&self, index: usize) -> Option<usize> {
        (index + 1..self.steps.len()).find(|&i| !self.steps[i].completed)
    }

    fn first_open(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.completed)
    }
}

fn activate_index(guide: &mut ActiveGuide, exam: &mut ExamStepTracker, index: usize) {
    let step = &mut guide.steps[index];
    step.completed = false;
    guide.cursor = Some(index);
    guide.finished = false;
    exam.on_step_started(&step.id, Utc::now());
    debug!("Guide '{}' activated step {}: {}", guide.def.id, index + 1, step.id);
}

/// Registry for guide definitions plus the single current guide
#[derive(Debug, Default)]
pub struct GuideRegistry {
    definitions: HashMap<String, Arc<GuideDef>>,
    current: Option<ActiveGuide>,
    exam: ExamStepTracker,
}

impl GuideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all guide definitions from `<data_dir>/guides`
    pub fn load_from_directory(&mut self, data_dir: &Path) -> Result<usize, String> {
        let guides_dir = data_dir.join("guides");

        if !guides_dir.exists() {
            warn!("Guide directory does not exist: {:?}", guides_dir);
            return Ok(0);
        }

        let entries = std::fs::read_dir(&guides_dir)
            .map_err(|e| format!("Failed to read directory {:?}: {}", guides_dir, e))?;

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
            let path = entry.path();

            if path.extension().map_or(false, |ext| ext == "toml") {
                match load_guide_file(&path) {
                    Ok(guide) => {
                        self.insert(guide);
                        count += 1;
                    }
                    Err(e) => warn!("Failed to load guide {:?}: {}", path, e),
                }
            }
        }

        info!("Loaded {} guide definitions", count);
        Ok(count)
    }

    /// Add or replace a guide definition. The current runtime copy is kept.
    pub fn insert(&mut self, guide: GuideDef) {
        if self.definitions.contains_key(&guide.id) {
            debug!("Replacing guide definition '{}'", guide.id);
        }
        self.insert_shared(Arc::new(guide));
    }

    pub fn insert_shared(&mut self, guide: Arc<GuideDef>) {
        self.definitions.insert(guide.id.clone(), guide);
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<GuideDef>> {
        self.definitions.values()
    }

    pub fn get(&self, guide_id: &str) -> Option<Arc<GuideDef>> {
        self.definitions.get(guide_id).cloned()
    }

    pub fn contains(&self, guide_id: &str) -> bool {
        self.definitions.contains_key(guide_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.definitions.keys()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    // ------------------------------------------------------------------
    // Current guide
    // ------------------------------------------------------------------

    /// Switch to a guide by id with a fresh runtime copy, cursor on step 0
    pub fn set_current_guide(&mut self, guide_id: &str) -> bool {
        let Some(def) = self.definitions.get(guide_id).cloned() else {
            warn!("Guide '{}' not found", guide_id);
            return false;
        };

        let mut guide = ActiveGuide::new(def);
        if !guide.steps.is_empty() {
            activate_index(&mut guide, &mut self.exam, 0);
        }
        self.current = Some(guide);

        info!("Switched to guide: {}", guide_id);
        true
    }

    pub fn clear_current_guide(&mut self) {
        if let Some(guide) = self.current.take() {
            debug!("Unloaded guide '{}'", guide.def.id);
        }
    }

    pub fn current_guide_id(&self) -> Option<&str> {
        self.current.as_ref().map(|g| g.def.id.as_str())
    }

    pub fn current_def(&self) -> Option<&Arc<GuideDef>> {
        self.current.as_ref().map(|g| &g.def)
    }

    /// Runtime steps of the current guide (empty when none is loaded)
    pub fn steps(&self) -> &[GuideStep] {
        match self.current.as_ref() {
            Some(g) => &g.steps,
            None => &[],
        }
    }

    pub fn current_step(&self) -> Option<&GuideStep> {
        let guide = self.current.as_ref()?;
        guide.cursor.map(|i| &guide.steps[i])
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.current.as_ref().and_then(|g| g.cursor)
    }

    pub fn is_finished(&self) -> bool {
        self.current.as_ref().map_or(false, |g| g.finished)
    }

    pub fn completed_count(&self) -> usize {
        self.steps().iter().filter(|s| s.completed).count()
    }

    /// Mark a step of the current guide as complete
    pub fn complete_step(&mut self, step_id: &str) -> GuideChange {
        let Some(guide) = self.current.as_mut() else {
            warn!("No active guide, cannot complete step '{}'", step_id);
            return GuideChange::Ignored;
        };

        let Some(index) = guide.index_of(step_id) else {
            warn!("Step '{}' not found in guide '{}'", step_id, guide.def.id);
            return GuideChange::Ignored;
        };

        if guide.steps[index].completed {
            return GuideChange::Ignored;
        }

        if let Some(ref prev) = guide.def.steps[index].previous {
            let prev_done = guide
                .index_of(prev)
                .map_or(true, |i| guide.steps[i].completed);
            if !prev_done {
                self.exam.record_error(step_id, "out_of_order");
            }
        }

        guide.steps[index].completed = true;
        self.exam.on_step_completed(step_id, Utc::now());
        info!("Guide step completed: {}", step_id);

        if guide.cursor == Some(index) {
            let next = guide.next_open_after(index).or_else(|| guide.first_open());
            match next {
                Some(n) => activate_index(guide, &mut self.exam, n),
                None => guide.cursor = None,
            }
        }

        if guide.steps.iter().all(|s| s.completed) && !guide.finished {
            guide.finished = true;
            guide.cursor = None;
            info!("All steps of guide '{}' completed", guide.def.id);
            return GuideChange::Finished;
        }

        GuideChange::Completed
    }

    /// Clear a step's completion and move the cursor onto it
    pub fn activate_step(&mut self, step_id: &str) -> bool {
        let Some(guide) = self.current.as_mut() else {
            warn!("No active guide, cannot activate step '{}'", step_id);
            return false;
        };

        let Some(index) = guide.index_of(step_id) else {
            warn!("Step '{}' not found in guide '{}'", step_id, guide.def.id);
            return false;
        };

        activate_index(guide, &mut self.exam, index);
        true
    }

    /// Clear a step's completion so it can be retried; the cursor stays put
    pub fn reactivate_step(&mut self, step_id: &str) -> bool {
        let Some(guide) = self.current.as_mut() else {
            warn!("No active guide, cannot reactivate step '{}'", step_id);
            return false;
        };

        let Some(index) = guide.index_of(step_id) else {
            warn!("Step '{}' not found in guide '{}'", step_id, guide.def.id);
            return false;
        };

        guide.steps[index].completed = false;
        guide.finished = false;
        if guide.cursor.is_none() {
            guide.cursor = Some(index);
        }
        debug!("Reactivated guide step '{}'", step_id);
        true
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.current
            .as_ref()
            .and_then(|g| g.steps.iter().find(|s| s.id == step_id))
            .map_or(false, |s| s.completed)
    }

    /// Move the cursor back one step
    pub fn rollback_step(&mut self) -> bool {
        let Some(guide) = self.current.as_mut() else {
            warn!("No active guide to roll back");
            return false;
        };

        let target = match guide.cursor {
            Some(0) => {
                warn!("Already at first step of guide '{}'", guide.def.id);
                return false;
            }
            Some(cursor) => {
                guide.steps[cursor].completed = false;
                self.exam.on_rollback(&guide.steps[cursor].id);
                cursor - 1
            }
            None if !guide.steps.is_empty() => guide.steps.len() - 1,
            None => return false,
        };

        activate_index(guide, &mut self.exam, target);
        info!("Rolled back to step: {}", guide.steps[target].id);
        true
    }

    /// Recreate the runtime copy of the current guide
    pub fn restart_guide(&mut self) -> bool {
        let Some(def) = self.current.as_ref().map(|g| Arc::clone(&g.def)) else {
            warn!("No guide selected to restart");
            return false;
        };

        let mut guide = ActiveGuide::new(def);
        if !guide.steps.is_empty() {
            activate_index(&mut guide, &mut self.exam, 0);
        }
        info!("Restarted guide: {}", guide.def.id);
        self.current = Some(guide);
        true
    }

    /// Debug line such as `specific_heat / Step 2: power_on`
    pub fn status_line(&self) -> String {
        match self.current.as_ref() {
            None => "No active guide".to_string(),
            Some(g) if g.finished => format!("{} (finished)", g.def.id),
            Some(g) => match g.cursor {
                Some(i) => format!("{} / Step {}: {}", g.def.id, i + 1, g.steps[i].id),
                None => format!("{} (idle)", g.def.id),
            },
        }
    }

    // ------------------------------------------------------------------
    // Exam mode
    // ------------------------------------------------------------------

    pub fn exam(&self) -> &ExamStepTracker {
        &self.exam
    }

    pub fn exam_mut(&mut self) -> &mut ExamStepTracker {
        &mut self.exam
    }

    pub fn exam_summary(&self) -> ExamSummary {
        self.exam.summary(self.steps())
    }
}

fn load_guide_file(path: &Path) -> Result<GuideDef, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

    let raw: RawGuideFile = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;

    GuideDef::from_raw(&raw.guide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with(id: &str, steps: &[&str]) -> GuideRegistry {
        let mut registry = GuideRegistry::new();
        registry.insert(GuideDef::from_ids(id, steps));
        assert!(registry.set_current_guide(id));
        registry
    }

    #[test]
    fn test_complete_steps_in_order() {
        let mut registry = registry_with("g", &["A", "B"]);

        assert_eq!(registry.complete_step("A"), GuideChange::Completed);
        assert!(registry.is_step_completed("A"));
        assert!(!registry.is_step_completed("B"));
        assert_eq!(registry.current_step().map(|s| s.id.as_str()), Some("B"));

        assert_eq!(registry.complete_step("B"), GuideChange::Finished);
        assert!(registry.is_step_completed("A"));
        assert!(registry.is_step_completed("B"));
        assert!(registry.is_finished());
    }

    #[test]
    fn test_unknown_step_is_a_no_op() {
        let mut registry = registry_with("g", &["A", "B"]);
        registry.complete_step("A");

        assert_eq!(registry.complete_step("unknown_id"), GuideChange::Ignored);
        assert!(registry.is_step_completed("A"));
        assert!(!registry.is_step_completed("B"));
        assert!(!registry.is_step_completed("unknown_id"));
    }

    #[test]
    fn test_no_current_guide() {
        let mut registry = GuideRegistry::new();
        assert_eq!(registry.complete_step("A"), GuideChange::Ignored);
        assert!(!registry.activate_step("A"));
        assert!(!registry.is_step_completed("A"));
        assert_eq!(registry.status_line(), "No active guide");
    }

    #[test]
    fn test_activate_clears_completion() {
        let mut registry = registry_with("g", &["A", "B", "C"]);
        registry.complete_step("A");
        registry.complete_step("B");

        assert!(registry.activate_step("A"));
        assert!(!registry.is_step_completed("A"));
        assert_eq!(registry.current_step_index(), Some(0));

        assert!(registry.reactivate_step("B"));
        assert!(!registry.is_step_completed("B"));
        assert_eq!(registry.current_step_index(), Some(0));
    }

    #[test]
    fn test_out_of_order_completion() {
        let mut registry = registry_with("g", &["A", "B", "C"]);

        assert_eq!(registry.complete_step("C"), GuideChange::Completed);
        assert_eq!(registry.current_step_index(), Some(0));
        assert_eq!(registry.complete_step("A"), GuideChange::Completed);
        assert_eq!(registry.current_step().map(|s| s.id.as_str()), Some("B"));
        assert_eq!(registry.complete_step("B"), GuideChange::Finished);
        assert_eq!(registry.complete_step("B"), GuideChange::Ignored);
    }

    #[test]
    fn test_rollback_and_restart() {
        let mut registry = registry_with("g", &["A", "B"]);
        assert!(!registry.rollback_step());

        registry.complete_step("A");
        assert!(registry.rollback_step());
        assert_eq!(registry.current_step_index(), Some(0));
        assert!(!registry.is_step_completed("A"));

        registry.complete_step("A");
        registry.complete_step("B");
        assert!(registry.restart_guide());
        assert_eq!(registry.completed_count(), 0);
        assert_eq!(registry.status_line(), "g / Step 1: A");
    }

    #[test]
    fn test_exam_records_out_of_order() {
        let mut registry = GuideRegistry::new();
        let raw: RawGuideFile = toml::from_str(
            r#"
[guide]
id = "exam"

[[guide.steps]]
id = "first"

[[guide.steps]]
id = "second"
previous = "first"
"#,
        )
        .unwrap();
        registry.insert(GuideDef::from_raw(&raw.guide).unwrap());
        registry.exam_mut().enable();
        registry.set_current_guide("exam");

        registry.complete_step("second");
        registry.complete_step("first");

        let summary = registry.exam_summary();
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.completed_steps, 2);
    }

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        let guide_dir = temp_dir.path().join("guides");
        std::fs::create_dir_all(&guide_dir).unwrap();
        std::fs::write(
            guide_dir.join("heat.toml"),
            r#"
[guide]
id = "heat"

[[guide.steps]]
id = "fill"
"#,
        )
        .unwrap();
        std::fs::write(guide_dir.join("broken.toml"), "[guide]\n").unwrap();

        let mut registry = GuideRegistry::new();
        let count = registry.load_from_directory(temp_dir.path()).unwrap();
        assert_eq!(count, 1);
        assert!(registry.contains("heat"));
    }
}
