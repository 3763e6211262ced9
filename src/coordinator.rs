//! Step-Tracking Coordinator
//!
//! Owns the guide registry, the experiment hub, every quest controller, the
//! completion ledger and the reward hooks. Collaborators get it passed in
//! explicitly; nothing here is global.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::experiment::ExperimentHub;
use crate::experiment::controller::DEFAULT_EVENT_CAPACITY;
use crate::guide::{GuideChange, GuideRegistry, GuideStep};
use crate::quest::registry::quest_experiments;
use crate::quest::{
    Content, QuestAdvance, QuestController, QuestDef, QuestEvent, QuestNotice, QuestPermissions,
    QuestProgressRecord, QuestState, QuestSummary, RewardHooks, StepContext, SubjectCatalogue,
};

pub const DEFAULT_REWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Split borrow of the collaborators a quest step may touch
macro_rules! step_ctx {
    ($self:ident) => {
        StepContext {
            guides: &$self.guides,
            experiments: &mut $self.experiments,
            catalogue: &$self.catalogue,
            rng: &mut $self.rng,
            notices: &mut $self.notices,
        }
    };
}

pub struct Coordinator {
    guides: GuideRegistry,
    experiments: ExperimentHub,
    quests: BTreeMap<String, QuestController>,
    permissions: QuestPermissions,
    catalogue: SubjectCatalogue,
    hooks: Arc<dyn RewardHooks>,
    rng: StdRng,
    notices: Vec<QuestNotice>,
    reward_timeout: Duration,
}

impl Coordinator {
    pub fn new(hooks: Arc<dyn RewardHooks>) -> Self {
        Self::with_settings(hooks, DEFAULT_EVENT_CAPACITY, DEFAULT_REWARD_TIMEOUT)
    }

    pub fn with_settings(
        hooks: Arc<dyn RewardHooks>,
        event_capacity: usize,
        reward_timeout: Duration,
    ) -> Self {
        Self {
            guides: GuideRegistry::new(),
            experiments: ExperimentHub::new(event_capacity),
            quests: BTreeMap::new(),
            permissions: QuestPermissions::new(),
            catalogue: SubjectCatalogue::new(),
            hooks,
            rng: StdRng::from_entropy(),
            notices: Vec::new(),
            reward_timeout,
        }
    }

    /// Replace the random source (deterministic reading assignments in tests)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Install a content snapshot. Quests in progress keep their running
    /// definition until they are restarted.
    pub fn install(&mut self, content: &Content) {
        for guide in &content.guides {
            self.guides.insert_shared(Arc::clone(guide));
        }
        for name in content.experiment_names() {
            self.experiments.register(&name);
        }
        self.catalogue = content.subjects.clone();

        for quest in content.quests.values() {
            if self
                .quests
                .get(&quest.id)
                .map_or(false, |q| q.state() == QuestState::InProgress)
            {
                warn!("Quest '{}' is in progress, keeping the running definition", quest.id);
                continue;
            }
            self.insert_quest(Arc::clone(quest));
        }

        info!(
            "Installed {} guides and {} quests",
            content.guides.len(),
            content.quests.len()
        );
    }

    pub fn add_quest(&mut self, quest: QuestDef) {
        self.insert_quest(Arc::new(quest));
    }

    fn insert_quest(&mut self, def: Arc<QuestDef>) {
        for name in quest_experiments(&def) {
            self.experiments.register(&name);
        }

        let locked = !self.permissions.has_all(&def.requires);
        let mut controller = QuestController::new(Arc::clone(&def), locked);
        if self.permissions.has_completed(&def.id) {
            controller.restore_complete();
        }
        self.quests.insert(def.id.clone(), controller);
    }

    pub fn set_catalogue(&mut self, catalogue: SubjectCatalogue) {
        self.catalogue = catalogue;
    }

    /// Seed the ledger with quests completed in earlier sessions
    pub fn restore_completed<I, S>(&mut self, quest_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in quest_ids {
            let id = id.as_ref();
            self.permissions.mark_completed(id);
            if let Some(quest) = self.quests.get_mut(id) {
                quest.restore_complete();
            }
        }
        self.refresh_locks();
    }

    // ========================================================================
    // Quests
    // ========================================================================

    pub fn quest(&self, quest_id: &str) -> Option<&QuestController> {
        self.quests.get(quest_id)
    }

    pub fn quest_state(&self, quest_id: &str) -> Option<QuestState> {
        self.quests.get(quest_id).map(|q| q.state())
    }

    pub fn quest_ids(&self) -> impl Iterator<Item = &String> {
        self.quests.keys()
    }

    pub fn permissions(&self) -> &QuestPermissions {
        &self.permissions
    }

    /// NotStarted → InProgress. Loads the quest's guide first when asked to.
    pub async fn start_quest(&mut self, quest_id: &str) -> bool {
        let Some(quest) = self.quests.get(quest_id) else {
            warn!("Quest '{}' not found", quest_id);
            return false;
        };

        let def = Arc::clone(quest.def());
        if quest.state() == QuestState::NotStarted && !self.load_quest_guide(&def) {
            return false;
        }

        let Some(quest) = self.quests.get_mut(quest_id) else {
            return false;
        };
        let advance = quest.start(&mut step_ctx!(self));
        self.settle(quest_id, advance).await
    }

    /// Make the quest's guide current when it asks for auto-loading.
    /// False when that guide does not exist.
    fn load_quest_guide(&mut self, def: &QuestDef) -> bool {
        if !def.auto_load_guide {
            return true;
        }
        let Some(guide_id) = &def.guide else {
            return true;
        };
        if self.guides.current_guide_id() == Some(guide_id.as_str())
            || self.guides.set_current_guide(guide_id)
        {
            return true;
        }
        error!("Guide '{}' for quest '{}' is missing", guide_id, def.id);
        false
    }

    pub async fn complete_current_step(&mut self, quest_id: &str) -> bool {
        let Some(quest) = self.quests.get_mut(quest_id) else {
            warn!("Quest '{}' not found", quest_id);
            return false;
        };
        let advance = quest.complete_current_step(&mut step_ctx!(self));
        self.settle(quest_id, advance).await
    }

    pub fn restart_quest(&mut self, quest_id: &str) -> bool {
        let Some(quest) = self.quests.get_mut(quest_id) else {
            warn!("Quest '{}' not found", quest_id);
            return false;
        };
        quest.restart(&mut self.experiments, &mut self.notices)
    }

    /// Deliver an event. Ticketed events go to their quest; the rest go to
    /// every quest in progress. Returns true if any quest accepted it.
    pub async fn dispatch(&mut self, event: QuestEvent) -> bool {
        debug!("Dispatching {}", event.event_type());

        let targets: Vec<String> = match event.ticket() {
            Some(ticket) => vec![ticket.quest_id.clone()],
            None => self.in_progress_ids(),
        };

        let mut accepted = false;
        let mut ready = Vec::new();
        for id in targets {
            let Some(quest) = self.quests.get_mut(&id) else {
                warn!("Quest '{}' not found for {}", id, event.event_type());
                continue;
            };
            match quest.handle(&event, &mut step_ctx!(self)) {
                QuestAdvance::Ignored => {}
                QuestAdvance::Pending => accepted = true,
                QuestAdvance::ReadyToFinish => {
                    accepted = true;
                    ready.push(id);
                }
            }
        }

        for id in ready {
            self.finish(&id).await;
        }
        accepted
    }

    /// One tracking tick: poll experiments, then let every active step drain
    /// its events. Returns the number of experiment events raised.
    pub async fn tick(&mut self) -> usize {
        let raised = self.experiments.poll_all(&self.guides);

        let mut ready = Vec::new();
        for id in self.in_progress_ids() {
            let Some(quest) = self.quests.get_mut(&id) else {
                continue;
            };
            if quest.pump(&mut step_ctx!(self)) == QuestAdvance::ReadyToFinish {
                ready.push(id);
            }
        }

        for id in ready {
            self.finish(&id).await;
        }
        raised
    }

    fn in_progress_ids(&self) -> Vec<String> {
        self.quests
            .iter()
            .filter(|(_, q)| q.state() == QuestState::InProgress)
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn settle(&mut self, quest_id: &str, advance: QuestAdvance) -> bool {
        match advance {
            QuestAdvance::Ignored => false,
            QuestAdvance::Pending => true,
            QuestAdvance::ReadyToFinish => {
                self.finish(quest_id).await;
                true
            }
        }
    }

    /// Reward sequence after the last step: stop the experiment, before-reward,
    /// Complete, grant (bounded), ledger + unlocks, after-reward.
    async fn finish(&mut self, quest_id: &str) {
        let Some(quest) = self.quests.get(quest_id) else {
            return;
        };
        if !quest.is_finishing() {
            return;
        }
        let def = Arc::clone(quest.def());

        // The last step already released its tracked ids
        if let Some(name) = &def.experiment {
            if let Some(controller) = self.experiments.get_mut(name) {
                if controller.is_running() {
                    controller.stop();
                }
            }
        }

        let summary = QuestSummary {
            quest_id: def.id.clone(),
            name: def.name.clone(),
            steps: def.steps.len(),
            reward: def.reward.clone(),
            completed_at: Utc::now(),
        };
        let hooks = Arc::clone(&self.hooks);
        hooks.before_reward(&summary).await;

        let marked = self.quests.get_mut(quest_id).map_or(false, |q| q.mark_complete());
        if !marked {
            return;
        }

        let granted = match tokio::time::timeout(self.reward_timeout, hooks.grant_reward(&summary)).await
        {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.reward_timeout)),
        };

        if let Err(reason) = granted {
            error!("Reward for quest '{}' failed: {}", quest_id, reason);
            self.notices.push(QuestNotice::RewardFailed {
                quest_id: quest_id.to_string(),
                reason,
            });
            if let Some(quest) = self.quests.get_mut(quest_id) {
                quest.restart(&mut self.experiments, &mut self.notices);
            }
            return;
        }

        self.permissions.mark_completed(quest_id);
        hooks.after_reward(&summary).await;

        info!("Quest '{}' rewarded with {} points", quest_id, summary.reward.points);
        self.notices.push(QuestNotice::QuestCompleted { summary });
        self.refresh_locks();
    }

    fn refresh_locks(&mut self) {
        for quest in self.quests.values_mut() {
            if quest.state() == QuestState::Locked
                && self.permissions.has_all(&quest.def().requires)
                && quest.unlock()
            {
                self.notices.push(QuestNotice::QuestUnlocked { quest_id: quest.id().to_string() });
            }
        }
    }

    // ========================================================================
    // Guides
    // ========================================================================

    pub fn guides(&self) -> &GuideRegistry {
        &self.guides
    }

    pub fn guides_mut(&mut self) -> &mut GuideRegistry {
        &mut self.guides
    }

    pub fn set_current_guide(&mut self, guide_id: &str) -> bool {
        self.guides.set_current_guide(guide_id)
    }

    /// Complete a guide step and let quests react at once. Finishing the
    /// guide starts its experiment.
    pub async fn complete_guide_step(&mut self, step_id: &str) -> GuideChange {
        let change = self.guides.complete_step(step_id);

        if change == GuideChange::Finished {
            if let Some(def) = self.guides.current_def().cloned() {
                self.notices.push(QuestNotice::GuideFinished { guide_id: def.id.clone() });
                if let Some(name) = &def.experiment {
                    match self.experiments.get_mut(name) {
                        Some(controller) if !controller.is_running() => controller.start(),
                        Some(_) => {}
                        None => error!("Guide '{}' finished but experiment '{}' is missing", def.id, name),
                    }
                }
            }
        }

        if change != GuideChange::Ignored {
            self.tick().await;
        }
        change
    }

    pub fn activate_guide_step(&mut self, step_id: &str) -> bool {
        self.guides.activate_step(step_id)
    }

    pub fn reactivate_guide_step(&mut self, step_id: &str) -> bool {
        self.guides.reactivate_step(step_id)
    }

    pub fn is_guide_step_completed(&self, step_id: &str) -> bool {
        self.guides.is_step_completed(step_id)
    }

    pub fn rollback_guide_step(&mut self) -> bool {
        self.guides.rollback_step()
    }

    /// Fresh copy of the current guide; its experiment is stopped
    pub fn restart_guide(&mut self) -> bool {
        if !self.guides.restart_guide() {
            return false;
        }
        let experiment = self.guides.current_def().and_then(|d| d.experiment.clone());
        if let Some(name) = experiment {
            if let Some(controller) = self.experiments.get_mut(&name) {
                if controller.is_running() {
                    controller.stop();
                }
            }
        }
        true
    }

    // ========================================================================
    // Experiments
    // ========================================================================

    pub fn experiments(&self) -> &ExperimentHub {
        &self.experiments
    }

    pub fn experiments_mut(&mut self) -> &mut ExperimentHub {
        &mut self.experiments
    }

    pub fn register_experiment(&mut self, name: &str) {
        self.experiments.register(name);
    }

    pub fn start_experiment(&mut self, name: &str) -> bool {
        self.experiments.get_mut(name).map(|c| c.start()).is_some()
    }

    pub fn stop_experiment(&mut self, name: &str) -> bool {
        self.experiments.get_mut(name).map(|c| c.stop()).is_some()
    }

    pub fn notify_experiment_completed(&mut self, name: &str) -> bool {
        self.experiments.get_mut(name).map(|c| c.notify_completed()).is_some()
    }

    pub fn report_condition(&mut self, name: &str, step_id: &str, completed: bool) -> bool {
        self.experiments
            .get_mut(name)
            .map_or(false, |c| c.report_condition(step_id, completed))
    }

    pub fn start_tracking(&mut self, name: &str, step_ids: &[String]) -> bool {
        self.experiments.get_mut(name).map(|c| c.start_tracking(step_ids)).is_some()
    }

    pub fn stop_all_tracking(&mut self, name: &str) -> bool {
        self.experiments.get_mut(name).map(|c| c.stop_all_tracking()).is_some()
    }

    // ========================================================================
    // Host output and persistence
    // ========================================================================

    pub fn drain_notices(&mut self) -> Vec<QuestNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn pending_notices(&self) -> &[QuestNotice] {
        &self.notices
    }

    /// Progress of every quest that is neither locked nor untouched. A quest
    /// restarted back to `NotStarted` is included so its stored row is
    /// overwritten.
    pub fn progress_records(&self) -> Vec<QuestProgressRecord> {
        self.quests
            .values()
            .filter(|q| match q.state() {
                QuestState::InProgress | QuestState::Complete => true,
                QuestState::NotStarted => q.generation() > 0,
                QuestState::Locked => false,
            })
            .map(|q| q.progress_record())
            .collect()
    }

    /// Re-apply stored progress: completed quests enter the ledger, quests in
    /// progress resume at their stored step.
    pub async fn apply_progress(&mut self, records: &[QuestProgressRecord]) {
        // Completions first so that dependants are unlocked before resuming
        self.restore_completed(
            records
                .iter()
                .filter(|r| r.state == QuestState::Complete)
                .map(|r| r.quest_id.as_str()),
        );

        for record in records {
            match record.state {
                QuestState::InProgress => {
                    let Some(def) = self.quests.get(&record.quest_id).map(|q| Arc::clone(q.def()))
                    else {
                        warn!("Stored progress for unknown quest '{}'", record.quest_id);
                        continue;
                    };
                    if !self.load_quest_guide(&def) {
                        error!("Not resuming quest '{}' without its guide", record.quest_id);
                        continue;
                    }
                    let Some(quest) = self.quests.get_mut(&record.quest_id) else {
                        continue;
                    };
                    let advance = quest.resume_at(record.current_step, &mut step_ctx!(self));
                    let id = record.quest_id.clone();
                    self.settle(&id, advance).await;
                }
                QuestState::Locked | QuestState::NotStarted | QuestState::Complete => {}
            }
        }
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            guide: GuideSnapshot {
                id: self.guides.current_guide_id().map(str::to_string),
                status: self.guides.status_line(),
                finished: self.guides.is_finished(),
                steps: self.guides.steps().to_vec(),
            },
            quests: self
                .quests
                .values()
                .map(|q| QuestSnapshot {
                    id: q.id().to_string(),
                    name: q.def().name.clone(),
                    state: q.state(),
                    current_step: q.current_step_index(),
                    current_step_id: q.current_step().map(|s| s.id().to_string()),
                    generation: q.generation(),
                    steps: q
                        .steps()
                        .iter()
                        .map(|s| StepSnapshot {
                            id: s.id().to_string(),
                            kind: s.def().kind.name(),
                            complete: s.is_complete(),
                            active: s.is_active(),
                        })
                        .collect(),
                })
                .collect(),
            experiments: self
                .experiments
                .iter()
                .map(|c| ExperimentSnapshot {
                    name: c.name().to_string(),
                    running: c.is_running(),
                    tracking: c.tracking_info(&self.guides),
                })
                .collect(),
            completed: self.permissions.completed().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub guide: GuideSnapshot,
    pub quests: Vec<QuestSnapshot>,
    pub experiments: Vec<ExperimentSnapshot>,
    pub completed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuideSnapshot {
    pub id: Option<String>,
    pub status: String,
    pub finished: bool,
    pub steps: Vec<GuideStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestSnapshot {
    pub id: String,
    pub name: String,
    pub state: QuestState,
    pub current_step: Option<usize>,
    pub current_step_id: Option<String>,
    pub generation: u64,
    pub steps: Vec<StepSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSnapshot {
    pub id: String,
    pub kind: &'static str,
    pub complete: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSnapshot {
    pub name: String,
    pub running: bool,
    pub tracking: String,
}
