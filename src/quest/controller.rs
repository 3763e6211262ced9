//! Quest Controller
//!
//! State machine for one quest: `Locked → NotStarted → InProgress → Complete`,
//! with `restart` back to `NotStarted`. Steps run strictly one after another.
//! Every step activation bumps the generation so that tickets issued to an
//! earlier activation can be recognised as stale.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::definition::QuestDef;
use super::events::{QuestEvent, QuestNotice};
use super::state::{QuestProgressRecord, QuestState, StepTicket};
use super::step::{QuestStep, StepContext};
use crate::experiment::ExperimentHub;

/// Result of driving a quest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestAdvance {
    /// Wrong state, stale ticket, or nothing to do
    Ignored,
    /// The active step is still waiting
    Pending,
    /// The last step completed; the owner must run the reward sequence
    ReadyToFinish,
}

#[derive(Debug)]
pub struct QuestController {
    def: Arc<QuestDef>,
    state: QuestState,
    steps: Vec<QuestStep>,
    current: usize,
    generation: u64,
    /// Set once the last step completes, until the quest is marked complete
    finishing: bool,
}

impl QuestController {
    pub fn new(def: Arc<QuestDef>, locked: bool) -> Self {
        let steps = def.steps.iter().cloned().map(QuestStep::new).collect();
        Self {
            def,
            state: if locked { QuestState::Locked } else { QuestState::NotStarted },
            steps,
            current: 0,
            generation: 0,
            finishing: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn def(&self) -> &Arc<QuestDef> {
        &self.def
    }

    pub fn state(&self) -> QuestState {
        self.state
    }

    pub fn steps(&self) -> &[QuestStep] {
        &self.steps
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    /// Index of the active step; only meaningful while in progress
    pub fn current_step_index(&self) -> Option<usize> {
        (self.state == QuestState::InProgress).then_some(self.current)
    }

    pub fn current_step(&self) -> Option<&QuestStep> {
        self.current_step_index().and_then(|i| self.steps.get(i))
    }

    pub fn ticket(&self) -> Option<StepTicket> {
        self.current_step_index().map(|step_index| StepTicket {
            quest_id: self.def.id.clone(),
            step_index,
            generation: self.generation,
        })
    }

    pub fn is_ticket_current(&self, ticket: &StepTicket) -> bool {
        self.state == QuestState::InProgress
            && !self.finishing
            && ticket.quest_id == self.def.id
            && ticket.step_index == self.current
            && ticket.generation == self.generation
    }

    /// Locked → NotStarted
    pub fn unlock(&mut self) -> bool {
        if self.state != QuestState::Locked {
            return false;
        }
        self.state = QuestState::NotStarted;
        info!("Quest '{}' unlocked", self.def.id);
        true
    }

    pub fn start(&mut self, ctx: &mut StepContext<'_>) -> QuestAdvance {
        match self.state {
            QuestState::NotStarted => {}
            QuestState::InProgress => {
                debug!("Quest '{}' already in progress, ignoring start", self.def.id);
                return QuestAdvance::Ignored;
            }
            QuestState::Locked => {
                warn!("Quest '{}' is locked", self.def.id);
                return QuestAdvance::Ignored;
            }
            QuestState::Complete => {
                warn!("Quest '{}' is already complete, restart it first", self.def.id);
                return QuestAdvance::Ignored;
            }
        }

        self.state = QuestState::InProgress;
        self.current = 0;
        info!("Quest '{}' started", self.def.id);
        ctx.notices.push(QuestNotice::QuestStarted { quest_id: self.def.id.clone() });
        self.activate_current(ctx)
    }

    /// Resume an unstarted quest at `index`, treating earlier steps as done
    pub fn resume_at(&mut self, index: usize, ctx: &mut StepContext<'_>) -> QuestAdvance {
        if self.state != QuestState::NotStarted || index >= self.steps.len() {
            warn!("Quest '{}' cannot resume at step {}", self.def.id, index);
            return QuestAdvance::Ignored;
        }

        for step in &mut self.steps[..index] {
            step.mark_complete();
        }
        self.state = QuestState::InProgress;
        self.current = index;
        info!("Quest '{}' resumed at step {}", self.def.id, index);
        self.activate_current(ctx)
    }

    /// Force the active step complete
    pub fn complete_current_step(&mut self, ctx: &mut StepContext<'_>) -> QuestAdvance {
        if self.state != QuestState::InProgress || self.finishing {
            debug!("Quest '{}' has no active step to complete", self.def.id);
            return QuestAdvance::Ignored;
        }
        self.settle(true, ctx)
    }

    pub fn handle(&mut self, event: &QuestEvent, ctx: &mut StepContext<'_>) -> QuestAdvance {
        if self.state != QuestState::InProgress || self.finishing {
            return QuestAdvance::Ignored;
        }
        if let Some(ticket) = event.ticket() {
            if !self.is_ticket_current(ticket) {
                debug!(
                    "Quest '{}' ignored stale {} (generation {}, now {})",
                    self.def.id,
                    event.event_type(),
                    ticket.generation,
                    self.generation
                );
                return QuestAdvance::Ignored;
            }
        }

        let done = self.steps[self.current].handle(event, ctx);
        self.settle(done, ctx)
    }

    pub fn pump(&mut self, ctx: &mut StepContext<'_>) -> QuestAdvance {
        if self.state != QuestState::InProgress || self.finishing {
            return QuestAdvance::Ignored;
        }
        let done = self.steps[self.current].pump(ctx);
        self.settle(done, ctx)
    }

    /// Finishing → Complete. Returns false unless the last step just completed.
    pub fn mark_complete(&mut self) -> bool {
        if !self.finishing || self.state != QuestState::InProgress {
            return false;
        }
        self.finishing = false;
        self.state = QuestState::Complete;
        info!("Quest '{}' complete", self.def.id);
        true
    }

    /// Put a quest straight into the complete state (restored from the ledger)
    pub fn restore_complete(&mut self) {
        for step in &mut self.steps {
            step.mark_complete();
        }
        self.finishing = false;
        self.state = QuestState::Complete;
    }

    /// Any unlocked state → NotStarted
    pub fn restart(&mut self, experiments: &mut ExperimentHub, notices: &mut Vec<QuestNotice>) -> bool {
        if self.state == QuestState::Locked {
            warn!("Quest '{}' is locked and cannot restart", self.def.id);
            return false;
        }

        for step in &mut self.steps {
            step.teardown(experiments);
            step.reset();
        }
        self.state = QuestState::NotStarted;
        self.current = 0;
        self.generation += 1;
        self.finishing = false;

        info!("Quest '{}' restarted", self.def.id);
        notices.push(QuestNotice::QuestRestarted { quest_id: self.def.id.clone() });
        true
    }

    pub fn progress_record(&self) -> QuestProgressRecord {
        QuestProgressRecord {
            quest_id: self.def.id.clone(),
            state: self.state,
            current_step: self.current,
            completed_steps: self
                .steps
                .iter()
                .filter(|s| s.is_complete())
                .map(|s| s.id().to_string())
                .collect(),
            updated_at: Utc::now(),
        }
    }

    fn activate_current(&mut self, ctx: &mut StepContext<'_>) -> QuestAdvance {
        if self.current >= self.steps.len() {
            self.finishing = true;
            return QuestAdvance::ReadyToFinish;
        }
        self.generation += 1;
        let ticket = StepTicket {
            quest_id: self.def.id.clone(),
            step_index: self.current,
            generation: self.generation,
        };
        let done = self.steps[self.current].start(ticket, ctx);
        self.settle(done, ctx)
    }

    /// Advance past every step that reports completion, one at a time
    fn settle(&mut self, mut done: bool, ctx: &mut StepContext<'_>) -> QuestAdvance {
        while done {
            let index = self.current;
            let step = &mut self.steps[index];
            step.teardown(ctx.experiments);
            step.mark_complete();
            debug!("Quest '{}' completed step {}: {}", self.def.id, index, step.id());
            ctx.notices.push(QuestNotice::StepCompleted {
                quest_id: self.def.id.clone(),
                step_id: step.id().to_string(),
            });

            if index + 1 >= self.steps.len() {
                self.finishing = true;
                return QuestAdvance::ReadyToFinish;
            }

            self.current += 1;
            self.generation += 1;
            let ticket = StepTicket {
                quest_id: self.def.id.clone(),
                step_index: self.current,
                generation: self.generation,
            };
            done = self.steps[self.current].start(ticket, ctx);
        }
        QuestAdvance::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::GuideRegistry;
    use crate::quest::definition::{StepDef, StepKind, Reward};
    use crate::quest::reading::SubjectCatalogue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Harness {
        guides: GuideRegistry,
        experiments: ExperimentHub,
        catalogue: SubjectCatalogue,
        rng: StdRng,
        notices: Vec<QuestNotice>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                guides: GuideRegistry::new(),
                experiments: ExperimentHub::default(),
                catalogue: SubjectCatalogue::new(),
                rng: StdRng::seed_from_u64(5),
                notices: Vec::new(),
            }
        }

        fn ctx(&mut self) -> StepContext<'_> {
            StepContext {
                guides: &self.guides,
                experiments: &mut self.experiments,
                catalogue: &self.catalogue,
                rng: &mut self.rng,
                notices: &mut self.notices,
            }
        }
    }

    fn quest(triggers: &[&str]) -> Arc<QuestDef> {
        Arc::new(QuestDef {
            id: "q".into(),
            name: "Q".into(),
            description: String::new(),
            requires: vec![],
            guide: None,
            experiment: None,
            auto_load_guide: false,
            reward: Reward::default(),
            steps: triggers
                .iter()
                .map(|t| StepDef {
                    id: t.to_string(),
                    description: String::new(),
                    kind: StepKind::Simple { trigger: Some(t.to_string()) },
                })
                .collect(),
        })
    }

    fn signal(name: &str) -> QuestEvent {
        QuestEvent::Signal { name: name.into() }
    }

    #[test]
    fn test_sequential_progress() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a", "b"]), false);
        assert_eq!(q.current_step_index(), None);

        assert_eq!(q.start(&mut h.ctx()), QuestAdvance::Pending);
        assert_eq!(q.current_step_index(), Some(0));

        // Step b's trigger does nothing while a is active
        assert_eq!(q.handle(&signal("b"), &mut h.ctx()), QuestAdvance::Pending);
        assert_eq!(q.current_step_index(), Some(0));

        q.handle(&signal("a"), &mut h.ctx());
        assert_eq!(q.current_step_index(), Some(1));
        assert_eq!(q.handle(&signal("b"), &mut h.ctx()), QuestAdvance::ReadyToFinish);
        assert_eq!(q.current_step_index(), Some(1));

        assert!(q.mark_complete());
        assert_eq!(q.state(), QuestState::Complete);
        assert_eq!(q.current_step_index(), None);
    }

    #[test]
    fn test_double_start_does_not_restart_step() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a", "b"]), false);

        q.start(&mut h.ctx());
        assert_eq!(q.start(&mut h.ctx()), QuestAdvance::Ignored);
        assert_eq!(q.steps()[0].activations(), 1);
        let started = h
            .notices
            .iter()
            .filter(|n| matches!(n, QuestNotice::StepStarted { .. }))
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn test_completion_happens_once() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a"]), false);
        q.start(&mut h.ctx());

        assert_eq!(q.complete_current_step(&mut h.ctx()), QuestAdvance::ReadyToFinish);
        assert_eq!(q.complete_current_step(&mut h.ctx()), QuestAdvance::Ignored);
        assert_eq!(q.handle(&signal("a"), &mut h.ctx()), QuestAdvance::Ignored);
        assert!(q.mark_complete());
        assert!(!q.mark_complete());
        assert_eq!(q.complete_current_step(&mut h.ctx()), QuestAdvance::Ignored);
    }

    #[test]
    fn test_stale_ticket_ignored() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a", "b"]), false);
        q.start(&mut h.ctx());

        let old = q.ticket().unwrap();
        q.complete_current_step(&mut h.ctx());
        assert!(!q.is_ticket_current(&old));

        let stale = QuestEvent::CueFinished { ticket: old };
        assert_eq!(q.handle(&stale, &mut h.ctx()), QuestAdvance::Ignored);

        let fresh = q.ticket().unwrap();
        assert!(q.is_ticket_current(&fresh));
        assert_eq!(fresh.step_index, 1);
    }

    #[test]
    fn test_restart_and_locked() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a", "b"]), true);
        assert_eq!(q.start(&mut h.ctx()), QuestAdvance::Ignored);
        assert!(!q.restart(&mut h.experiments, &mut h.notices));

        assert!(q.unlock());
        q.start(&mut h.ctx());
        q.complete_current_step(&mut h.ctx());
        let generation = q.generation();

        assert!(q.restart(&mut h.experiments, &mut h.notices));
        assert_eq!(q.state(), QuestState::NotStarted);
        assert!(q.generation() > generation);
        assert!(q.steps().iter().all(|s| !s.is_complete() && !s.is_active()));

        q.start(&mut h.ctx());
        assert_eq!(q.current_step_index(), Some(0));
        assert_eq!(q.steps()[0].activations(), 2);
    }

    #[test]
    fn test_resume_and_record() {
        let mut h = Harness::new();
        let mut q = QuestController::new(quest(&["a", "b", "c"]), false);
        assert_eq!(q.resume_at(1, &mut h.ctx()), QuestAdvance::Pending);
        assert_eq!(q.current_step_index(), Some(1));

        let record = q.progress_record();
        assert_eq!(record.state, QuestState::InProgress);
        assert_eq!(record.current_step, 1);
        assert_eq!(record.completed_steps, vec!["a".to_string()]);
    }
}
