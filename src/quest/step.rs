//! Quest Step Runtime
//!
//! One `QuestStep` per step definition. Every kind goes through the same
//! interface: `start` establishes the completion condition, `handle` reacts to
//! host events, `pump` drains experiment events on each tick, and `teardown`
//! releases whatever `start` acquired. The first three return true when the
//! step has just become complete.

use std::collections::HashMap;

use rand::rngs::StdRng;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, warn};

use super::definition::{
    ExperimentAction, ExperimentStepDef, OptionStepDef, ReadingRange, StepDef, StepKind,
};
use super::events::{OptionChoice, QuestEvent, QuestNotice};
use super::reading::{ReadingAssignment, ReadingProgress, SubjectCatalogue};
use super::state::StepTicket;
use crate::experiment::{ExperimentEvent, ExperimentHub};
use crate::guide::GuideRegistry;

/// Collaborators a step may touch while it runs
pub struct StepContext<'a> {
    pub guides: &'a GuideRegistry,
    pub experiments: &'a mut ExperimentHub,
    pub catalogue: &'a SubjectCatalogue,
    pub rng: &'a mut StdRng,
    pub notices: &'a mut Vec<QuestNotice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionPhase {
    Idle,
    AwaitingIntro,
    Choosing,
    /// A chosen option's cue is playing
    PlayingChoice { completes: bool },
}

#[derive(Debug, Default)]
struct ExperimentBinding {
    /// False when the controller was missing and only guide steps count
    attached: bool,
    events: Option<broadcast::Receiver<ExperimentEvent>>,
    observed: HashMap<String, bool>,
    running: bool,
}

#[derive(Debug)]
enum StepState {
    Simple,
    Option {
        phase: OptionPhase,
    },
    Experiment(ExperimentBinding),
    Reading {
        /// Chosen once and kept until the step is reset
        range: Option<(u32, u32, Option<ReadingAssignment>)>,
        progress: Option<ReadingProgress>,
    },
}

impl StepState {
    fn initial(kind: &StepKind) -> Self {
        match kind {
            StepKind::Simple { .. } => StepState::Simple,
            StepKind::Option(_) => StepState::Option { phase: OptionPhase::Idle },
            StepKind::Experiment(_) => StepState::Experiment(ExperimentBinding::default()),
            StepKind::Reading(_) => StepState::Reading { range: None, progress: None },
        }
    }
}

#[derive(Debug)]
pub struct QuestStep {
    def: StepDef,
    complete: bool,
    /// Re-entrancy latch: set by `start`, cleared by `teardown`
    active: bool,
    activations: u32,
    ticket: Option<StepTicket>,
    state: StepState,
}

impl QuestStep {
    pub fn new(def: StepDef) -> Self {
        let state = StepState::initial(&def.kind);
        Self {
            def,
            complete: false,
            active: false,
            activations: 0,
            ticket: None,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn def(&self) -> &StepDef {
        &self.def
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// How many times `start` actually activated this step
    pub fn activations(&self) -> u32 {
        self.activations
    }

    pub fn ticket(&self) -> Option<&StepTicket> {
        self.ticket.as_ref()
    }

    /// Reading progress of an active reading step
    pub fn reading_progress(&self) -> Option<&ReadingProgress> {
        match &self.state {
            StepState::Reading { progress, .. } => progress.as_ref(),
            _ => None,
        }
    }

    pub fn start(&mut self, ticket: StepTicket, ctx: &mut StepContext<'_>) -> bool {
        if self.active {
            debug!("Step '{}' is already active, ignoring start", self.def.id);
            return false;
        }
        if self.complete {
            debug!("Step '{}' is already complete, ignoring start", self.def.id);
            return false;
        }

        self.active = true;
        self.activations += 1;
        self.ticket = Some(ticket.clone());
        ctx.notices.push(QuestNotice::StepStarted {
            ticket: ticket.clone(),
            step_id: self.def.id.clone(),
        });

        match (&self.def.kind, &mut self.state) {
            (StepKind::Simple { .. }, _) => false,
            (StepKind::Option(def), StepState::Option { phase }) => {
                match &def.intro_cue {
                    Some(cue) => {
                        *phase = OptionPhase::AwaitingIntro;
                        ctx.notices.push(QuestNotice::PlayCue { ticket, cue: cue.clone() });
                    }
                    None => {
                        *phase = OptionPhase::Choosing;
                        present_options(def, ticket, ctx.notices);
                    }
                }
                false
            }
            (StepKind::Experiment(def), StepState::Experiment(binding)) => {
                *binding = ExperimentBinding::default();
                match ctx.experiments.get_mut(&def.experiment) {
                    Some(controller) => {
                        binding.events = Some(controller.subscribe());
                        binding.attached = true;
                        controller.start_tracking(&def.track);
                        match def.action {
                            ExperimentAction::Setup => controller.setup(),
                            ExperimentAction::Start => controller.start(),
                            ExperimentAction::Stop => controller.stop(),
                            ExperimentAction::None | ExperimentAction::WaitForCompletion => {}
                        }
                        binding.running = controller.is_running();
                    }
                    None => error!(
                        "Experiment controller '{}' missing for step '{}', evaluating guide steps only",
                        def.experiment, self.def.id
                    ),
                }
                evaluate_experiment(def, binding, ctx.guides)
            }
            (StepKind::Reading(def), StepState::Reading { range, progress }) => {
                if range.is_none() {
                    *range = match &def.range {
                        ReadingRange::Fixed { start, end } => Some((*start, *end, None)),
                        ReadingRange::Random { mode, subject } => {
                            match ctx.catalogue.pick(*mode, subject.as_deref(), &mut *ctx.rng) {
                                Some(a) => Some((a.start_page, a.end_page, Some(a))),
                                None => None,
                            }
                        }
                    };
                }

                let Some((start, end, assignment)) = range.as_ref() else {
                    error!("Reading step '{}' has no page range to track", self.def.id);
                    return false;
                };
                *progress = Some(ReadingProgress::new(*start, *end, def.threshold));
                ctx.notices.push(QuestNotice::ReadingAssigned {
                    ticket,
                    start_page: *start,
                    end_page: *end,
                    assignment: assignment.clone(),
                });
                false
            }
            _ => false,
        }
    }

    pub fn handle(&mut self, event: &QuestEvent, ctx: &mut StepContext<'_>) -> bool {
        if !self.active || self.complete {
            return false;
        }
        let Some(ticket) = self.ticket.clone() else {
            return false;
        };

        match (&self.def.kind, &mut self.state) {
            (StepKind::Simple { trigger }, _) => match event {
                QuestEvent::Signal { name } => trigger.as_deref() == Some(name.as_str()),
                _ => false,
            },
            (StepKind::Option(def), StepState::Option { phase }) => match event {
                QuestEvent::CueFinished { .. } => match *phase {
                    OptionPhase::AwaitingIntro => {
                        *phase = OptionPhase::Choosing;
                        present_options(def, ticket, ctx.notices);
                        false
                    }
                    OptionPhase::PlayingChoice { completes: true } => true,
                    OptionPhase::PlayingChoice { completes: false } => {
                        *phase = OptionPhase::Choosing;
                        present_options(def, ticket, ctx.notices);
                        false
                    }
                    _ => {
                        debug!("Step '{}' got an unexpected cue finish", self.def.id);
                        false
                    }
                },
                QuestEvent::OptionSelected { option_id, .. } => {
                    if *phase != OptionPhase::Choosing {
                        debug!(
                            "Step '{}' ignored option '{}' while not choosing",
                            self.def.id, option_id
                        );
                        return false;
                    }
                    let Some(option) = def.options.iter().find(|o| o.id == *option_id) else {
                        warn!("Step '{}' has no option '{}'", self.def.id, option_id);
                        return false;
                    };

                    ctx.notices.push(QuestNotice::DismissOptions { ticket: ticket.clone() });
                    match &option.cue {
                        Some(cue) => {
                            *phase = OptionPhase::PlayingChoice { completes: option.completes };
                            ctx.notices.push(QuestNotice::PlayCue { ticket, cue: cue.clone() });
                            false
                        }
                        None if option.completes => true,
                        None => {
                            present_options(def, ticket, ctx.notices);
                            false
                        }
                    }
                }
                _ => false,
            },
            (StepKind::Reading(_), StepState::Reading { progress: Some(progress), .. }) => {
                let QuestEvent::PageChanged { page } = event else {
                    return false;
                };
                if !progress.record_spread(*page) {
                    return false;
                }
                ctx.notices.push(QuestNotice::ReadingProgress {
                    quest_id: ticket.quest_id,
                    step_id: self.def.id.clone(),
                    pages_read: progress.pages_read(),
                    required: progress.required(),
                });
                progress.is_complete()
            }
            _ => false,
        }
    }

    /// Drain pending experiment events and re-evaluate. Steps that are not
    /// bound to an experiment never complete here.
    pub fn pump(&mut self, ctx: &mut StepContext<'_>) -> bool {
        if !self.active || self.complete {
            return false;
        }
        let (StepKind::Experiment(def), StepState::Experiment(binding)) =
            (&self.def.kind, &mut self.state)
        else {
            return false;
        };

        // Guide-only evaluation has no events to wait for
        let mut dirty = !binding.attached;
        let mut lagged = false;
        let mut closed = false;

        if let Some(events) = binding.events.as_mut() {
            loop {
                match events.try_recv() {
                    Ok(ExperimentEvent::GuideStepStatusChanged { step_id, completed }) => {
                        if def.track.iter().any(|id| *id == step_id) {
                            binding.observed.insert(step_id, completed);
                            dirty = true;
                        }
                    }
                    Ok(ExperimentEvent::StateChanged { running }) => {
                        binding.running = running;
                        dirty = true;
                    }
                    Ok(ExperimentEvent::Completed) => {
                        if def.action == ExperimentAction::WaitForCompletion {
                            binding.running = false;
                        }
                        dirty = true;
                    }
                    Ok(ExperimentEvent::TrackingChanged { .. }) => {}
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(
                            "Step '{}' lagged {} experiment events, re-reading conditions",
                            self.def.id, skipped
                        );
                        lagged = true;
                        dirty = true;
                    }
                    Err(TryRecvError::Closed) => {
                        error!(
                            "Experiment '{}' closed its channel under step '{}'",
                            def.experiment, self.def.id
                        );
                        closed = true;
                        break;
                    }
                }
            }
        }

        if closed {
            binding.events = None;
            binding.attached = false;
        } else if lagged {
            // Skipped status changes are gone; take the controller's view instead
            if let Some(controller) = ctx.experiments.get(&def.experiment) {
                for id in &def.track {
                    binding.observed.insert(id.clone(), controller.condition(id, ctx.guides));
                }
                binding.running = controller.is_running();
            }
        }

        dirty && evaluate_experiment(def, binding, ctx.guides)
    }

    /// Release this step's tracked ids and its subscription. Safe to call
    /// repeatedly.
    pub fn teardown(&mut self, experiments: &mut ExperimentHub) {
        match (&self.def.kind, &mut self.state) {
            (StepKind::Experiment(def), StepState::Experiment(binding)) => {
                if binding.attached {
                    if let Some(controller) = experiments.get_mut(&def.experiment) {
                        controller.release_tracking(&def.track);
                    }
                    binding.attached = false;
                }
                binding.events = None;
            }
            (_, StepState::Option { phase }) => *phase = OptionPhase::Idle,
            _ => {}
        }
        self.active = false;
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
        self.active = false;
    }

    /// Back to the unstarted state; call `teardown` first
    pub fn reset(&mut self) {
        self.complete = false;
        self.active = false;
        self.ticket = None;
        self.state = StepState::initial(&self.def.kind);
    }
}

fn present_options(def: &OptionStepDef, ticket: StepTicket, notices: &mut Vec<QuestNotice>) {
    notices.push(QuestNotice::PresentOptions {
        ticket,
        options: def
            .options
            .iter()
            .map(|o| OptionChoice { id: o.id.clone(), label: o.label.clone() })
            .collect(),
    });
}

fn evaluate_experiment(
    def: &ExperimentStepDef,
    binding: &ExperimentBinding,
    guides: &GuideRegistry,
) -> bool {
    let done = def
        .track
        .iter()
        .filter(|id| {
            binding.observed.get(id.as_str()).copied().unwrap_or(false)
                || guides.is_step_completed(id)
        })
        .count();

    let experiment_ok = match def.action {
        ExperimentAction::Start => binding.running,
        ExperimentAction::WaitForCompletion => !binding.running,
        _ => !def.require_running || binding.running,
    };

    def.policy.is_satisfied(done, def.track.len()) && experiment_ok
}
