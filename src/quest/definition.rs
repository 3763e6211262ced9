//! Quest Definition Structures
//!
//! These structures are deserialized from TOML quest files and resolved
//! against the cue table before a quest can run.

use serde::{Deserialize, Serialize};

use super::cue::{Cue, CueTable};
use super::reading::RandomMode;

/// A quest definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestFile {
    pub quest: RawQuest,
}

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Quests that must be completed before this one unlocks
    #[serde(default)]
    pub requires: Vec<String>,
    /// Guide loaded alongside the quest
    pub guide: Option<String>,
    /// Experiment controller used by experiment steps
    pub experiment: Option<String>,
    #[serde(default = "default_true")]
    pub auto_load_guide: bool,
    #[serde(default)]
    pub rewards: Option<RawReward>,
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

fn default_true() -> bool {
    true
}

/// Raw step as it appears in TOML. Which fields matter depends on `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub description: String,

    // simple
    pub trigger: Option<String>,

    // option
    pub intro_cue: Option<String>,
    #[serde(default)]
    pub options: Vec<RawOption>,

    // experiment
    pub experiment: Option<String>,
    #[serde(default)]
    pub track: Vec<String>,
    pub policy: Option<String>,
    pub min_completed: Option<usize>,
    pub action: Option<String>,
    #[serde(default)]
    pub require_running: bool,

    // reading
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    pub random: Option<String>,
    pub subject: Option<String>,
}

fn default_threshold() -> f32 {
    0.8
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOption {
    pub id: String,
    pub label: String,
    pub cue: Option<String>,
    /// Choosing this option completes the step
    #[serde(default)]
    pub completes: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReward {
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub badges: Vec<String>,
}

// ============================================================================
// Resolved Quest Structures (after parsing)
// ============================================================================

/// How several tracked conditions combine into one completion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPolicy {
    All,
    Any,
    AtLeast(usize),
}

impl TrackingPolicy {
    pub fn from_raw(policy: Option<&str>, min_completed: Option<usize>) -> Result<Self, String> {
        match policy.map(|p| p.to_lowercase()).as_deref() {
            None | Some("all") => Ok(TrackingPolicy::All),
            Some("any") => Ok(TrackingPolicy::Any),
            Some("at_least") | Some("atleast") | Some("minimum") => {
                let n = min_completed
                    .ok_or_else(|| "Policy 'at_least' needs min_completed".to_string())?;
                Ok(TrackingPolicy::AtLeast(n))
            }
            Some(other) => Err(format!("Unknown tracking policy '{}'", other)),
        }
    }

    /// An empty tracked set is always satisfied. `AtLeast(n)` is capped at
    /// the number of tracked ids.
    pub fn is_satisfied(&self, done: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        match self {
            TrackingPolicy::All => done >= total,
            TrackingPolicy::Any => done >= 1,
            TrackingPolicy::AtLeast(n) => done >= (*n).min(total),
        }
    }
}

/// What an experiment step does to its controller when it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentAction {
    None,
    Setup,
    Start,
    WaitForCompletion,
    Stop,
}

impl ExperimentAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(ExperimentAction::None),
            "setup" => Some(ExperimentAction::Setup),
            "start" => Some(ExperimentAction::Start),
            "wait_for_completion" | "wait" => Some(ExperimentAction::WaitForCompletion),
            "stop" => Some(ExperimentAction::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionDef {
    pub id: String,
    pub label: String,
    pub cue: Option<Cue>,
    pub completes: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionStepDef {
    pub intro_cue: Option<Cue>,
    pub options: Vec<OptionDef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentStepDef {
    pub experiment: String,
    pub track: Vec<String>,
    pub policy: TrackingPolicy,
    pub action: ExperimentAction,
    pub require_running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReadingRange {
    Fixed { start: u32, end: u32 },
    Random { mode: RandomMode, subject: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingStepDef {
    pub range: ReadingRange,
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize)]
pub enum StepKind {
    /// Completes on a named signal or a forced completion
    Simple { trigger: Option<String> },
    Option(OptionStepDef),
    Experiment(ExperimentStepDef),
    Reading(ReadingStepDef),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Simple { .. } => "simple",
            StepKind::Option(_) => "option",
            StepKind::Experiment(_) => "experiment",
            StepKind::Reading(_) => "reading",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDef {
    pub id: String,
    pub description: String,
    pub kind: StepKind,
}

impl StepDef {
    pub fn from_raw(
        raw: &RawStep,
        quest_experiment: Option<&str>,
        cues: &CueTable,
    ) -> Result<Self, String> {
        let kind = match raw.step_type.to_lowercase().as_str() {
            "simple" | "signal" => StepKind::Simple { trigger: raw.trigger.clone() },
            "option" | "options" => {
                if raw.options.is_empty() {
                    return Err(format!("Option step '{}' has no options", raw.id));
                }
                let intro_cue = raw.intro_cue.as_deref().map(|k| cues.resolve(k)).transpose()?;
                let mut options = Vec::with_capacity(raw.options.len());
                for option in &raw.options {
                    options.push(OptionDef {
                        id: option.id.clone(),
                        label: option.label.clone(),
                        cue: option.cue.as_deref().map(|k| cues.resolve(k)).transpose()?,
                        completes: option.completes,
                    });
                }
                if !options.iter().any(|o| o.completes) {
                    return Err(format!("Option step '{}' has no completing option", raw.id));
                }
                StepKind::Option(OptionStepDef { intro_cue, options })
            }
            "experiment" => {
                let experiment = raw
                    .experiment
                    .as_deref()
                    .or(quest_experiment)
                    .ok_or_else(|| format!("Experiment step '{}' has no experiment", raw.id))?;
                let action = match raw.action.as_deref() {
                    Some(a) => ExperimentAction::from_str(a)
                        .ok_or_else(|| format!("Unknown experiment action '{}'", a))?,
                    None => ExperimentAction::None,
                };
                StepKind::Experiment(ExperimentStepDef {
                    experiment: experiment.to_string(),
                    track: raw
                        .track
                        .iter()
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect(),
                    policy: TrackingPolicy::from_raw(raw.policy.as_deref(), raw.min_completed)?,
                    action,
                    require_running: raw.require_running,
                })
            }
            "reading" => {
                if !(raw.threshold > 0.0 && raw.threshold <= 1.0) {
                    return Err(format!(
                        "Reading step '{}' threshold {} outside (0, 1]",
                        raw.id, raw.threshold
                    ));
                }
                let range = match (&raw.random, raw.start_page, raw.end_page) {
                    (Some(mode), _, _) => ReadingRange::Random {
                        mode: RandomMode::from_str(mode)
                            .ok_or_else(|| format!("Unknown random reading mode '{}'", mode))?,
                        subject: raw.subject.clone(),
                    },
                    (None, Some(start), Some(end)) if start <= end => {
                        ReadingRange::Fixed { start, end }
                    }
                    _ => {
                        return Err(format!("Reading step '{}' has no valid page range", raw.id));
                    }
                };
                StepKind::Reading(ReadingStepDef { range, threshold: raw.threshold })
            }
            other => return Err(format!("Unknown step type '{}'", other)),
        };

        Ok(Self {
            id: raw.id.clone(),
            description: raw.description.clone(),
            kind,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub points: i32,
    pub badges: Vec<String>,
}

/// A fully resolved quest definition
#[derive(Debug, Clone, Serialize)]
pub struct QuestDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub requires: Vec<String>,
    pub guide: Option<String>,
    pub experiment: Option<String>,
    pub auto_load_guide: bool,
    pub reward: Reward,
    pub steps: Vec<StepDef>,
}

impl QuestDef {
    pub fn from_raw(raw: &RawQuest, cues: &CueTable) -> Result<Self, String> {
        if raw.id.trim().is_empty() {
            return Err("Quest id is empty".to_string());
        }
        if raw.steps.is_empty() {
            return Err(format!("Quest '{}' has no steps", raw.id));
        }

        let mut steps: Vec<StepDef> = Vec::with_capacity(raw.steps.len());
        for step in &raw.steps {
            if steps.iter().any(|s| s.id == step.id) {
                return Err(format!("Quest '{}' has duplicate step '{}'", raw.id, step.id));
            }
            let resolved = StepDef::from_raw(step, raw.experiment.as_deref(), cues)
                .map_err(|e| format!("Quest '{}': {}", raw.id, e))?;
            steps.push(resolved);
        }

        let reward = raw
            .rewards
            .as_ref()
            .map(|r| Reward { points: r.points, badges: r.badges.clone() })
            .unwrap_or_default();

        Ok(Self {
            id: raw.id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            requires: raw.requires.clone(),
            guide: raw.guide.clone(),
            experiment: raw.experiment.clone(),
            auto_load_guide: raw.auto_load_guide,
            reward,
            steps,
        })
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::cue::CueKind;

    fn cues() -> CueTable {
        let mut table = CueTable::new();
        table.insert(Cue { id: "Hello".into(), kind: CueKind::Voice, clip: "hello".into() });
        table.insert(Cue { id: "Nod".into(), kind: CueKind::Animation, clip: "nod".into() });
        table
    }

    fn parse(toml_str: &str) -> Result<QuestDef, String> {
        let raw: RawQuestFile = toml::from_str(toml_str).map_err(|e| e.to_string())?;
        QuestDef::from_raw(&raw.quest, &cues())
    }

    #[test]
    fn test_parse_quest() {
        let quest = parse(
            r#"
[quest]
id = "heat_lab"
name = "Heat Lab"
experiment = "calorimeter"
guide = "calorimeter_guide"
requires = ["intro"]

[quest.rewards]
points = 50
badges = ["thermo"]

[[quest.steps]]
id = "greet"
type = "option"
intro_cue = "Hello"

[[quest.steps.options]]
id = "ready"
label = "I'm ready"
cue = "Nod"
completes = true

[[quest.steps]]
id = "measure"
type = "experiment"
track = ["X", "Y", " "]
policy = "at_least"
min_completed = 1
action = "start"

[[quest.steps]]
id = "read"
type = "reading"
start_page = 10
end_page = 19
threshold = 0.5

[[quest.steps]]
id = "done"
type = "simple"
trigger = "talked_to_teacher"
"#,
        )
        .unwrap();

        assert_eq!(quest.steps.len(), 4);
        assert!(quest.auto_load_guide);
        assert_eq!(quest.reward.points, 50);
        match &quest.steps[1].kind {
            StepKind::Experiment(def) => {
                assert_eq!(def.experiment, "calorimeter");
                assert_eq!(def.track, vec!["X".to_string(), "Y".to_string()]);
                assert_eq!(def.policy, TrackingPolicy::AtLeast(1));
                assert_eq!(def.action, ExperimentAction::Start);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        match &quest.steps[0].kind {
            StepKind::Option(def) => {
                assert_eq!(def.intro_cue.as_ref().map(|c| c.clip.as_str()), Some("hello"));
                assert_eq!(def.options[0].cue.as_ref().map(|c| c.kind), Some(CueKind::Animation));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_cue_fails_load() {
        let err = parse(
            r#"
[quest]
id = "q"
name = "Q"

[[quest.steps]]
id = "s"
type = "option"

[[quest.steps.options]]
id = "a"
label = "A"
cue = "Shout"
completes = true
"#,
        )
        .unwrap_err();
        assert!(err.contains("Unknown cue 'Shout'"));
    }

    #[test]
    fn test_load_errors() {
        assert!(parse("[quest]\nid = \"q\"\nname = \"Q\"\n").is_err());

        let duplicate = r#"
[quest]
id = "q"
name = "Q"
[[quest.steps]]
id = "s"
type = "simple"
[[quest.steps]]
id = "s"
type = "simple"
"#;
        assert!(parse(duplicate).unwrap_err().contains("duplicate"));

        let threshold = r#"
[quest]
id = "q"
name = "Q"
[[quest.steps]]
id = "r"
type = "reading"
start_page = 1
end_page = 4
threshold = 1.5
"#;
        assert!(parse(threshold).is_err());

        let no_experiment = r#"
[quest]
id = "q"
name = "Q"
[[quest.steps]]
id = "e"
type = "experiment"
track = ["X"]
"#;
        assert!(parse(no_experiment).is_err());
    }

    #[test]
    fn test_policy_satisfaction() {
        assert!(TrackingPolicy::All.is_satisfied(0, 0));
        assert!(!TrackingPolicy::All.is_satisfied(1, 2));
        assert!(TrackingPolicy::All.is_satisfied(2, 2));
        assert!(TrackingPolicy::Any.is_satisfied(1, 3));
        assert!(!TrackingPolicy::AtLeast(2).is_satisfied(1, 3));
        assert!(TrackingPolicy::AtLeast(5).is_satisfied(3, 3));
        assert!(TrackingPolicy::from_raw(Some("at_least"), None).is_err());
        assert!(TrackingPolicy::from_raw(Some("most"), None).is_err());
    }
}
