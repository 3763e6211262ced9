//! Guide Definition Structures
//!
//! These structures are deserialized from TOML guide files.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A guide definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawGuideFile {
    pub guide: RawGuide,
}

/// Raw guide data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawGuide {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    /// Experiment started once every step of the guide is complete
    pub experiment: Option<String>,
    #[serde(default)]
    pub steps: Vec<RawGuideStep>,
}

/// Raw guide step as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawGuideStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Step expected to be finished before this one
    pub previous: Option<String>,
}

// ============================================================================
// Resolved Guide Structures
// ============================================================================

/// A single authored guide step
#[derive(Debug, Clone, Serialize)]
pub struct GuideStepDef {
    pub id: String,
    pub title: String,
    pub description: String,
    pub previous: Option<String>,
}

/// A fully resolved guide definition
#[derive(Debug, Clone, Serialize)]
pub struct GuideDef {
    pub id: String,
    pub summary: String,
    pub experiment: Option<String>,
    pub steps: Vec<GuideStepDef>,
}

impl GuideDef {
    /// Create a GuideDef from raw TOML data
    pub fn from_raw(raw: &RawGuide) -> Result<Self, String> {
        if raw.id.trim().is_empty() {
            return Err("Guide has an empty id".to_string());
        }

        let mut seen = HashSet::new();
        for step in &raw.steps {
            if step.id.trim().is_empty() {
                return Err(format!("Guide '{}' has a step with an empty id", raw.id));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(format!("Guide '{}' has duplicate step '{}'", raw.id, step.id));
            }
        }

        for step in &raw.steps {
            if let Some(ref prev) = step.previous {
                if !seen.contains(prev.as_str()) {
                    return Err(format!(
                        "Step '{}' in guide '{}' depends on unknown step '{}'",
                        step.id, raw.id, prev
                    ));
                }
            }
        }

        Ok(Self {
            id: raw.id.clone(),
            summary: raw.summary.clone(),
            experiment: raw.experiment.clone(),
            steps: raw
                .steps
                .iter()
                .map(|s| GuideStepDef {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    description: s.description.clone(),
                    previous: s.previous.clone(),
                })
                .collect(),
        })
    }

    /// Build a guide directly from step ids (no titles, no dependencies)
    pub fn from_ids(id: &str, step_ids: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            summary: String::new(),
            experiment: None,
            steps: step_ids
                .iter()
                .map(|s| GuideStepDef {
                    id: s.to_string(),
                    title: String::new(),
                    description: String::new(),
                    previous: None,
                })
                .collect(),
        }
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guide() {
        let raw: RawGuideFile = toml::from_str(
            r#"
[guide]
id = "specific_heat"
experiment = "calorimeter"

[[guide.steps]]
id = "fill_water"
title = "Fill the beaker"

[[guide.steps]]
id = "power_on"
previous = "fill_water"
"#,
        )
        .unwrap();

        let guide = GuideDef::from_raw(&raw.guide).unwrap();
        assert_eq!(guide.steps.len(), 2);
        assert_eq!(guide.experiment.as_deref(), Some("calorimeter"));
        assert_eq!(guide.step_index("power_on"), Some(1));
        assert_eq!(guide.steps[1].previous.as_deref(), Some("fill_water"));
    }

    #[test]
    fn test_rejects_duplicate_steps() {
        let raw = RawGuide {
            id: "g".to_string(),
            summary: String::new(),
            experiment: None,
            steps: vec![
                RawGuideStep { id: "a".into(), title: String::new(), description: String::new(), previous: None },
                RawGuideStep { id: "a".into(), title: String::new(), description: String::new(), previous: None },
            ],
        };
        assert!(GuideDef::from_raw(&raw).is_err());
    }

    #[test]
    fn test_rejects_unknown_previous() {
        let raw = RawGuide {
            id: "g".to_string(),
            summary: String::new(),
            experiment: None,
            steps: vec![RawGuideStep {
                id: "a".into(),
                title: String::new(),
                description: String::new(),
                previous: Some("missing".into()),
            }],
        };
        let err = GuideDef::from_raw(&raw).unwrap_err();
        assert!(err.contains("missing"));
    }
}
