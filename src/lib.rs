//! Quest and guided-experiment runtime for classroom lab sessions.
//!
//! Content (guides, quests, cues, book subjects) is authored in TOML and
//! loaded by [`quest::ContentRegistry`]. The [`coordinator::Coordinator`]
//! owns all runtime state and is driven by host events and a tracking tick.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod experiment;
pub mod guide;
pub mod quest;
