//! Reading Progress
//!
//! Page tracking for book-reading steps, plus the subject catalogue used
//! to hand out random reading assignments.

use std::collections::BTreeSet;
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Page tracking
// ============================================================================

/// Pages read inside one assigned range
#[derive(Debug, Clone)]
pub struct ReadingProgress {
    start: u32,
    end: u32,
    read: BTreeSet<u32>,
    total: usize,
    required: usize,
}

impl ReadingProgress {
    /// `threshold` is the fraction of pages (0.0..=1.0) that must be read
    pub fn new(start: u32, end: u32, threshold: f32) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let total = ((end - start) as usize).saturating_add(1);
        let required = ((total as f32) * threshold.clamp(0.0, 1.0)).ceil() as usize;
        Self {
            start,
            end,
            read: BTreeSet::new(),
            total,
            required: required.max(1),
        }
    }

    pub fn range(&self) -> (u32, u32) {
        (self.start, self.end)
    }

    pub fn pages_read(&self) -> usize {
        self.read.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// The book reports the left page of a spread; both pages count.
    /// Returns true when at least one new page was recorded.
    pub fn record_spread(&mut self, page: u32) -> bool {
        if page < self.start || page > self.end {
            return false;
        }

        let mut new_page = self.read.insert(page);
        if let Some(right) = page.checked_add(1) {
            if right <= self.end && self.read.insert(right) {
                new_page = true;
            }
        }
        new_page
    }

    pub fn is_complete(&self) -> bool {
        self.read.len() >= self.required
    }

    pub fn progress(&self) -> f32 {
        (self.read.len() as f32 / self.required as f32).min(1.0)
    }

    pub fn progress_text(&self) -> String {
        format!(
            "{}/{} pages read ({:.0}%)",
            self.read.len(),
            self.required,
            self.progress() * 100.0
        )
    }

    /// Number of distinct two-page spreads touched
    pub fn spreads_read(&self) -> usize {
        let mut spreads = BTreeSet::new();
        for page in &self.read {
            spreads.insert(if page % 2 == 0 { *page } else { page - 1 });
        }
        spreads.len()
    }

    pub fn total_spreads(&self) -> usize {
        self.total.div_ceil(2)
    }
}

// ============================================================================
// Subject catalogue
// ============================================================================

/// How a random reading assignment is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomMode {
    /// Any lecture of any subject
    Subject,
    /// Any lecture of the named subject
    Lecture,
    /// Every lecture of one chapter of the named subject
    Chapter,
}

impl RandomMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subject" | "random_subject" => Some(RandomMode::Subject),
            "lecture" | "random_lecture" => Some(RandomMode::Lecture),
            "chapter" | "random_chapter" => Some(RandomMode::Chapter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSubjectFile {
    #[serde(default)]
    pub subject: Vec<RawSubject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSubject {
    pub name: String,
    /// Total pages in the book, 0 when unknown
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub lectures: Vec<RawLecture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLecture {
    pub name: String,
    pub chapter: u32,
    #[serde(default)]
    pub group: String,
    pub page: u32,
}

#[derive(Debug, Clone)]
pub struct Lecture {
    pub name: String,
    pub chapter: u32,
    pub group: String,
    pub page: u32,
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub name: String,
    pub pages: u32,
    /// Sorted by starting page
    pub lectures: Vec<Lecture>,
}

impl Subject {
    pub fn from_raw(raw: &RawSubject) -> Self {
        let mut lectures: Vec<Lecture> = raw
            .lectures
            .iter()
            .map(|l| Lecture {
                name: l.name.clone(),
                chapter: l.chapter,
                group: l.group.clone(),
                page: l.page,
            })
            .collect();
        lectures.sort_by_key(|l| l.page);
        Self { name: raw.name.clone(), pages: raw.pages, lectures }
    }

    /// Last page of the lecture at `index`
    fn lecture_end(&self, index: usize) -> u32 {
        match self.lectures.get(index + 1) {
            Some(next) => next.page.saturating_sub(1).max(self.lectures[index].page),
            None if self.pages > 0 => self.pages.max(self.lectures[index].page),
            None => self.lectures[index].page,
        }
    }
}

/// A concrete page range picked for a reading step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingAssignment {
    pub subject: String,
    pub lecture: String,
    pub chapter: String,
    pub start_page: u32,
    pub end_page: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectCatalogue {
    subjects: Vec<Subject>,
}

impl SubjectCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_subjects(subjects: Vec<Subject>) -> Self {
        Self { subjects }
    }

    /// Load every `<data_dir>/subjects/*.toml` file
    pub fn load_from_directory(&mut self, data_dir: &Path) -> Result<usize, String> {
        let subjects_dir = data_dir.join("subjects");

        if !subjects_dir.exists() {
            warn!("Subject directory does not exist: {:?}", subjects_dir);
            return Ok(0);
        }

        let entries = std::fs::read_dir(&subjects_dir)
            .map_err(|e| format!("Failed to read directory {:?}: {}", subjects_dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
            let path = entry.path();

            if path.extension().map_or(false, |ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
                let raw: RawSubjectFile = toml::from_str(&content)
                    .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;
                for subject in &raw.subject {
                    self.subjects.retain(|s| s.name != subject.name);
                    self.subjects.push(Subject::from_raw(subject));
                }
            }
        }

        info!("Loaded {} subjects", self.subjects.len());
        Ok(self.subjects.len())
    }

    pub fn get(&self, name: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Pick a random assignment. `subject` is required for the lecture and
    /// chapter modes.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        mode: RandomMode,
        subject: Option<&str>,
        rng: &mut R,
    ) -> Option<ReadingAssignment> {
        if self.subjects.is_empty() {
            error!("No subjects available for a random reading assignment");
            return None;
        }

        let subject = match mode {
            RandomMode::Subject => self.subjects.choose(rng)?,
            RandomMode::Lecture | RandomMode::Chapter => {
                let Some(name) = subject else {
                    error!("Random {:?} reading needs a subject name", mode);
                    return None;
                };
                let Some(found) = self.get(name) else {
                    warn!("Subject '{}' not found", name);
                    return None;
                };
                found
            }
        };

        if subject.lectures.is_empty() {
            error!("No lectures found in subject '{}'", subject.name);
            return None;
        }

        match mode {
            RandomMode::Subject | RandomMode::Lecture => {
                let index = rng.gen_range(0..subject.lectures.len());
                let lecture = &subject.lectures[index];
                Some(ReadingAssignment {
                    subject: subject.name.clone(),
                    lecture: lecture.name.clone(),
                    chapter: format!("Chapter {}: {}", lecture.chapter, lecture.group),
                    start_page: lecture.page,
                    end_page: subject.lecture_end(index),
                })
            }
            RandomMode::Chapter => {
                let mut chapters: Vec<u32> = subject.lectures.iter().map(|l| l.chapter).collect();
                chapters.sort_unstable();
                chapters.dedup();
                let chapter = *chapters.choose(rng)?;

                let first = subject.lectures.iter().position(|l| l.chapter == chapter)?;
                let last = subject.lectures.iter().rposition(|l| l.chapter == chapter)?;
                Some(ReadingAssignment {
                    subject: subject.name.clone(),
                    lecture: format!("All lectures in Chapter {}", chapter),
                    chapter: format!("Chapter {}: {}", chapter, subject.lectures[first].group),
                    start_page: subject.lectures[first].page,
                    end_page: subject.lecture_end(last),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn physics() -> Subject {
        let raw: RawSubjectFile = toml::from_str(
            r#"
[[subject]]
name = "physics"
pages = 60

[[subject.lectures]]
name = "Heat"
chapter = 1
group = "Thermal"
page = 10

[[subject.lectures]]
name = "Specific heat"
chapter = 1
group = "Thermal"
page = 20

[[subject.lectures]]
name = "Levers"
chapter = 2
group = "Mechanics"
page = 40
"#,
        )
        .unwrap();
        Subject::from_raw(&raw.subject[0])
    }

    #[test]
    fn test_spreads_count_both_pages() {
        let mut progress = ReadingProgress::new(10, 19, 0.8);
        assert_eq!(progress.total(), 10);
        assert_eq!(progress.required(), 8);

        assert!(progress.record_spread(10));
        assert_eq!(progress.pages_read(), 2);
        assert!(!progress.record_spread(10));
        assert!(!progress.record_spread(30));

        progress.record_spread(12);
        progress.record_spread(14);
        assert!(!progress.is_complete());
        progress.record_spread(16);
        assert!(progress.is_complete());
        assert_eq!(progress.spreads_read(), 4);
        assert_eq!(progress.total_spreads(), 5);
        assert_eq!(progress.progress_text(), "8/8 pages read (100%)");
    }

    #[test]
    fn test_range_ending_at_last_page_number() {
        let mut progress = ReadingProgress::new(u32::MAX - 1, u32::MAX, 1.0);
        assert_eq!(progress.total(), 2);
        assert!(progress.record_spread(u32::MAX));
        assert!(progress.record_spread(u32::MAX - 1));
        assert!(progress.is_complete());

        let whole = ReadingProgress::new(0, u32::MAX, 0.5);
        assert_eq!(whole.total(), u32::MAX as usize + 1);
    }

    #[test]
    fn test_right_page_stays_in_range() {
        let mut progress = ReadingProgress::new(10, 10, 1.0);
        assert!(progress.record_spread(10));
        assert_eq!(progress.pages_read(), 1);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_pick_lecture() {
        let catalogue = SubjectCatalogue::from_subjects(vec![physics()]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10 {
            let pick = catalogue
                .pick(RandomMode::Lecture, Some("physics"), &mut rng)
                .unwrap();
            match pick.lecture.as_str() {
                "Heat" => assert_eq!((pick.start_page, pick.end_page), (10, 19)),
                "Specific heat" => assert_eq!((pick.start_page, pick.end_page), (20, 39)),
                "Levers" => assert_eq!((pick.start_page, pick.end_page), (40, 60)),
                other => panic!("unexpected lecture {}", other),
            }
        }
    }

    #[test]
    fn test_pick_chapter_spans_lectures() {
        let catalogue = SubjectCatalogue::from_subjects(vec![physics()]);
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..10 {
            let pick = catalogue
                .pick(RandomMode::Chapter, Some("physics"), &mut rng)
                .unwrap();
            if pick.chapter.starts_with("Chapter 1") {
                assert_eq!((pick.start_page, pick.end_page), (10, 39));
            } else {
                assert_eq!((pick.start_page, pick.end_page), (40, 60));
            }
        }
    }

    #[test]
    fn test_pick_requires_subject() {
        let catalogue = SubjectCatalogue::from_subjects(vec![physics()]);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(catalogue.pick(RandomMode::Lecture, None, &mut rng).is_none());
        assert!(catalogue.pick(RandomMode::Chapter, Some("history"), &mut rng).is_none());
        assert!(catalogue.pick(RandomMode::Subject, None, &mut rng).is_some());
        assert!(SubjectCatalogue::new().pick(RandomMode::Subject, None, &mut rng).is_none());
    }
}
