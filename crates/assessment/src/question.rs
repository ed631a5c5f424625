//! Question pool model.

use serde::{Deserialize, Serialize};

use qualiforge_core::QuestionId;

/// Question difficulty scale.
///
/// Ordered from easiest to hardest; the ordering drives both stratification
/// and the adaptive skill walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
        Difficulty::Expert,
    ];

    /// Position on the 0..=3 skill scale.
    pub fn as_index(self) -> usize {
        match self {
            Difficulty::Beginner => 0,
            Difficulty::Intermediate => 1,
            Difficulty::Advanced => 2,
            Difficulty::Expert => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Difficulty> {
        Self::ALL.get(index).copied()
    }

    /// Nearest level for a continuous skill estimate, clamped to the scale.
    pub fn from_estimate(estimate: f64) -> Difficulty {
        let top = (Self::ALL.len() - 1) as f64;
        let index = estimate.round().clamp(0.0, top) as usize;
        Self::ALL[index]
    }
}

/// Question format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Scenario,
}

/// A question in the assessment pool.
///
/// Usage counters (`times_used`, `times_correct`, `average_time_secs`) are
/// maintained by analytics outside this crate; selection only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub difficulty: Difficulty,
    pub question_type: QuestionType,
    pub category: String,
    pub tags: Vec<String>,
    pub points: u32,
    pub times_used: u64,
    pub times_correct: u64,
    pub average_time_secs: f64,
}

impl Question {
    pub fn new(
        difficulty: Difficulty,
        question_type: QuestionType,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: QuestionId::new(),
            difficulty,
            question_type,
            category: category.into(),
            tags: Vec::new(),
            points: 1,
            times_used: 0,
            times_correct: 0,
            average_time_secs: 0.0,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    pub fn with_usage(mut self, times_used: u64, times_correct: u64) -> Self {
        self.times_used = times_used;
        self.times_correct = times_correct;
        self
    }
}
