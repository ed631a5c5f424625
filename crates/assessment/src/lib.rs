//! Assessment question selection (constrained sampling + adaptive sessions).
//!
//! Pure selection logic over an in-memory question pool: callers bring the
//! pool and a request and get back a deterministic, seedable selection with a
//! per-stratum report. No IO, no async, no storage.

pub mod adaptive;
pub mod error;
pub mod question;
pub mod request;
pub mod sampler;

pub use adaptive::{
    select_adaptive_questions, AdaptiveConfig, AnswerGrade, AnswerRecord, AssessmentSession,
    LearningMode,
};
pub use error::{SelectionError, SelectionResult};
pub use question::{Difficulty, Question, QuestionType};
pub use request::{CategoryQuota, SelectionRequest, DISTRIBUTION_TOLERANCE, MAX_TOTAL_QUESTIONS};
pub use sampler::{select_questions, SelectionOutcome, SelectionReport, StratumReport};
