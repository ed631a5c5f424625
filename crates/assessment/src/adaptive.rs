//! Adaptive question selection across an assessment session.
//!
//! A session keeps a running skill estimate on the 0..=3 difficulty scale and
//! concentrates each next selection around it: the estimated level gets most
//! of the distribution, its neighbors split the rest. Correct answers nudge
//! the estimate up, incorrect ones down, clamped to the scale.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qualiforge_core::{QualificationId, QuestionId, SessionId, UserId};

use crate::error::SelectionError;
use crate::question::{Difficulty, Question};
use crate::request::SelectionRequest;
use crate::sampler::select_questions;

/// How a session picks its next questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    /// Fixed distribution decided up front
    Assessment,
    /// Difficulty follows the running skill estimate
    AdaptiveLearning,
    /// Fixed distribution, ungraded rehearsal
    Practice,
}

/// Tunables for the adaptive difficulty walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Estimate delta for a correct answer
    pub step_up: f64,
    /// Estimate delta for an incorrect answer
    pub step_down: f64,
    /// Share of the distribution placed on the estimated level; neighbors
    /// split the remainder evenly
    pub focus_weight: f64,
    /// Questions handed out per adaptive selection
    pub batch_size: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            step_up: 1.0 / 3.0,
            step_down: 1.0 / 3.0,
            focus_weight: 0.6,
            batch_size: 1,
        }
    }
}

/// Result of grading one answer, produced by the grading collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnswerGrade {
    pub is_correct: bool,
    pub time_spent_secs: f64,
}

/// One graded answer in the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub difficulty: Difficulty,
    pub is_correct: bool,
    pub time_spent_secs: f64,
    pub answered_at: DateTime<Utc>,
}

/// One user's assessment attempt.
///
/// Tracks which questions were handed out so no id is ever returned twice,
/// and walks the skill estimate as answers come in.
#[derive(Debug, Clone)]
pub struct AssessmentSession {
    session_id: SessionId,
    user_id: UserId,
    qualification_id: QualificationId,
    mode: LearningMode,
    config: AdaptiveConfig,
    skill_estimate: f64,
    asked: HashMap<QuestionId, Difficulty>,
    history: Vec<AnswerRecord>,
    started_at: DateTime<Utc>,
}

impl AssessmentSession {
    /// Start a session with the estimate at the middle of the scale.
    pub fn new(
        user_id: UserId,
        qualification_id: QualificationId,
        mode: LearningMode,
        config: AdaptiveConfig,
    ) -> Self {
        let midpoint = (Difficulty::ALL.len() - 1) as f64 / 2.0;
        Self {
            session_id: SessionId::new(),
            user_id,
            qualification_id,
            mode,
            config,
            skill_estimate: midpoint,
            asked: HashMap::new(),
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Seed the estimate from a known starting level.
    pub fn with_starting_level(mut self, level: Difficulty) -> Self {
        self.skill_estimate = level.as_index() as f64;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn qualification_id(&self) -> QualificationId {
        self.qualification_id
    }

    pub fn mode(&self) -> LearningMode {
        self.mode
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn skill_estimate(&self) -> f64 {
        self.skill_estimate
    }

    /// Nearest difficulty level for the current estimate.
    pub fn estimated_difficulty(&self) -> Difficulty {
        Difficulty::from_estimate(self.skill_estimate)
    }

    pub fn asked_count(&self) -> usize {
        self.asked.len()
    }

    pub fn history(&self) -> &[AnswerRecord] {
        &self.history
    }

    /// Hand out the next questions.
    ///
    /// Previously asked ids are always excluded. In adaptive mode the
    /// request's distribution and total are replaced by a batch concentrated
    /// on the current estimate; other modes pass the request through as-is.
    /// A seeded request stays reproducible: the seed is offset by how many
    /// questions were already asked, so consecutive batches differ but replay
    /// identically.
    pub fn next_questions(
        &mut self,
        pool: &[Question],
        request: &SelectionRequest,
    ) -> Result<Vec<Question>, SelectionError> {
        let mut request = request.clone();
        request
            .exclude_question_ids
            .extend(self.asked.keys().copied());
        request.seed = request.seed.map(|s| s.wrapping_add(self.asked.len() as u64));

        if self.mode == LearningMode::AdaptiveLearning {
            request.total_questions = self.config.batch_size;
            request.difficulty_distribution =
                concentrated_distribution(self.skill_estimate, self.config.focus_weight);
            request.adaptive_selection = true;
        }

        let outcome = select_questions(pool, &request)?;
        for question in &outcome.questions {
            self.asked.insert(question.id, question.difficulty);
        }
        Ok(outcome.questions)
    }

    /// Record a graded answer and move the skill estimate.
    ///
    /// Returns the updated estimate. Rejects ids this session never handed
    /// out.
    pub fn record_answer(
        &mut self,
        question_id: QuestionId,
        grade: AnswerGrade,
    ) -> Result<f64, SelectionError> {
        let difficulty = self
            .asked
            .get(&question_id)
            .copied()
            .ok_or(SelectionError::UnknownQuestion(question_id))?;

        let step = if grade.is_correct {
            self.config.step_up
        } else {
            -self.config.step_down
        };
        let top = (Difficulty::ALL.len() - 1) as f64;
        self.skill_estimate = (self.skill_estimate + step).clamp(0.0, top);

        self.history.push(AnswerRecord {
            question_id,
            difficulty,
            is_correct: grade.is_correct,
            time_spent_secs: grade.time_spent_secs,
            answered_at: Utc::now(),
        });
        Ok(self.skill_estimate)
    }
}

/// One-shot adaptive selection without session state.
///
/// Concentrates the distribution around `request.user_level` (scale midpoint
/// when absent) and returns just the questions.
pub fn select_adaptive_questions(
    pool: &[Question],
    request: &SelectionRequest,
) -> Result<Vec<Question>, SelectionError> {
    let estimate = match request.user_level {
        Some(level) => level.as_index() as f64,
        None => (Difficulty::ALL.len() - 1) as f64 / 2.0,
    };
    let mut request = request.clone();
    request.difficulty_distribution =
        concentrated_distribution(estimate, AdaptiveConfig::default().focus_weight);
    request.adaptive_selection = true;

    Ok(select_questions(pool, &request)?.questions)
}

/// Distribution concentrated on the estimated level: `focus` on the level
/// itself, the rest split evenly over its immediate neighbors. At the edges of
/// the scale the single neighbor takes the whole remainder.
fn concentrated_distribution(estimate: f64, focus: f64) -> BTreeMap<Difficulty, f64> {
    let level = Difficulty::from_estimate(estimate);
    let index = level.as_index();

    let neighbors: Vec<Difficulty> = [index.checked_sub(1), index.checked_add(1)]
        .into_iter()
        .flatten()
        .filter_map(Difficulty::from_index)
        .collect();

    let mut distribution = BTreeMap::new();
    if neighbors.is_empty() {
        distribution.insert(level, 1.0);
        return distribution;
    }

    distribution.insert(level, focus);
    let share = (1.0 - focus) / neighbors.len() as f64;
    for neighbor in neighbors {
        distribution.insert(neighbor, share);
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::question::QuestionType;

    fn adaptive_pool(per_difficulty: usize) -> Vec<Question> {
        let mut pool = Vec::new();
        for difficulty in Difficulty::ALL {
            for _ in 0..per_difficulty {
                pool.push(Question::new(
                    difficulty,
                    QuestionType::MultipleChoice,
                    "general",
                ));
            }
        }
        pool
    }

    fn adaptive_session() -> AssessmentSession {
        AssessmentSession::new(
            UserId::new(),
            QualificationId::new(),
            LearningMode::AdaptiveLearning,
            AdaptiveConfig::default(),
        )
    }

    fn any_request() -> SelectionRequest {
        SelectionRequest::new(
            1,
            BTreeMap::from([(Difficulty::Beginner, 1.0)]),
        )
        .with_seed(17)
    }

    #[test]
    fn concentrated_distribution_splits_focus_and_neighbors() {
        let mid = concentrated_distribution(1.0, 0.6);
        assert_eq!(mid[&Difficulty::Intermediate], 0.6);
        assert_eq!(mid[&Difficulty::Beginner], 0.2);
        assert_eq!(mid[&Difficulty::Advanced], 0.2);
        assert!((mid.values().sum::<f64>() - 1.0).abs() < 1e-9);

        let edge = concentrated_distribution(0.0, 0.6);
        assert_eq!(edge[&Difficulty::Beginner], 0.6);
        assert_eq!(edge[&Difficulty::Intermediate], 0.4);
        assert_eq!(edge.len(), 2);
    }

    #[test]
    fn session_never_repeats_a_question() {
        let pool = adaptive_pool(5);
        let mut session = adaptive_session();
        let request = any_request();

        let mut seen = HashSet::new();
        for _ in 0..10 {
            let questions = session.next_questions(&pool, &request).unwrap();
            assert_eq!(questions.len(), 1);
            assert!(
                seen.insert(questions[0].id),
                "question handed out twice in one session"
            );
        }
        assert_eq!(session.asked_count(), 10);
    }

    #[test]
    fn correct_streak_raises_estimate_monotonically() {
        let pool = adaptive_pool(8);
        let mut session = adaptive_session();
        let request = any_request();

        let mut last = session.skill_estimate();
        for _ in 0..8 {
            let questions = session.next_questions(&pool, &request).unwrap();
            let estimate = session
                .record_answer(
                    questions[0].id,
                    AnswerGrade {
                        is_correct: true,
                        time_spent_secs: 12.0,
                    },
                )
                .unwrap();
            assert!(estimate >= last);
            last = estimate;
        }
        assert_eq!(session.skill_estimate(), 3.0);
        assert_eq!(session.estimated_difficulty(), Difficulty::Expert);
    }

    #[test]
    fn estimate_clamps_at_both_ends() {
        let pool = adaptive_pool(20);
        let mut session = adaptive_session().with_starting_level(Difficulty::Beginner);
        let request = any_request();

        for _ in 0..5 {
            let questions = session.next_questions(&pool, &request).unwrap();
            session
                .record_answer(
                    questions[0].id,
                    AnswerGrade {
                        is_correct: false,
                        time_spent_secs: 30.0,
                    },
                )
                .unwrap();
        }
        assert_eq!(session.skill_estimate(), 0.0);
    }

    #[test]
    fn wrong_answers_walk_the_difficulty_down() {
        let mut session = adaptive_session().with_starting_level(Difficulty::Expert);
        let pool = adaptive_pool(10);
        let request = any_request();

        for _ in 0..9 {
            let questions = session.next_questions(&pool, &request).unwrap();
            session
                .record_answer(
                    questions[0].id,
                    AnswerGrade {
                        is_correct: false,
                        time_spent_secs: 45.0,
                    },
                )
                .unwrap();
        }
        assert_eq!(session.estimated_difficulty(), Difficulty::Beginner);
    }

    #[test]
    fn grading_an_unasked_question_is_rejected() {
        let mut session = adaptive_session();
        let err = session
            .record_answer(
                QuestionId::new(),
                AnswerGrade {
                    is_correct: true,
                    time_spent_secs: 1.0,
                },
            )
            .unwrap_err();
        match err {
            SelectionError::UnknownQuestion(_) => {}
            _ => panic!("Expected UnknownQuestion for a never-asked id"),
        }
    }

    #[test]
    fn history_keeps_question_difficulty_and_grade() {
        let pool = adaptive_pool(4);
        let mut session = adaptive_session();
        let request = any_request();

        let questions = session.next_questions(&pool, &request).unwrap();
        session
            .record_answer(
                questions[0].id,
                AnswerGrade {
                    is_correct: true,
                    time_spent_secs: 7.5,
                },
            )
            .unwrap();

        let record = &session.history()[0];
        assert_eq!(record.question_id, questions[0].id);
        assert_eq!(record.difficulty, questions[0].difficulty);
        assert!(record.is_correct);
        assert_eq!(record.time_spent_secs, 7.5);
    }

    #[test]
    fn assessment_mode_passes_the_request_through() {
        let pool = adaptive_pool(10);
        let mut session = AssessmentSession::new(
            UserId::new(),
            QualificationId::new(),
            LearningMode::Assessment,
            AdaptiveConfig::default(),
        );
        let request = SelectionRequest::new(
            8,
            BTreeMap::from([
                (Difficulty::Beginner, 0.5),
                (Difficulty::Intermediate, 0.5),
            ]),
        )
        .with_seed(23);

        let questions = session.next_questions(&pool, &request).unwrap();
        assert_eq!(questions.len(), 8);
        for q in &questions {
            assert!(matches!(
                q.difficulty,
                Difficulty::Beginner | Difficulty::Intermediate
            ));
        }
    }

    #[test]
    fn sessionless_adaptive_selection_targets_the_user_level() {
        let pool = adaptive_pool(10);
        let request = SelectionRequest::new(
            10,
            BTreeMap::from([(Difficulty::Beginner, 1.0)]),
        )
        .with_user_level(Difficulty::Expert)
        .with_seed(29);

        let questions = select_adaptive_questions(&pool, &request).unwrap();
        assert_eq!(questions.len(), 10);
        // Expert sits at the scale edge: everything must be Expert or Advanced.
        for q in &questions {
            assert!(matches!(
                q.difficulty,
                Difficulty::Expert | Difficulty::Advanced
            ));
        }
    }
}
