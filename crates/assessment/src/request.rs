//! Selection requests and their validation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use qualiforge_core::QuestionId;

use crate::error::SelectionError;
use crate::question::{Difficulty, QuestionType};

/// Tolerance when checking that a distribution sums to 1.0.
pub const DISTRIBUTION_TOLERANCE: f64 = 0.01;

/// Hard cap on questions per selection.
pub const MAX_TOTAL_QUESTIONS: usize = 200;

/// Per-category override.
///
/// A quota with `count` set reserves exactly that many slots for the category,
/// taking precedence over the fraction targets; the category's remaining
/// questions sit out the fraction phase. A quota with only `weight` scales the
/// sampling weight of every question in the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryQuota {
    pub category: String,
    pub count: Option<usize>,
    pub weight: f64,
}

impl CategoryQuota {
    /// Reserve an exact number of slots for a category.
    pub fn count(category: impl Into<String>, count: usize) -> Self {
        Self {
            category: category.into(),
            count: Some(count),
            weight: 1.0,
        }
    }

    /// Scale the sampling weight of a category without pinning its size.
    pub fn weighted(category: impl Into<String>, weight: f64) -> Self {
        Self {
            category: category.into(),
            count: None,
            weight,
        }
    }
}

/// A constrained question selection request.
///
/// Distributions use `BTreeMap` so stratum iteration order is stable, which
/// keeps seeded selections reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub total_questions: usize,
    /// difficulty -> fraction; must sum to 1.0 within [`DISTRIBUTION_TOLERANCE`]
    pub difficulty_distribution: BTreeMap<Difficulty, f64>,
    /// Optional type -> fraction; same tolerance when present
    pub type_distribution: Option<BTreeMap<QuestionType, f64>>,
    pub category_quotas: Vec<CategoryQuota>,
    pub exclude_question_ids: Vec<QuestionId>,
    /// Weight questions inversely to how often they have been used
    pub prioritize_new: bool,
    /// Advisory flag: the adaptive flow builds the distribution itself
    pub adaptive_selection: bool,
    /// Seeds the skill estimate in the adaptive flow
    pub user_level: Option<Difficulty>,
    /// Pin the RNG for reproducible selections
    pub seed: Option<u64>,
}

impl SelectionRequest {
    pub fn new(
        total_questions: usize,
        difficulty_distribution: BTreeMap<Difficulty, f64>,
    ) -> Self {
        Self {
            total_questions,
            difficulty_distribution,
            type_distribution: None,
            category_quotas: Vec::new(),
            exclude_question_ids: Vec::new(),
            prioritize_new: false,
            adaptive_selection: false,
            user_level: None,
            seed: None,
        }
    }

    pub fn with_type_distribution(mut self, types: BTreeMap<QuestionType, f64>) -> Self {
        self.type_distribution = Some(types);
        self
    }

    pub fn with_quota(mut self, quota: CategoryQuota) -> Self {
        self.category_quotas.push(quota);
        self
    }

    pub fn with_excluded(mut self, ids: Vec<QuestionId>) -> Self {
        self.exclude_question_ids = ids;
        self
    }

    pub fn with_prioritize_new(mut self) -> Self {
        self.prioritize_new = true;
        self
    }

    pub fn with_user_level(mut self, level: Difficulty) -> Self {
        self.user_level = Some(level);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate shape and arithmetic before any sampling happens.
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.total_questions == 0 {
            return Err(SelectionError::configuration(
                "total_questions must be at least 1",
            ));
        }
        if self.total_questions > MAX_TOTAL_QUESTIONS {
            return Err(SelectionError::configuration(format!(
                "total_questions must not exceed {MAX_TOTAL_QUESTIONS}"
            )));
        }

        validate_distribution("difficulty_distribution", &self.difficulty_distribution)?;
        if let Some(types) = &self.type_distribution {
            validate_distribution("type_distribution", types)?;
        }

        let mut seen = BTreeSet::new();
        let mut reserved = 0usize;
        for quota in &self.category_quotas {
            if quota.category.trim().is_empty() {
                return Err(SelectionError::configuration(
                    "quota category cannot be empty",
                ));
            }
            if !seen.insert(quota.category.as_str()) {
                return Err(SelectionError::configuration(format!(
                    "duplicate quota for category '{}'",
                    quota.category
                )));
            }
            if !quota.weight.is_finite() || quota.weight <= 0.0 {
                return Err(SelectionError::configuration(format!(
                    "quota weight for '{}' must be a positive number",
                    quota.category
                )));
            }
            reserved += quota.count.unwrap_or(0);
        }
        if reserved > self.total_questions {
            return Err(SelectionError::configuration(format!(
                "category quota counts reserve {reserved} slots but only {} were requested",
                self.total_questions
            )));
        }

        Ok(())
    }
}

fn validate_distribution<K>(name: &str, distribution: &BTreeMap<K, f64>) -> Result<(), SelectionError>
where
    K: Ord,
{
    if distribution.is_empty() {
        return Err(SelectionError::configuration(format!(
            "{name} must not be empty"
        )));
    }
    for fraction in distribution.values() {
        if !fraction.is_finite() || *fraction < 0.0 {
            return Err(SelectionError::configuration(format!(
                "{name} fractions must be finite and non-negative"
            )));
        }
    }
    let sum: f64 = distribution.values().sum();
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(SelectionError::configuration(format!(
            "{name} fractions sum to {sum:.4}, expected 1.0 within {DISTRIBUTION_TOLERANCE}"
        )));
    }
    Ok(())
}
