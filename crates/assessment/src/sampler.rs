//! Constrained weighted question sampling.
//!
//! Selection stratifies the eligible pool by difficulty (and jointly by type
//! when a type distribution is present), apportions per-stratum targets with
//! the largest-remainder method, samples each stratum without replacement,
//! and redistributes any stratum shortfall to strata that still have supply.
//! A request that cannot be satisfied fails loudly; the caller never gets a
//! silently short selection.

use std::collections::{HashMap, HashSet};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use qualiforge_core::QuestionId;

use crate::error::SelectionError;
use crate::question::{Difficulty, Question, QuestionType};
use crate::request::SelectionRequest;

/// Outcome of a selection: the questions plus a per-stratum accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub questions: Vec<Question>,
    pub report: SelectionReport,
}

/// How the selection was put together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub requested_total: usize,
    pub eligible_pool: usize,
    /// Seed actually used; echoing it makes any selection replayable
    pub seed: u64,
    /// Questions taken by exact-count category quotas
    pub quota_selected: usize,
    /// Picks moved to surplus strata after others ran dry
    pub redistributed: usize,
    pub strata: Vec<StratumReport>,
}

/// Requested vs achieved counts for one stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumReport {
    pub difficulty: Difficulty,
    pub question_type: Option<QuestionType>,
    pub pool: usize,
    pub requested: usize,
    pub selected: usize,
}

/// Select `request.total_questions` questions from `pool` under the request's
/// distribution, quota, and exclusion constraints.
pub fn select_questions(
    pool: &[Question],
    request: &SelectionRequest,
) -> Result<SelectionOutcome, SelectionError> {
    request.validate()?;

    let seed = request.seed.unwrap_or_else(rand::random);
    let mut rng = SmallRng::seed_from_u64(seed);

    let excluded: HashSet<QuestionId> = request.exclude_question_ids.iter().copied().collect();
    let eligible: Vec<&Question> = pool.iter().filter(|q| !excluded.contains(&q.id)).collect();

    if eligible.len() < request.total_questions {
        return Err(SelectionError::InsufficientPool {
            requested: request.total_questions,
            available: eligible.len(),
        });
    }

    let weights = CategoryWeights::from_request(request);

    // Exact-count quotas come first; a pinned category contributes exactly its
    // quota and sits out the fraction phase.
    let mut picked: Vec<&Question> = Vec::with_capacity(request.total_questions);
    let mut quota_selected = 0usize;
    let mut pinned: HashSet<&str> = HashSet::new();
    for quota in &request.category_quotas {
        let Some(count) = quota.count else { continue };
        pinned.insert(quota.category.as_str());
        let mut candidates: Vec<&Question> = eligible
            .iter()
            .copied()
            .filter(|q| q.category == quota.category)
            .collect();
        if candidates.len() < count {
            return Err(SelectionError::InsufficientPool {
                requested: count,
                available: candidates.len(),
            });
        }
        let chosen = sample_weighted(&mut rng, &mut candidates, count, |q| {
            weights.weight_for(q, request.prioritize_new)
        });
        quota_selected += chosen.len();
        picked.extend(chosen);
    }

    let remaining_total = request.total_questions - quota_selected;

    let mut strata = build_strata(request, &eligible, &pinned);
    apply_targets(&mut strata, remaining_total);

    for stratum in &mut strata {
        let take = stratum.target.min(stratum.pool.len());
        let chosen = sample_weighted(&mut rng, &mut stratum.pool, take, |q| {
            weights.weight_for(q, request.prioritize_new)
        });
        stratum.selected.extend(chosen);
    }

    let shortfall: usize = strata
        .iter()
        .map(|s| s.target - s.selected.len())
        .sum();
    let redistributed = redistribute_shortfall(&mut rng, &mut strata, shortfall, |q| {
        weights.weight_for(q, request.prioritize_new)
    });

    let fraction_selected: usize = strata.iter().map(|s| s.selected.len()).sum();
    if quota_selected + fraction_selected < request.total_questions {
        return Err(SelectionError::InsufficientPool {
            requested: request.total_questions,
            available: quota_selected + fraction_selected,
        });
    }

    let report = SelectionReport {
        requested_total: request.total_questions,
        eligible_pool: eligible.len(),
        seed,
        quota_selected,
        redistributed,
        strata: strata
            .iter()
            .map(|s| StratumReport {
                difficulty: s.difficulty,
                question_type: s.question_type,
                pool: s.pool_size,
                requested: s.target,
                selected: s.selected.len(),
            })
            .collect(),
    };

    for stratum in strata {
        picked.extend(stratum.selected);
    }
    // Strata would otherwise come out grouped by difficulty.
    picked.shuffle(&mut rng);

    Ok(SelectionOutcome {
        questions: picked.into_iter().cloned().collect(),
        report,
    })
}

/// Apportion `total` over `shares` with the largest-remainder method.
///
/// Shares are normalized by their sum first, so a distribution that passes the
/// ±0.01 validation tolerance still yields targets summing exactly to `total`.
pub(crate) fn largest_remainder_apportion(total: usize, shares: &[f64]) -> Vec<usize> {
    if shares.is_empty() || total == 0 {
        return vec![0; shares.len()];
    }
    let sum: f64 = shares.iter().sum();
    if sum <= 0.0 {
        return vec![0; shares.len()];
    }

    let exact: Vec<f64> = shares.iter().map(|s| total as f64 * s / sum).collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();
    let mut leftover = total.saturating_sub(assigned);

    // Leftover slots go to the largest fractional remainders, index order
    // breaking ties.
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for index in order {
        if leftover == 0 {
            break;
        }
        counts[index] += 1;
        leftover -= 1;
    }
    counts
}

struct Stratum<'a> {
    difficulty: Difficulty,
    question_type: Option<QuestionType>,
    fraction: f64,
    pool: Vec<&'a Question>,
    pool_size: usize,
    target: usize,
    selected: Vec<&'a Question>,
}

fn build_strata<'a>(
    request: &SelectionRequest,
    eligible: &[&'a Question],
    pinned: &HashSet<&str>,
) -> Vec<Stratum<'a>> {
    let free: Vec<&Question> = eligible
        .iter()
        .copied()
        .filter(|q| !pinned.contains(q.category.as_str()))
        .collect();

    let mut strata = Vec::new();
    match &request.type_distribution {
        Some(types) => {
            for (&difficulty, &d_fraction) in &request.difficulty_distribution {
                for (&question_type, &t_fraction) in types {
                    let pool: Vec<&Question> = free
                        .iter()
                        .copied()
                        .filter(|q| {
                            q.difficulty == difficulty && q.question_type == question_type
                        })
                        .collect();
                    strata.push(Stratum {
                        difficulty,
                        question_type: Some(question_type),
                        fraction: d_fraction * t_fraction,
                        pool_size: pool.len(),
                        pool,
                        target: 0,
                        selected: Vec::new(),
                    });
                }
            }
        }
        None => {
            for (&difficulty, &fraction) in &request.difficulty_distribution {
                let pool: Vec<&Question> = free
                    .iter()
                    .copied()
                    .filter(|q| q.difficulty == difficulty)
                    .collect();
                strata.push(Stratum {
                    difficulty,
                    question_type: None,
                    fraction,
                    pool_size: pool.len(),
                    pool,
                    target: 0,
                    selected: Vec::new(),
                });
            }
        }
    }
    strata
}

fn apply_targets(strata: &mut [Stratum<'_>], total: usize) {
    let fractions: Vec<f64> = strata.iter().map(|s| s.fraction).collect();
    let targets = largest_remainder_apportion(total, &fractions);
    for (stratum, target) in strata.iter_mut().zip(targets) {
        stratum.target = target;
    }
}

/// Move unmet targets onto strata that still have supply, proportionally to
/// how much supply each has left. Returns how many picks moved.
fn redistribute_shortfall<F>(
    rng: &mut SmallRng,
    strata: &mut [Stratum<'_>],
    shortfall: usize,
    weigh: F,
) -> usize
where
    F: Fn(&Question) -> f64,
{
    if shortfall == 0 {
        return 0;
    }

    let capacities: Vec<usize> = strata.iter().map(|s| s.pool.len()).collect();
    let total_capacity: usize = capacities.iter().sum();
    let moving = shortfall.min(total_capacity);
    if moving == 0 {
        return 0;
    }

    let shares: Vec<f64> = capacities.iter().map(|&c| c as f64).collect();
    let mut extra = largest_remainder_apportion(moving, &shares);

    // Cap at per-stratum capacity, then round-robin any overflow into
    // whatever capacity remains.
    let mut overflow = 0usize;
    for (allocation, &capacity) in extra.iter_mut().zip(&capacities) {
        if *allocation > capacity {
            overflow += *allocation - capacity;
            *allocation = capacity;
        }
    }
    while overflow > 0 {
        let mut progressed = false;
        for (allocation, &capacity) in extra.iter_mut().zip(&capacities) {
            if overflow == 0 {
                break;
            }
            if *allocation < capacity {
                *allocation += 1;
                overflow -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let mut moved = 0usize;
    for (stratum, allocation) in strata.iter_mut().zip(extra) {
        if allocation == 0 {
            continue;
        }
        let chosen = sample_weighted(rng, &mut stratum.pool, allocation, &weigh);
        moved += chosen.len();
        stratum.selected.extend(chosen);
    }
    moved
}

/// Weighted sampling without replacement via repeated cumulative scan.
fn sample_weighted<'a, F>(
    rng: &mut SmallRng,
    candidates: &mut Vec<&'a Question>,
    count: usize,
    weigh: F,
) -> Vec<&'a Question>
where
    F: Fn(&Question) -> f64,
{
    let mut picked = Vec::with_capacity(count.min(candidates.len()));
    while picked.len() < count && !candidates.is_empty() {
        let weights: Vec<f64> = candidates.iter().map(|q| weigh(q)).collect();
        let total: f64 = weights.iter().sum();
        let index = if total > 0.0 {
            let mut r = rng.random::<f64>() * total;
            let mut chosen = candidates.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                r -= w;
                if r <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.random_range(0..candidates.len())
        };
        picked.push(candidates.swap_remove(index));
    }
    picked
}

struct CategoryWeights<'a> {
    by_category: HashMap<&'a str, f64>,
}

impl<'a> CategoryWeights<'a> {
    fn from_request(request: &'a SelectionRequest) -> Self {
        let by_category = request
            .category_quotas
            .iter()
            .map(|q| (q.category.as_str(), q.weight))
            .collect();
        Self { by_category }
    }

    fn weight_for(&self, question: &Question, prioritize_new: bool) -> f64 {
        let mut weight = if prioritize_new {
            1.0 / (1.0 + question.times_used as f64)
        } else {
            1.0
        };
        if let Some(multiplier) = self.by_category.get(question.category.as_str()) {
            weight *= multiplier;
        }
        weight
    }
}
