//! Section-capped selection over the reranked list.

use std::collections::HashMap;

use tracing::debug;

use gestdoc_core::types::{Candidate, QueryFeatures};

/// Knobs of one diversification pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityParams {
    pub max_per_section: usize,
    pub k_final: usize,
    pub anchor_bonus: f64,
}

fn raw_rank_score(c: &Candidate) -> f64 { c.rerank_score.map_or_else(|| c.boosted_score(), f64::from) }

/// True when the candidate's title or text contains one of the query's anchors.
pub fn is_anchored(c: &Candidate, features: &QueryFeatures) -> bool {
    if features.anchors.is_empty() { return false; }
    let haystack = format!("{}\n{}", c.fragment.title, c.fragment.text).to_lowercase();
    features.anchors.iter().any(|a| haystack.contains(&a.to_lowercase()))
}

/// Re-sort by normalized rank score plus the anchor bonus. Ties keep their
/// previous relative order.
pub fn rank_with_anchors(candidates: Vec<Candidate>, features: &QueryFeatures, anchor_bonus: f64) -> Vec<Candidate> {
    let raw: Vec<f64> = candidates.iter().map(raw_rank_score).collect();
    let (lo, hi) = raw.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    let span = hi - lo;
    let mut scored: Vec<(f64, Candidate)> = candidates.into_iter().zip(raw).map(|(c, s)| {
        let norm = if span > 0.0 { (s - lo) / span } else { 1.0 };
        let bonus = if is_anchored(&c, features) { anchor_bonus } else { 0.0 };
        (norm + bonus, c)
    }).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

/// Greedy walk capping each section at `max_per_section`, then backfilling
/// skipped candidates in rank order while fewer than `k_final` are selected.
pub fn diversify(candidates: Vec<Candidate>, features: &QueryFeatures, params: DiversityParams) -> Vec<Candidate> {
    let ranked = rank_with_anchors(candidates, features, params.anchor_bonus);
    let mut selected = vec![false; ranked.len()];
    let mut per_section: HashMap<String, usize> = HashMap::new();
    let mut taken = 0usize;
    for (i, c) in ranked.iter().enumerate() {
        if taken == params.k_final { break; }
        let count = per_section.entry(c.fragment.section_key()).or_insert(0);
        if *count < params.max_per_section {
            *count += 1;
            selected[i] = true;
            taken += 1;
        }
    }
    let mut backfilled = 0usize;
    for flag in &mut selected {
        if taken == params.k_final { break; }
        if !*flag { *flag = true; taken += 1; backfilled += 1; }
    }
    debug!(selected = taken, backfilled, "diversified");
    ranked.into_iter().zip(selected).filter_map(|(c, keep)| keep.then_some(c)).collect()
}
