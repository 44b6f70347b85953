//! Token-budgeted context assembly.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use gestdoc_core::text::{estimate_tokens, extractive_summary};
use gestdoc_core::types::{Candidate, ContextItem, Fragment, FragmentId, HierarchyLevel, ItemKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub items: Vec<ContextItem>,
    pub truncated: bool,
    pub tokens_used: usize,
}

/// Short form of a parent: its precomputed summary, or leading sentences.
pub fn parent_summary(parent: &Fragment, summary_max_tokens: usize) -> String {
    match parent.summary.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => extractive_summary(&parent.text, summary_max_tokens),
    }
}

fn item(candidate: Candidate, kind: ItemKind, content: String) -> ContextItem {
    let tokens = estimate_tokens(&content);
    ContextItem { candidate, kind, content, tokens }
}

/// Walk candidates in order, emitting each (preceded by its parent's summary
/// the first time a child of that parent appears) while the running total
/// stays within `token_budget`. Stops at the first unit that does not fit.
pub fn assemble(candidates: Vec<Candidate>, parents: &HashMap<FragmentId, Fragment>, token_budget: usize, summary_max_tokens: usize) -> Assembly {
    let mut items = Vec::new();
    let mut seen: HashSet<FragmentId> = HashSet::new();
    let mut used = 0usize;
    let mut truncated = false;

    for candidate in candidates {
        if seen.contains(candidate.id()) {
            debug!(id = candidate.id(), "parent already in context, skipped");
            continue;
        }
        let mut unit = Vec::with_capacity(2);
        if candidate.fragment.level == HierarchyLevel::Child {
            if let Some(parent) = candidate.fragment.parent_id.as_ref().filter(|p| !seen.contains(*p)).and_then(|p| parents.get(p)) {
                unit.push(item(Candidate::new(parent.clone()), ItemKind::ParentSummary, parent_summary(parent, summary_max_tokens)));
            }
        }
        let content = candidate.fragment.text.clone();
        unit.push(item(candidate, ItemKind::Fragment, content));

        let cost: usize = unit.iter().map(|i| i.tokens).sum();
        if used + cost > token_budget {
            truncated = true;
            break;
        }
        used += cost;
        for i in unit {
            seen.insert(i.candidate.fragment.id.clone());
            items.push(i);
        }
    }
    debug!(items = items.len(), tokens = used, truncated, "assembled");
    Assembly { items, truncated, tokens_used: used }
}
