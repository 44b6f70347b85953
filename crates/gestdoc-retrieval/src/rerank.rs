use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, warn};

use gestdoc_core::config::RetrievalSettings;
use gestdoc_core::error::Error;
use gestdoc_core::text::truncate_chars;
use gestdoc_core::traits::RerankModel;
use gestdoc_core::types::{Candidate, Fragment};

/// Passage handed to the cross-encoder: title plus the start of the body.
pub fn pair_text(fragment: &Fragment, max_chars: usize) -> String {
    let full = if fragment.title.is_empty() { fragment.text.clone() } else { format!("{}. {}", fragment.title, fragment.text) };
    truncate_chars(&full, max_chars).to_string()
}

/// One finite score per candidate, or the reranker output is unusable.
pub fn validate_scores(scores: &[f32], expected: usize) -> Result<(), Error> {
    if scores.len() != expected {
        return Err(Error::RerankUnavailable(format!("model returned {} scores for {expected} candidates", scores.len())));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(Error::RerankUnavailable(format!("non-finite score {bad}")));
    }
    Ok(())
}

/// Attach scores and reorder: rerank desc, fused desc, id asc.
pub fn apply_scores(candidates: Vec<Candidate>, scores: &[f32]) -> Result<Vec<Candidate>, Error> {
    validate_scores(scores, candidates.len())?;
    Ok(order_by_scores(candidates, scores))
}

fn order_by_scores(mut candidates: Vec<Candidate>, scores: &[f32]) -> Vec<Candidate> {
    for (c, s) in candidates.iter_mut().zip(scores) { c.rerank_score = Some(*s); }
    candidates.sort_by(|a, b| {
        let (ra, rb) = (a.rerank_score.unwrap_or(f32::MIN), b.rerank_score.unwrap_or(f32::MIN));
        rb.total_cmp(&ra).then_with(|| b.boosted_score().total_cmp(&a.boosted_score())).then_with(|| a.id().cmp(b.id()))
    });
    candidates
}

/// Rerank with the cross-encoder. Returns the list and whether scores were
/// applied; any model failure or timeout leaves fusion order untouched.
pub async fn rerank(model: Option<&Arc<dyn RerankModel>>, query: &str, candidates: Vec<Candidate>, settings: &RetrievalSettings) -> (Vec<Candidate>, bool) {
    let Some(model) = model else { return (candidates, false) };
    if candidates.len() <= 1 { return (candidates, false); }

    let texts: Vec<String> = candidates.iter().map(|c| pair_text(&c.fragment, settings.rerank_max_chars)).collect();
    let model = Arc::clone(model);
    let query = query.to_string();
    let budget = settings.rerank_timeout();
    let scored = timeout(budget, tokio::task::spawn_blocking(move || model.score(&query, &texts))).await;

    let outcome = match scored {
        Ok(Ok(Ok(scores))) => validate_scores(&scores, candidates.len()).map(|()| scores),
        Ok(Ok(Err(e))) => Err(Error::RerankUnavailable(format!("{e:#}"))),
        Ok(Err(join)) => Err(Error::RerankUnavailable(join.to_string())),
        Err(_) => Err(Error::RerankUnavailable(format!("timed out after {} ms", budget.as_millis()))),
    };
    match outcome {
        Ok(scores) => {
            let reranked = order_by_scores(candidates, &scores);
            debug!(candidates = reranked.len(), "reranked");
            (reranked, true)
        }
        Err(e) => {
            warn!(error = %e, "keeping fusion order");
            (candidates, false)
        }
    }
}
