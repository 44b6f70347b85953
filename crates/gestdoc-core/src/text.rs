//! Text heuristics shared by the lexical store and the engine.
//!
//! Everything here assumes Italian documentation: the stopword list, the
//! chars-per-token estimate and the sentence splitter are tuned for it.

use regex::Regex;
use std::sync::OnceLock;

/// Italian stopwords dropped from queries and from the lexical analyzer.
pub const ITALIAN_STOPWORDS: &[&str] = &[
    "a", "ad", "al", "alla", "alle", "allo", "ai", "agli", "anche", "che", "chi", "ci", "come",
    "con", "cosa", "da", "dal", "dalla", "dalle", "dai", "degli", "dei", "del", "della", "delle",
    "dello", "di", "dove", "e", "ed", "gli", "ha", "hanno", "i", "il", "in", "io", "la", "le",
    "lo", "ma", "mi", "ne", "nel", "nella", "nelle", "nei", "non", "o", "per", "perché", "più",
    "quale", "quali", "quando", "quanto", "questo", "questa", "se", "si", "sono", "su", "sul",
    "sulla", "tra", "fra", "un", "una", "uno", "va", "viene", "è",
];

const CHARS_PER_TOKEN: f32 = 4.0;

pub fn is_stopword(word: &str) -> bool { ITALIAN_STOPWORDS.contains(&word) }

/// Rough token count for Italian text: one token every four characters.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn estimate_tokens(text: &str) -> usize {
    ((text.chars().count() as f32 / CHARS_PER_TOKEN) as usize).max(1)
}

/// Collapse whitespace so re-wrapped text hashes identically.
pub fn normalize_for_hash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word tokens, lowercased, keeping letters (accented included) and digits.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Lowercased terms of length ≥ 3 that are not stopwords, deduplicated in order.
pub fn significant_terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for w in words(text) {
        if w.chars().count() < 3 || is_stopword(&w) { continue; }
        if !out.contains(&w) { out.push(w); }
    }
    out
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(\s+|$)").expect("valid sentence pattern"))
}

/// Split into sentences, keeping the closing punctuation. Fragments shorter
/// than ten characters are dropped as noise (list bullets, stray numbers).
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for m in sentence_end().find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if sentence.chars().count() > 10 { out.push(sentence.to_string()); }
        start = m.end();
    }
    let tail = text[start..].trim();
    if tail.chars().count() > 10 { out.push(tail.to_string()); }
    out
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Leading sentences of `text` that fit in `max_tokens`.
///
/// Always returns at least something: if even the first sentence is over
/// budget it is cut at the character limit.
pub fn extractive_summary(text: &str, max_tokens: usize) -> String {
    let mut summary = String::new();
    for sentence in split_sentences(text) {
        let candidate = if summary.is_empty() { sentence.clone() } else { format!("{summary} {sentence}") };
        if estimate_tokens(&candidate) > max_tokens { break; }
        summary = candidate;
    }
    if summary.is_empty() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let max_chars = (max_tokens as f32 * CHARS_PER_TOKEN) as usize;
        summary = truncate_chars(text.trim(), max_chars).trim_end().to_string();
    }
    summary
}
