//! Context query engine - ranked retrieval under a size budget

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tiller_core::{
    ContentHash, ContextLayer, ContextPiece, ContextSnapshot, EngineConfig, RelevantContext, Task,
    TillerResult,
};

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_\-]+").expect("static word pattern compiles"));

/// Lowercased word tokens of a text. Keys split on their separators,
/// so `dep:oauth2` matches a query for `oauth2`.
fn tokenize(text: &str) -> BTreeSet<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// The searchable text of a piece: its key plus its rendered value.
fn piece_text(piece: &ContextPiece) -> String {
    format!("{} {}", piece.key, piece.value)
}

/// Fraction of `query` tokens found in `target`.
fn overlap_score(query: &BTreeSet<String>, target: &BTreeSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.intersection(target).count();
    hits as f32 / query.len() as f32
}

/// Query engine over immutable context snapshots. Pure reads, safe to
/// run concurrently with the mutation pipeline.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> TillerResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Keyword search over the given layers, ranked by match score with
    /// recency breaking ties, returning at most `limit` pieces.
    pub fn search(
        &self,
        snapshot: &ContextSnapshot,
        query: &str,
        layers: &[ContextLayer],
        limit: usize,
    ) -> Vec<ContextPiece> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<(f32, &ContextPiece)> = layers
            .iter()
            .flat_map(|layer| snapshot.pieces(*layer))
            .filter_map(|piece| {
                let score = overlap_score(&query_tokens, &tokenize(&piece_text(piece)));
                (score > 0.0).then_some((score, piece))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.recorded_at.cmp(&a.1.recorded_at))
        });

        scored
            .into_iter()
            .take(limit)
            .map(|(_, piece)| piece.clone())
            .collect()
    }

    /// Select the context most relevant to a task under a size budget.
    ///
    /// Per-piece score is `direct_relevance + recency_boost -
    /// redundancy_penalty`, floored at 0; selection is greedy
    /// highest-score-first until `max_size` is consumed.
    pub fn relevant_context(
        &self,
        snapshot: &ContextSnapshot,
        task: &Task,
        max_size: i64,
    ) -> RelevantContext {
        let task_tokens = tokenize(&task_text(task));
        let duplicates = duplicate_counts(snapshot);
        let now = chrono::Utc::now();
        let half_life = self.config.recency_half_life.as_secs_f64().max(1.0);

        let mut scored: Vec<(f32, &ContextPiece)> = snapshot
            .all_pieces()
            .filter_map(|piece| {
                let direct = overlap_score(&task_tokens, &tokenize(&piece_text(piece)));
                let age = (now - piece.recorded_at).num_seconds().max(0) as f64;
                let recency = 0.5f64.powf(age / half_life) as f32 * 0.5;
                let redundancy = self.config.redundancy_penalty_weight
                    * duplicates
                        .get(&piece.content_hash)
                        .map(|n| n.saturating_sub(1))
                        .unwrap_or(0) as f32;
                let score = (direct + recency - redundancy).max(0.0);
                (score > 0.0).then_some((score, piece))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.recorded_at.cmp(&a.1.recorded_at))
        });

        let mut selected = RelevantContext::default();
        for (_, piece) in scored {
            if selected.total_size + piece.size > max_size {
                continue;
            }
            selected.total_size += piece.size;
            selected
                .by_layer
                .entry(piece.layer)
                .or_default()
                .push(piece.clone());
        }
        selected
    }
}

/// Task text used for direct-relevance matching: description plus
/// rendered parameters.
fn task_text(task: &Task) -> String {
    let mut text = task.description.clone();
    for (key, value) in &task.parameters {
        text.push(' ');
        text.push_str(key);
        text.push(' ');
        text.push_str(&value.to_string());
    }
    text
}

/// How many pieces share each content hash across the snapshot.
fn duplicate_counts(snapshot: &ContextSnapshot) -> HashMap<ContentHash, usize> {
    let mut counts: HashMap<ContentHash, usize> = HashMap::new();
    for piece in snapshot.all_pieces() {
        *counts.entry(piece.content_hash).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tiller_core::{ContextUpdateKind, Task};

    fn engine() -> QueryEngine {
        QueryEngine::new(EngineConfig::default_session()).unwrap()
    }

    fn snapshot_with(pieces: Vec<ContextPiece>) -> ContextSnapshot {
        let mut snapshot = tiller_core::ContextSnapshot::empty();
        for p in pieces {
            snapshot.layers.entry(p.layer).or_default().push(p);
        }
        snapshot.recompute_total_size();
        snapshot
    }

    fn piece(layer: ContextLayer, key: &str, value: &str) -> ContextPiece {
        ContextPiece::new(
            layer,
            key,
            serde_json::json!(value),
            ContextUpdateKind::FactAsserted,
        )
    }

    #[test]
    fn test_search_filters_by_layer() {
        let snapshot = snapshot_with(vec![
            piece(ContextLayer::Technical, "dep:oauth2", "oauth2 4.0 added"),
            piece(ContextLayer::Project, "decision:auth", "use oauth2"),
        ]);
        let results = engine().search(&snapshot, "oauth2", &[ContextLayer::Technical], 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].layer, ContextLayer::Technical);
    }

    #[test]
    fn test_search_respects_limit() {
        let pieces = (0..10)
            .map(|i| {
                piece(
                    ContextLayer::Technical,
                    &format!("file:{}", i),
                    "touched auth module",
                )
            })
            .collect();
        let snapshot = snapshot_with(pieces);
        let results = engine().search(&snapshot, "auth", &[ContextLayer::Technical], 3);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_breaks_ties_by_recency() {
        let older = piece(ContextLayer::Project, "decision:1", "auth approach chosen")
            .with_recorded_at(Utc::now() - Duration::seconds(300));
        let newer = piece(ContextLayer::Project, "decision:2", "auth approach revised");
        let snapshot = snapshot_with(vec![older, newer]);

        let results = engine().search(&snapshot, "auth approach", &[ContextLayer::Project], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "decision:2");
    }

    #[test]
    fn test_search_no_match_returns_empty() {
        let snapshot = snapshot_with(vec![piece(
            ContextLayer::Technical,
            "dep:serde",
            "serde 1.0",
        )]);
        assert!(engine()
            .search(&snapshot, "kubernetes", &ContextLayer::ALL, 10)
            .is_empty());
    }

    #[test]
    fn test_relevant_context_respects_budget() {
        let pieces = (0..20)
            .map(|i| {
                piece(
                    ContextLayer::Technical,
                    &format!("fact:{}", i),
                    "authentication middleware detail with some longer content",
                )
            })
            .collect();
        let snapshot = snapshot_with(pieces);
        let task = Task::new("implement authentication middleware");

        let selected = engine().relevant_context(&snapshot, &task, 100);
        assert!(selected.total_size <= 100);
        assert!(selected.piece_count() > 0);
    }

    #[test]
    fn test_relevant_context_prefers_matching_pieces() {
        let matching = piece(
            ContextLayer::Technical,
            "fact:auth",
            "authentication uses oauth2 middleware",
        );
        let unrelated = piece(
            ContextLayer::Technical,
            "fact:css",
            "stylesheet grid layout notes",
        )
        .with_recorded_at(Utc::now() - Duration::days(2));
        let snapshot = snapshot_with(vec![matching, unrelated]);
        let task = Task::new("implement oauth2 authentication middleware");

        let selected = engine().relevant_context(&snapshot, &task, 10_000);
        let technical = selected
            .by_layer
            .get(&ContextLayer::Technical)
            .expect("technical layer selected");
        assert_eq!(technical[0].key, "fact:auth");
    }

    #[test]
    fn test_relevant_context_penalizes_redundant_copies() {
        // Three identical values under different keys: the duplicate
        // penalty should knock repeated content out entirely.
        let pieces = (0..3)
            .map(|i| {
                piece(
                    ContextLayer::Project,
                    &format!("copy:{}", i),
                    "identical convention note",
                )
                .with_recorded_at(Utc::now() - Duration::days(7))
            })
            .collect();
        let snapshot = snapshot_with(pieces);
        let task = Task::new("unrelated work");

        let selected = engine().relevant_context(&snapshot, &task, 10_000);
        assert_eq!(selected.piece_count(), 0);
    }

    #[test]
    fn test_relevant_context_partitioned_by_layer() {
        let snapshot = snapshot_with(vec![
            piece(ContextLayer::Technical, "dep:oauth2", "oauth2 dependency"),
            piece(ContextLayer::Conversational, "ask:auth", "user asked for oauth2"),
        ]);
        let task = Task::new("wire oauth2 flow");

        let selected = engine().relevant_context(&snapshot, &task, 10_000);
        assert!(selected.by_layer.contains_key(&ContextLayer::Technical));
        assert!(selected.by_layer.contains_key(&ContextLayer::Conversational));
    }
}
