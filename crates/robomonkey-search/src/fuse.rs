//! Score fusion
//!
//! Pure functions from candidates to ranked results: filter, min-max
//! normalize per source, tag boost, weighted fusion, deterministic
//! tie-break, cut. Keeping this free of I/O is what makes the ranking a
//! pure function of the stored data.

use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{Candidate, SearchFilters, SearchHit};
use robomonkey_store::EntityType;

/// Fusion weights: vector similarity dominates, lexical rank supports,
/// tags nudge.
pub const VEC_WEIGHT: f64 = 0.55;
pub const FTS_WEIGHT: f64 = 0.35;
pub const TAG_WEIGHT: f64 = 0.10;

/// Per-matched-tag boost increment, capped at 1.0
pub const TAG_BOOST_STEP: f64 = 0.25;

/// Union candidates from both sources, deduplicating by
/// `(entity_type, entity_id)`.
pub fn merge_candidates(
    vector: Vec<Candidate>,
    fts: Vec<Candidate>,
) -> Vec<Candidate> {
    let mut merged: HashMap<(EntityType, Uuid), Candidate> = HashMap::new();

    for candidate in vector.into_iter().chain(fts) {
        let key = (candidate.entity_type, candidate.entity_id);
        match merged.get_mut(&key) {
            Some(existing) => existing.absorb(&candidate),
            None => {
                merged.insert(key, candidate);
            }
        }
    }

    merged.into_values().collect()
}

/// Drop candidates violating the filters.
pub fn apply_filters(candidates: Vec<Candidate>, filters: &SearchFilters) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            if let Some(prefix) = &filters.path_prefix {
                match &c.file_path {
                    Some(path) if path.starts_with(prefix.as_str()) => {}
                    _ => return false,
                }
            }
            if let Some(language) = &filters.language {
                match &c.language {
                    Some(l) if l == language => {}
                    _ => return false,
                }
            }
            if !filters.tags_any.is_empty()
                && !filters
                    .tags_any
                    .iter()
                    .any(|t| c.tags.contains(&t.to_lowercase()))
            {
                return false;
            }
            if !filters.tags_all.is_empty()
                && !filters
                    .tags_all
                    .iter()
                    .all(|t| c.tags.contains(&t.to_lowercase()))
            {
                return false;
            }
            true
        })
        .collect()
}

/// Min-max normalization over the retained union for one source.
///
/// With fewer than two surviving candidates from a source, its normalized
/// score is 1.0 for that source's matches and 0 elsewhere.
fn normalize(scores: &[Option<f32>]) -> Vec<f64> {
    let present: Vec<f32> = scores.iter().filter_map(|s| *s).collect();

    if present.len() < 2 {
        return scores
            .iter()
            .map(|s| if s.is_some() { 1.0 } else { 0.0 })
            .collect();
    }

    let min = present.iter().copied().fold(f32::INFINITY, f32::min);
    let max = present.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scores
        .iter()
        .map(|s| match s {
            None => 0.0,
            Some(_) if range <= f32::EPSILON => 1.0,
            Some(v) => f64::from((v - min) / range),
        })
        .collect()
}

/// Fuse filtered candidates into ranked hits, cut to `top_k`.
pub fn fuse(candidates: Vec<Candidate>, filters: &SearchFilters, top_k: usize) -> Vec<SearchHit> {
    let filter_tags = filters.filter_tags();

    let vec_norms = normalize(&candidates.iter().map(|c| c.vec_score).collect::<Vec<_>>());
    let fts_norms = normalize(&candidates.iter().map(|c| c.fts_score).collect::<Vec<_>>());

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .zip(vec_norms.into_iter().zip(fts_norms))
        .map(|(candidate, (vec_norm, fts_norm))| {
            let matched_tags: Vec<String> = filter_tags
                .iter()
                .filter(|t| candidate.tags.contains(t))
                .cloned()
                .collect();
            let tag_boost = (TAG_BOOST_STEP * matched_tags.len() as f64).min(1.0);

            let final_score =
                VEC_WEIGHT * vec_norm + FTS_WEIGHT * fts_norm + TAG_WEIGHT * tag_boost;

            let why = why_string(&candidate, vec_norm, fts_norm, &matched_tags);

            SearchHit {
                entity_type: candidate.entity_type,
                entity_id: candidate.entity_id,
                file_path: candidate.file_path,
                start_line: candidate.start_line,
                end_line: candidate.end_line,
                content: candidate.content,
                final_score,
                vec_rank: candidate.vec_rank,
                vec_score: candidate.vec_score,
                fts_rank: candidate.fts_rank,
                fts_score: candidate.fts_score,
                matched_tags,
                why,
            }
        })
        .collect();

    // Total order: score desc, then vec rank, fts rank, entity type,
    // entity id. Identical input always produces identical output.
    hits.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_key(a.vec_rank).cmp(&rank_key(b.vec_rank)))
            .then_with(|| rank_key(a.fts_rank).cmp(&rank_key(b.fts_rank)))
            .then_with(|| a.entity_type.cmp(&b.entity_type))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    hits.truncate(top_k);
    hits
}

fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

fn why_string(
    candidate: &Candidate,
    vec_norm: f64,
    fts_norm: f64,
    matched_tags: &[String],
) -> String {
    let mut parts = Vec::new();
    if let (Some(rank), Some(score)) = (candidate.vec_rank, candidate.vec_score) {
        parts.push(format!("vector #{} ({score:.3}, norm {vec_norm:.2})", rank + 1));
    }
    if let (Some(rank), Some(score)) = (candidate.fts_rank, candidate.fts_score) {
        parts.push(format!("fts #{} ({score:.3}, norm {fts_norm:.2})", rank + 1));
    }
    if !matched_tags.is_empty() {
        parts.push(format!("tags [{}]", matched_tags.join(", ")));
    }
    parts.join(" + ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawCandidate;

    fn raw(entity_type: EntityType, score: f32, path: &str) -> RawCandidate {
        RawCandidate {
            entity_type,
            entity_id: Uuid::new_v4(),
            score,
            file_path: Some(path.to_string()),
            language: Some("python".to_string()),
            start_line: Some(1),
            end_line: Some(10),
            content: "content".to_string(),
        }
    }

    #[test]
    fn test_vector_only_pair_normalizes_to_spec_scores() {
        // Two candidates returned only by vector search with raw scores
        // 0.9 and 0.8: after min-max the first is 1.0, the second 0.0,
        // fused finals 0.55 and 0.00.
        let a = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.py"), 0);
        let b = Candidate::from_vector(raw(EntityType::Chunk, 0.8, "b.py"), 1);

        let hits = fuse(vec![a, b], &SearchFilters::default(), 10);

        assert_eq!(hits.len(), 2);
        assert!((hits[0].final_score - 0.55).abs() < 1e-9);
        assert!((hits[1].final_score - 0.0).abs() < 1e-9);
        assert_eq!(hits[0].vec_rank, Some(0));
    }

    #[test]
    fn test_single_source_candidate_falls_back_to_full_norm() {
        // One surviving vector candidate: normalized 1.0 for it
        let only = Candidate::from_vector(raw(EntityType::Chunk, 0.42, "a.py"), 0);
        let hits = fuse(vec![only], &SearchFilters::default(), 10);

        assert_eq!(hits.len(), 1);
        assert!((hits[0].final_score - VEC_WEIGHT).abs() < 1e-9);
    }

    #[test]
    fn test_merge_dedupes_across_sources() {
        let id = Uuid::new_v4();
        let mut vector_raw = raw(EntityType::Chunk, 0.9, "a.py");
        vector_raw.entity_id = id;
        let mut fts_raw = raw(EntityType::Chunk, 3.2, "a.py");
        fts_raw.entity_id = id;

        let merged = merge_candidates(
            vec![Candidate::from_vector(vector_raw, 0)],
            vec![Candidate::from_fts(fts_raw, 0)],
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].vec_rank, Some(0));
        assert_eq!(merged[0].fts_rank, Some(0));
    }

    #[test]
    fn test_disjoint_sources_union_size_is_sum() {
        let vector: Vec<Candidate> = (0..3)
            .map(|i| Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.py"), i))
            .collect();
        let fts: Vec<Candidate> = (0..4)
            .map(|i| Candidate::from_fts(raw(EntityType::Document, 1.0, "b.md"), i))
            .collect();

        let merged = merge_candidates(vector, fts);
        assert_eq!(merged.len(), 7);
    }

    #[test]
    fn test_path_prefix_filter() {
        let keep = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "src/db/x.py"), 0);
        let drop = Candidate::from_vector(raw(EntityType::Chunk, 0.8, "lib/y.py"), 1);

        let filters = SearchFilters {
            path_prefix: Some("src/".to_string()),
            ..SearchFilters::default()
        };
        let retained = apply_filters(vec![keep, drop], &filters);

        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].file_path.as_deref(), Some("src/db/x.py"));
    }

    #[test]
    fn test_language_filter() {
        let mut rust = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.rs"), 0);
        rust.language = Some("rust".to_string());
        let python = Candidate::from_vector(raw(EntityType::Chunk, 0.8, "b.py"), 1);

        let filters = SearchFilters {
            language: Some("rust".to_string()),
            ..SearchFilters::default()
        };
        let retained = apply_filters(vec![rust, python], &filters);

        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_tags_any_and_tags_all_semantics() {
        let mut tagged = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.py"), 0);
        tagged.tags = vec!["database".to_string(), "auth".to_string()];
        let mut partial = Candidate::from_vector(raw(EntityType::Chunk, 0.8, "b.py"), 1);
        partial.tags = vec!["database".to_string()];
        let untagged = Candidate::from_vector(raw(EntityType::Chunk, 0.7, "c.py"), 2);

        let any = SearchFilters {
            tags_any: vec!["auth".to_string(), "database".to_string()],
            ..SearchFilters::default()
        };
        assert_eq!(
            apply_filters(vec![tagged.clone(), partial.clone(), untagged.clone()], &any).len(),
            2
        );

        let all = SearchFilters {
            tags_all: vec!["auth".to_string(), "database".to_string()],
            ..SearchFilters::default()
        };
        assert_eq!(
            apply_filters(vec![tagged, partial, untagged], &all).len(),
            1
        );
    }

    #[test]
    fn test_tag_boost_caps_at_one() {
        let mut candidate = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.py"), 0);
        candidate.tags = (0..6).map(|i| format!("t{i}")).collect();

        let filters = SearchFilters {
            tags_any: (0..6).map(|i| format!("t{i}")).collect(),
            ..SearchFilters::default()
        };
        let hits = fuse(vec![candidate], &filters, 10);

        // boost = min(1.0, 0.25 * 6) = 1.0; single vector candidate norms to 1.0
        let expected = VEC_WEIGHT + TAG_WEIGHT;
        assert!((hits[0].final_score - expected).abs() < 1e-9);
        assert_eq!(hits[0].matched_tags.len(), 6);
    }

    #[test]
    fn test_tie_break_is_deterministic_across_types() {
        // Same scores, different entity types: chunk sorts before document
        let chunk = Candidate::from_vector(raw(EntityType::Chunk, 0.9, "a.py"), 0);
        let mut document = Candidate::from_vector(raw(EntityType::Document, 0.9, "b.md"), 0);
        document.vec_rank = Some(0);

        let first = fuse(
            vec![chunk.clone(), document.clone()],
            &SearchFilters::default(),
            10,
        );
        let second = fuse(vec![document, chunk], &SearchFilters::default(), 10);

        assert_eq!(first[0].entity_type, EntityType::Chunk);
        assert_eq!(second[0].entity_type, EntityType::Chunk);
        assert_eq!(first[0].entity_id, second[0].entity_id);
    }

    #[test]
    fn test_top_k_cut() {
        let candidates: Vec<Candidate> = (0..30)
            .map(|i| {
                Candidate::from_vector(raw(EntityType::Chunk, 1.0 - i as f32 * 0.01, "a.py"), i)
            })
            .collect();
        let hits = fuse(candidates, &SearchFilters::default(), 12);
        assert_eq!(hits.len(), 12);
        // Sorted by fused score descending
        for pair in hits.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }

    #[test]
    fn test_why_string_names_sources() {
        let id = Uuid::new_v4();
        let mut vector_raw = raw(EntityType::Chunk, 0.91, "a.py");
        vector_raw.entity_id = id;
        let mut fts_raw = raw(EntityType::Chunk, 2.5, "a.py");
        fts_raw.entity_id = id;

        let merged = merge_candidates(
            vec![Candidate::from_vector(vector_raw, 0)],
            vec![Candidate::from_fts(fts_raw, 2)],
        );
        let hits = fuse(merged, &SearchFilters::default(), 10);

        assert!(hits[0].why.contains("vector #1"));
        assert!(hits[0].why.contains("fts #3"));
    }
}
