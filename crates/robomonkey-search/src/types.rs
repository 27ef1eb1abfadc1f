//! Search input and output types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use robomonkey_store::EntityType;

/// Filters narrowing a hybrid search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Keep only entities whose file path starts with this prefix
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Keep only entities from files in this language
    #[serde(default)]
    pub language: Option<String>,

    /// Entity types to search; empty means chunk + document + symbol
    #[serde(default)]
    pub entity_types: Vec<EntityType>,

    /// Keep entities carrying at least one of these tags
    #[serde(default)]
    pub tags_any: Vec<String>,

    /// Keep entities carrying all of these tags
    #[serde(default)]
    pub tags_all: Vec<String>,
}

impl SearchFilters {
    /// The entity types to query, defaulting to the searchable three
    pub fn effective_entity_types(&self) -> Vec<EntityType> {
        if self.entity_types.is_empty() {
            vec![EntityType::Chunk, EntityType::Document, EntityType::Symbol]
        } else {
            self.entity_types.clone()
        }
    }

    /// All tag names referenced by the tag filters, lowercased
    pub fn filter_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags_any
            .iter()
            .chain(self.tags_all.iter())
            .map(|t| t.to_lowercase())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

/// One candidate from a single ranking source, pre-fusion
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    /// Raw source score: cosine similarity for vector, ts_rank_cd for FTS
    pub score: f32,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub content: String,
}

/// A deduplicated candidate carrying both sources' evidence
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub vec_score: Option<f32>,
    pub vec_rank: Option<usize>,
    pub fts_score: Option<f32>,
    pub fts_rank: Option<usize>,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub content: String,
    pub tags: Vec<String>,
}

impl Candidate {
    pub fn from_vector(raw: RawCandidate, rank: usize) -> Self {
        Self {
            entity_type: raw.entity_type,
            entity_id: raw.entity_id,
            vec_score: Some(raw.score),
            vec_rank: Some(rank),
            fts_score: None,
            fts_rank: None,
            file_path: raw.file_path,
            language: raw.language,
            start_line: raw.start_line,
            end_line: raw.end_line,
            content: raw.content,
            tags: Vec::new(),
        }
    }

    pub fn from_fts(raw: RawCandidate, rank: usize) -> Self {
        Self {
            entity_type: raw.entity_type,
            entity_id: raw.entity_id,
            vec_score: None,
            vec_rank: None,
            fts_score: Some(raw.score),
            fts_rank: Some(rank),
            file_path: raw.file_path,
            language: raw.language,
            start_line: raw.start_line,
            end_line: raw.end_line,
            content: raw.content,
            tags: Vec::new(),
        }
    }

    /// Merge the FTS evidence of `other` into this vector candidate
    pub fn absorb(&mut self, other: &Candidate) {
        if self.vec_score.is_none() {
            self.vec_score = other.vec_score;
            self.vec_rank = other.vec_rank;
        }
        if self.fts_score.is_none() {
            self.fts_score = other.fts_score;
            self.fts_rank = other.fts_rank;
        }
    }
}

/// A fused, explainable search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub file_path: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub content: String,
    pub final_score: f64,
    pub vec_rank: Option<usize>,
    pub vec_score: Option<f32>,
    pub fts_rank: Option<usize>,
    pub fts_score: Option<f32>,
    pub matched_tags: Vec<String>,
    pub why: String,
}
