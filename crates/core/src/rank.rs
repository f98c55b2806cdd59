//! Ranked retrieval: fuses semantic similarity, recency, and co-access
//! history into one ordered candidate list.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::activity::Activity;
use crate::config::{EngineConfig, RankWeights};
use crate::embed::cosine_similarity;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::store::Store;
use crate::types::{FileRecord, RankFactors, Recommendation};

/// Floor for the ANN candidate pool; the pool is `max(4k, ANN_POOL_FLOOR)`.
const ANN_POOL_FLOOR: usize = 32;

pub struct Ranker {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    activity: Arc<Activity>,
    weights: RankWeights,
    modified_decay_days: f64,
    accessed_decay_days: f64,
}

impl Ranker {
    pub fn new(
        store: Arc<Store>,
        index: Arc<VectorIndex>,
        activity: Arc<Activity>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            index,
            activity,
            weights: config.weights,
            modified_decay_days: config.modified_decay_days,
            accessed_decay_days: config.accessed_decay_days,
        }
    }

    /// Recommend up to `k` files for the query path, evaluated at `now`.
    ///
    /// The query access is logged before the candidate set is assembled, so
    /// this call feeds future co-occurrence but never surfaces the query file
    /// in its own results. A tombstoned or unembedded query still ranks on
    /// recency and co-access alone.
    pub fn recommend(&self, path: &str, k: usize, now: DateTime<Utc>) -> Result<Vec<Recommendation>> {
        let k = k.clamp(1, 100);
        let query = self
            .store
            .get_file_by_path(path)?
            .ok_or_else(|| Error::NotFound(format!("path not indexed: {path}")))?;

        self.activity.log_id(query.id, now)?;

        // Candidate pool: ANN neighbors of the query embedding plus every
        // historical co-access partner.
        let query_embedding =
            if query.tombstoned { None } else { self.store.get_embedding(query.id)? };

        let mut semantic_by_id: HashMap<i64, f64> = HashMap::new();
        if let Some(embedding) = &query_embedding {
            self.index.ensure_current(&self.store)?;
            let pool = (4 * k).max(ANN_POOL_FLOOR);
            for (id, score) in self.index.query(embedding, pool) {
                semantic_by_id.insert(id, score as f64);
            }
        }

        let mut candidate_ids: Vec<i64> = semantic_by_id.keys().copied().collect();
        let copartners = self.store.copartners(query.id)?;
        let co_by_id: HashMap<i64, u32> = copartners.iter().copied().collect();
        for (id, _) in &copartners {
            if !semantic_by_id.contains_key(id) {
                candidate_ids.push(*id);
            }
        }

        let mut scored: Vec<(FileRecord, RankFactors, f64)> = Vec::new();
        for id in candidate_ids {
            if id == query.id {
                continue;
            }
            let Some(file) = self.store.get_file_by_id(id)? else { continue };
            if file.tombstoned {
                continue;
            }

            let semantic = match semantic_by_id.get(&id) {
                Some(s) => s.clamp(0.0, 1.0),
                None => self.on_demand_similarity(query_embedding.as_deref(), id)?,
            };
            let recency = self.recency_score(&file, now)?;
            let cooccurrence = co_score(co_by_id.get(&id).copied().unwrap_or(0));
            let final_score = self.weights.semantic * semantic
                + self.weights.recency * recency
                + self.weights.cooccurrence * cooccurrence;

            scored.push((file, RankFactors { semantic, recency, cooccurrence }, final_score));
        }

        // Deterministic order: final desc, then semantic desc, recency desc,
        // and ascending id as the last resort.
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.1.semantic
                        .partial_cmp(&a.1.semantic)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    b.1.recency.partial_cmp(&a.1.recency).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(k);

        debug!(query = path, candidates = scored.len(), "Recommendation ready");
        Ok(scored
            .into_iter()
            .map(|(file, factors, final_score)| Recommendation {
                path: file.path,
                final_score,
                factors,
                weights: self.weights,
            })
            .collect())
    }

    /// Cosine between the query embedding and a candidate's stored embedding,
    /// clamped to [0, 1]; 0 when either side has no embedding.
    fn on_demand_similarity(&self, query: Option<&[f32]>, candidate: i64) -> Result<f64> {
        let Some(query) = query else { return Ok(0.0) };
        match self.store.get_embedding(candidate)? {
            Some(emb) => Ok((cosine_similarity(query, &emb) as f64).clamp(0.0, 1.0)),
            None => Ok(0.0),
        }
    }

    /// `0.4·exp(−Δ_mod/Dm) + 0.6·exp(−Δ_acc/Da)` over fractional days,
    /// clamped to [0, 1]. A file with no activity record contributes nothing
    /// through the access term.
    fn recency_score(&self, file: &FileRecord, now: DateTime<Utc>) -> Result<f64> {
        let mod_days = age_days(file.mtime, now);
        let mut score = 0.4 * (-mod_days / self.modified_decay_days).exp();
        if let Some(activity) = self.store.get_activity(file.id)? {
            let acc_days = age_days(activity.last_accessed, now);
            score += 0.6 * (-acc_days / self.accessed_decay_days).exp();
        }
        Ok(score.clamp(0.0, 1.0))
    }
}

/// Fractional days elapsed from `then` to `now`, clamped non-negative.
fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = now.timestamp_millis().saturating_sub(then.timestamp_millis());
    (ms.max(0) as f64) / 86_400_000.0
}

/// Squashed co-occurrence score `2/(1+exp(−n/5)) − 1`, range [0, 1).
fn co_score(n: u32) -> f64 {
    2.0 / (1.0 + (-(n as f64) / 5.0).exp()) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn co_score_matches_reference_points() {
        assert_eq!(co_score(0), 0.0);
        assert!((co_score(5) - 0.462).abs() < 0.005);
        assert!((co_score(10) - 0.762).abs() < 0.005);
        assert!(co_score(1000) < 1.0);
    }

    #[test]
    fn co_score_is_strictly_increasing() {
        for n in 0..50 {
            assert!(co_score(n + 1) > co_score(n));
        }
    }

    #[test]
    fn age_days_is_fractional_and_clamped() {
        let now = Utc::now();
        let half_day = now - Duration::hours(12);
        assert!((age_days(half_day, now) - 0.5).abs() < 1e-6);
        // Future timestamps clamp to zero age rather than boosting the score.
        assert_eq!(age_days(now + Duration::hours(5), now), 0.0);
    }
}
