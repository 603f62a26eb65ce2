use std::collections::HashMap;

use crate::pipeline::SearchHit;

/// Weighted-score merge across modality result lists.
///
/// Each hit's score is multiplied by its modality weight; a hit surfacing in
/// more than one list keeps its best weighted score. The merged list is
/// sorted descending and truncated to `top_k`.
pub fn fuse_modalities(modalities: Vec<(f32, Vec<SearchHit>)>, top_k: usize) -> Vec<SearchHit> {
    let mut best: HashMap<String, SearchHit> = HashMap::new();

    for (weight, hits) in modalities {
        for mut hit in hits {
            hit.score *= weight;
            match best.get(&hit.id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(hit.id.clone(), hit);
                }
            }
        }
    }

    let mut fused: Vec<SearchHit> = best.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(top_k);
    fused
}
