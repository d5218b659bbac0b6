//! Greedy single-pass grouping of unmatched faces.
//!
//! Each embedding joins the open cluster with the smallest *mean* distance
//! to all of that cluster's current members, provided the mean is below
//! the threshold; otherwise it opens a new cluster. Averaging over every
//! member keeps one outlier from dragging unrelated faces in.

use crate::config::ClusterSettings;
use facesort_core::Embedding;
use std::collections::BTreeMap;

/// Cluster label -> keys of the files whose faces belong to it.
pub type ClusterAssignment<K> = BTreeMap<String, Vec<K>>;

/// Clusters under construction. Threaded through the fold explicitly, so
/// there is no shared counter and the engine is reentrant.
#[derive(Debug)]
pub struct ClusterAccumulator<K> {
    clusters: Vec<Vec<(K, Embedding)>>,
    threshold: f32,
}

impl<K> ClusterAccumulator<K> {
    pub fn new(threshold: f32) -> Self {
        Self {
            clusters: Vec::new(),
            threshold,
        }
    }

    /// Place one embedding.
    pub fn push(mut self, key: K, embedding: Embedding) -> Self {
        let best = self
            .clusters
            .iter()
            .enumerate()
            .map(|(i, members)| (i, mean_distance(&embedding, members)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((i, distance)) if distance < self.threshold => self.clusters[i].push((key, embedding)),
            _ => self.clusters.push(vec![(key, embedding)]),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl<K: Ord> ClusterAccumulator<K> {
    /// Drop clusters below `min_size` faces and label the rest by
    /// descending size: `<prefix>_1` is the largest. Ties keep creation order.
    pub fn finish(self, min_size: usize, prefix: &str) -> ClusterAssignment<K> {
        let mut clusters = self.clusters;
        clusters.sort_by(|a, b| b.len().cmp(&a.len()));

        clusters
            .into_iter()
            .filter(|members| members.len() >= min_size.max(1))
            .enumerate()
            .map(|(i, members)| {
                let mut keys: Vec<K> = members.into_iter().map(|(key, _)| key).collect();
                keys.sort();
                keys.dedup();
                (format!("{prefix}_{}", i + 1), keys)
            })
            .collect()
    }
}

fn mean_distance<K>(probe: &Embedding, members: &[(K, Embedding)]) -> f32 {
    if members.is_empty() {
        return f32::INFINITY;
    }
    let total: f32 = members.iter().map(|(_, e)| probe.euclidean_distance(e)).sum();
    total / members.len() as f32
}

/// Cluster `(key, embedding)` pairs in input order.
pub fn cluster_unmatched<K: Ord>(
    items: impl IntoIterator<Item = (K, Embedding)>,
    settings: &ClusterSettings,
    prefix: &str,
) -> ClusterAssignment<K> {
    items
        .into_iter()
        .fold(ClusterAccumulator::new(settings.threshold), |acc, (key, embedding)| {
            acc.push(key, embedding)
        })
        .finish(settings.min_size, prefix)
}
