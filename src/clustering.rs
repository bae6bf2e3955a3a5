// Candidate-set reduction for transfer stops.
//
// The full candidate set is far too dense to hand to the trip planner, so we
// cluster it and keep one representative stop per cluster. Two partitioning
// families are supported behind one strategy switch: k-medoids (PAM-style,
// representatives are input points by construction) and k-means (Lloyd,
// representative = input point nearest the final centroid). Runs for the
// candidate cluster counts are scored with the Davies-Bouldin index and the
// best run wins.

use crate::geometry::lat_lng_to_web_merc;
use crate::models::Candidate;
use ahash::AHashMap;
use rayon::prelude::*;

/// Base cluster count; the alternative count is floor(sqrt(n)) + this.
pub const BASE_NUM_CLUSTERS: usize = 15;

const MAX_REFINEMENT_ITERS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterStrategy {
    Medoid,
    Centroid,
}

#[derive(Clone, Copy, Debug)]
pub struct ReducerConfig {
    pub min_k: usize,
    pub strategy: ClusterStrategy,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            min_k: BASE_NUM_CLUSTERS,
            strategy: ClusterStrategy::Medoid,
        }
    }
}

/// One evaluated clustering run.
#[derive(Clone, Debug)]
pub struct ClusterModel {
    /// Requested cluster count for this run.
    pub k: usize,
    /// Medoid coordinates or final centroids, one per cluster.
    pub centers: Vec<[f64; 2]>,
    /// Index into the input candidates of each cluster's representative.
    pub representatives: Vec<usize>,
    /// Candidate index -> cluster index.
    pub labels: Vec<usize>,
    /// Davies-Bouldin index of the partition; lower is better.
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct Reduction {
    pub representatives: Vec<Candidate>,
    /// Every input candidate mapped to its cluster's representative stop id.
    pub assignment: AHashMap<String, String>,
    pub chosen: Option<ClusterModel>,
    pub evaluated: Vec<ClusterModel>,
}

/// Reduce the candidate set to cluster representatives.
///
/// Evaluates `min_k` (capped to the candidate count) and, when it still fits,
/// `floor(sqrt(n)) + min_k`. Runs are deterministic; Davies-Bouldin ties keep
/// the earlier (smaller) count.
pub fn reduce(candidates: &[Candidate], config: &ReducerConfig) -> Reduction {
    let n = candidates.len();
    if n == 0 {
        return Reduction::default();
    }

    let coords: Vec<[f64; 2]> = candidates
        .iter()
        .map(|c| {
            let (x, y) = lat_lng_to_web_merc(c.lon, c.lat);
            [x, y]
        })
        .collect();

    let base = config.min_k.min(n);
    let mut counts = vec![base];
    let alternative = (n as f64).sqrt().floor() as usize + config.min_k;
    if alternative <= n && alternative != base {
        counts.push(alternative);
    }

    let evaluated: Vec<ClusterModel> = counts
        .into_iter()
        .map(|k| fit(&coords, k, config.strategy))
        .collect();

    let mut chosen: Option<&ClusterModel> = None;
    for model in &evaluated {
        if chosen.is_none_or(|best| model.score < best.score) {
            chosen = Some(model);
        }
    }
    let chosen = chosen.cloned();

    let mut representatives = Vec::new();
    let mut assignment = AHashMap::new();
    if let Some(model) = &chosen {
        representatives = model
            .representatives
            .iter()
            .map(|&i| candidates[i].clone())
            .collect::<Vec<_>>();
        for (i, candidate) in candidates.iter().enumerate() {
            let representative = &candidates[model.representatives[model.labels[i]]];
            assignment.insert(candidate.stop_id.clone(), representative.stop_id.clone());
        }
    }

    Reduction {
        representatives,
        assignment,
        chosen,
        evaluated,
    }
}

fn fit(coords: &[[f64; 2]], k: usize, strategy: ClusterStrategy) -> ClusterModel {
    let (centers, representatives, labels) = match strategy {
        ClusterStrategy::Medoid => fit_medoid(coords, k),
        ClusterStrategy::Centroid => fit_centroid(coords, k),
    };
    let score = davies_bouldin(coords, &labels, centers.len());
    ClusterModel {
        k,
        centers,
        representatives,
        labels,
        score,
    }
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// Flat n*n pairwise distance matrix. Pure fan-out, deterministic output.
fn pairwise_distances(coords: &[[f64; 2]]) -> Vec<f64> {
    let n = coords.len();
    let mut diss = vec![0.0_f64; n * n];
    diss.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = distance(coords[i], coords[j]);
        }
    });
    diss
}

// ---------------------------------------------------------------------------
// Medoid strategy (PAM-style: greedy BUILD seeding + alternating refinement)
// ---------------------------------------------------------------------------

fn fit_medoid(coords: &[[f64; 2]], k: usize) -> (Vec<[f64; 2]>, Vec<usize>, Vec<usize>) {
    let n = coords.len();
    let diss = pairwise_distances(coords);
    let mut medoids = pam_build(&diss, n, k);

    let mut labels = assign_to_medoids(&diss, n, &medoids);
    for _ in 0..MAX_REFINEMENT_ITERS {
        let mut changed = false;
        for cluster in 0..medoids.len() {
            let members: Vec<usize> = (0..n).filter(|&i| labels[i] == cluster).collect();
            if members.is_empty() {
                continue;
            }
            // The member minimizing total dissimilarity to the rest of the
            // cluster becomes the new medoid; ties go to the lowest index.
            let mut best = members[0];
            let mut best_cost = f64::INFINITY;
            for &candidate in &members {
                let cost: f64 = members.iter().map(|&m| diss[candidate * n + m]).sum();
                if cost < best_cost {
                    best_cost = cost;
                    best = candidate;
                }
            }
            if medoids[cluster] != best {
                medoids[cluster] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        labels = assign_to_medoids(&diss, n, &medoids);
    }

    let (medoids, labels) = compact_clusters(medoids, labels, n);
    let centers = medoids.iter().map(|&m| coords[m]).collect();
    (centers, medoids, labels)
}

/// Greedy BUILD seeding: start from the point with minimal total distance,
/// then repeatedly add the point yielding the largest drop in assignment cost.
fn pam_build(diss: &[f64], n: usize, k: usize) -> Vec<usize> {
    let k = k.min(n);
    let mut medoids = Vec::with_capacity(k);

    let mut first = 0;
    let mut first_cost = f64::INFINITY;
    for j in 0..n {
        let cost: f64 = (0..n).map(|i| diss[i * n + j]).sum();
        if cost < first_cost {
            first_cost = cost;
            first = j;
        }
    }
    medoids.push(first);

    let mut nearest: Vec<f64> = (0..n).map(|i| diss[i * n + first]).collect();
    while medoids.len() < k {
        let mut best = usize::MAX;
        let mut best_gain = f64::NEG_INFINITY;
        for j in 0..n {
            if medoids.contains(&j) {
                continue;
            }
            let gain: f64 = (0..n)
                .map(|i| (nearest[i] - diss[i * n + j]).max(0.0))
                .sum();
            if gain > best_gain {
                best_gain = gain;
                best = j;
            }
        }
        medoids.push(best);
        for i in 0..n {
            nearest[i] = nearest[i].min(diss[i * n + best]);
        }
    }

    medoids
}

fn assign_to_medoids(diss: &[f64], n: usize, medoids: &[usize]) -> Vec<usize> {
    (0..n)
        .map(|i| {
            let mut label = 0;
            let mut best = f64::INFINITY;
            for (cluster, &m) in medoids.iter().enumerate() {
                let d = diss[i * n + m];
                if d < best {
                    best = d;
                    label = cluster;
                }
            }
            label
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Centroid strategy (Lloyd iteration, deterministic farthest-point seeding)
// ---------------------------------------------------------------------------

fn fit_centroid(coords: &[[f64; 2]], k: usize) -> (Vec<[f64; 2]>, Vec<usize>, Vec<usize>) {
    let n = coords.len();
    let k = k.min(n);

    let seeds = farthest_point_seeds(coords, k);
    let mut centroids: Vec<[f64; 2]> = seeds.iter().map(|&s| coords[s]).collect();
    let mut labels = assign_to_centroids(coords, &centroids);

    for _ in 0..MAX_REFINEMENT_ITERS {
        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let mut sum = [0.0_f64, 0.0];
            let mut count = 0usize;
            for (i, &label) in labels.iter().enumerate() {
                if label == cluster {
                    sum[0] += coords[i][0];
                    sum[1] += coords[i][1];
                    count += 1;
                }
            }
            // An emptied cluster keeps its previous centroid.
            if count > 0 {
                *centroid = [sum[0] / count as f64, sum[1] / count as f64];
            }
        }
        let next = assign_to_centroids(coords, &centroids);
        if next == labels {
            break;
        }
        labels = next;
    }

    let (kept, labels) = compact_centroid_clusters(&centroids, labels, n);
    let centers: Vec<[f64; 2]> = kept.iter().map(|&c| centroids[c]).collect();

    // Representative = the input point nearest its cluster centroid.
    let representatives: Vec<usize> = centers
        .iter()
        .enumerate()
        .map(|(cluster, center)| {
            let mut best = usize::MAX;
            let mut best_d = f64::INFINITY;
            for (i, &label) in labels.iter().enumerate() {
                if label == cluster {
                    let d = distance(coords[i], *center);
                    if d < best_d {
                        best_d = d;
                        best = i;
                    }
                }
            }
            best
        })
        .collect();

    (centers, representatives, labels)
}

fn farthest_point_seeds(coords: &[[f64; 2]], k: usize) -> Vec<usize> {
    let n = coords.len();
    let mean = {
        let mut sum = [0.0_f64, 0.0];
        for c in coords {
            sum[0] += c[0];
            sum[1] += c[1];
        }
        [sum[0] / n as f64, sum[1] / n as f64]
    };

    let mut first = 0;
    let mut first_d = f64::INFINITY;
    for (i, &c) in coords.iter().enumerate() {
        let d = distance(c, mean);
        if d < first_d {
            first_d = d;
            first = i;
        }
    }

    let mut seeds = vec![first];
    let mut nearest: Vec<f64> = coords.iter().map(|&c| distance(c, coords[first])).collect();
    while seeds.len() < k {
        let mut next = 0;
        let mut next_d = f64::NEG_INFINITY;
        for (i, &d) in nearest.iter().enumerate() {
            if d > next_d {
                next_d = d;
                next = i;
            }
        }
        seeds.push(next);
        for (i, slot) in nearest.iter_mut().enumerate() {
            *slot = slot.min(distance(coords[i], coords[next]));
        }
    }
    seeds
}

fn assign_to_centroids(coords: &[[f64; 2]], centroids: &[[f64; 2]]) -> Vec<usize> {
    coords
        .iter()
        .map(|&c| {
            let mut label = 0;
            let mut best = f64::INFINITY;
            for (cluster, &centroid) in centroids.iter().enumerate() {
                let d = distance(c, centroid);
                if d < best {
                    best = d;
                    label = cluster;
                }
            }
            label
        })
        .collect()
}

// Duplicate input points can leave a cluster with no members; drop the empty
// slots and renumber labels so downstream code sees a dense partition.

fn compact_clusters(
    medoids: Vec<usize>,
    labels: Vec<usize>,
    n: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut used = vec![false; medoids.len()];
    for &label in &labels {
        used[label] = true;
    }
    if used.iter().all(|&u| u) {
        return (medoids, labels);
    }
    let mut remap = vec![usize::MAX; medoids.len()];
    let mut kept = Vec::new();
    for (cluster, medoid) in medoids.into_iter().enumerate() {
        if used[cluster] {
            remap[cluster] = kept.len();
            kept.push(medoid);
        }
    }
    let labels = (0..n).map(|i| remap[labels[i]]).collect();
    (kept, labels)
}

fn compact_centroid_clusters(
    centroids: &[[f64; 2]],
    labels: Vec<usize>,
    n: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut used = vec![false; centroids.len()];
    for &label in &labels {
        used[label] = true;
    }
    let mut remap = vec![usize::MAX; centroids.len()];
    let mut kept = Vec::new();
    for (cluster, flag) in used.iter().enumerate() {
        if *flag {
            remap[cluster] = kept.len();
            kept.push(cluster);
        }
    }
    let labels = (0..n).map(|i| remap[labels[i]]).collect();
    (kept, labels)
}

// ---------------------------------------------------------------------------
// Davies-Bouldin index
// ---------------------------------------------------------------------------

/// Davies-Bouldin index of a partition; lower is better. A single cluster
/// scores 0. Coincident cluster centers score infinity, which correctly
/// loses model selection.
pub fn davies_bouldin(coords: &[[f64; 2]], labels: &[usize], k: usize) -> f64 {
    if k <= 1 {
        return 0.0;
    }

    let mut centroids = vec![[0.0_f64; 2]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        centroids[label][0] += coords[i][0];
        centroids[label][1] += coords[i][1];
        counts[label] += 1;
    }
    for (centroid, &count) in centroids.iter_mut().zip(&counts) {
        if count > 0 {
            centroid[0] /= count as f64;
            centroid[1] /= count as f64;
        }
    }

    // Mean distance of each cluster's members to its centroid.
    let mut spread = vec![0.0_f64; k];
    for (i, &label) in labels.iter().enumerate() {
        spread[label] += distance(coords[i], centroids[label]);
    }
    for (s, &count) in spread.iter_mut().zip(&counts) {
        if count > 0 {
            *s /= count as f64;
        }
    }

    let mut total = 0.0;
    for i in 0..k {
        let mut worst = 0.0_f64;
        for j in 0..k {
            if i == j {
                continue;
            }
            let separation = distance(centroids[i], centroids[j]);
            let ratio = if separation > 0.0 {
                (spread[i] + spread[j]) / separation
            } else {
                f64::INFINITY
            };
            worst = worst.max(ratio);
        }
        total += worst;
    }
    total / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: usize, lon: f64, lat: f64) -> Candidate {
        Candidate {
            stop_id: format!("stop{id}"),
            name: format!("Stop {id}"),
            lat,
            lon,
        }
    }

    /// Two tight groups of 20 stops roughly 15 km apart.
    fn two_groups() -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for i in 0..20 {
            let dx = (i % 5) as f64 * 0.0004;
            let dy = (i / 5) as f64 * 0.0004;
            candidates.push(candidate(i, 16.60 + dx, 49.19 + dy));
        }
        for i in 0..20 {
            let dx = (i % 5) as f64 * 0.0004;
            let dy = (i / 5) as f64 * 0.0004;
            candidates.push(candidate(20 + i, 16.78 + dx, 49.30 + dy));
        }
        candidates
    }

    #[test]
    fn test_empty_input_returns_empty_reduction() {
        let reduction = reduce(&[], &ReducerConfig::default());
        assert!(reduction.representatives.is_empty());
        assert!(reduction.assignment.is_empty());
        assert!(reduction.chosen.is_none());
        assert!(reduction.evaluated.is_empty());
    }

    #[test]
    fn test_small_input_caps_base_count() {
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(i, 16.6 + i as f64 * 0.01, 49.2))
            .collect();
        let reduction = reduce(&candidates, &ReducerConfig::default());
        // Only the capped base run: sqrt(5)+15 > 5.
        assert_eq!(reduction.evaluated.len(), 1);
        assert_eq!(reduction.evaluated[0].k, 5);
        assert_eq!(reduction.assignment.len(), 5);
    }

    #[test]
    fn test_two_groups_evaluates_both_counts_and_separates() {
        let candidates = two_groups();
        for strategy in [ClusterStrategy::Medoid, ClusterStrategy::Centroid] {
            let config = ReducerConfig {
                min_k: 15,
                strategy,
            };
            let reduction = reduce(&candidates, &config);

            let ks: Vec<usize> = reduction.evaluated.iter().map(|m| m.k).collect();
            assert_eq!(ks, vec![15, 21]); // floor(sqrt(40)) + 15 = 21

            let chosen = reduction.chosen.as_ref().unwrap();
            for model in &reduction.evaluated {
                assert!(chosen.score <= model.score);
            }

            // No cluster may straddle the two groups (indices < 20 vs >= 20).
            for cluster in 0..chosen.centers.len() {
                let members: Vec<usize> = (0..candidates.len())
                    .filter(|&i| chosen.labels[i] == cluster)
                    .collect();
                assert!(!members.is_empty());
                let in_first = members.iter().filter(|&&i| i < 20).count();
                assert!(in_first == 0 || in_first == members.len());
            }

            // Every representative is an actual input candidate.
            for rep in &reduction.representatives {
                assert!(candidates.iter().any(|c| c.stop_id == rep.stop_id));
            }

            // Assignment is total and stays within the representative set.
            assert_eq!(reduction.assignment.len(), candidates.len());
            for target in reduction.assignment.values() {
                assert!(reduction.representatives.iter().any(|r| &r.stop_id == target));
            }
        }
    }

    #[test]
    fn test_medoid_representatives_belong_to_their_cluster() {
        let candidates = two_groups();
        let config = ReducerConfig {
            min_k: 4,
            strategy: ClusterStrategy::Medoid,
        };
        let reduction = reduce(&candidates, &config);
        let chosen = reduction.chosen.unwrap();
        for (cluster, &rep) in chosen.representatives.iter().enumerate() {
            assert_eq!(chosen.labels[rep], cluster);
        }
    }

    #[test]
    fn test_centroid_representative_is_nearest_member() {
        let candidates = two_groups();
        let config = ReducerConfig {
            min_k: 4,
            strategy: ClusterStrategy::Centroid,
        };
        let reduction = reduce(&candidates, &config);
        let chosen = reduction.chosen.unwrap();

        let coords: Vec<[f64; 2]> = candidates
            .iter()
            .map(|c| {
                let (x, y) = lat_lng_to_web_merc(c.lon, c.lat);
                [x, y]
            })
            .collect();

        for (cluster, &rep) in chosen.representatives.iter().enumerate() {
            let rep_d = distance(coords[rep], chosen.centers[cluster]);
            for (i, &label) in chosen.labels.iter().enumerate() {
                if label == cluster {
                    assert!(distance(coords[i], chosen.centers[cluster]) >= rep_d - 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let candidates = two_groups();
        let config = ReducerConfig::default();
        let first = reduce(&candidates, &config);
        let second = reduce(&candidates, &config);
        let a = first.chosen.unwrap();
        let b = second.chosen.unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.representatives, b.representatives);
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn test_davies_bouldin_rewards_separation() {
        // Two tight groups, correctly vs incorrectly labeled.
        let mut coords = Vec::new();
        for i in 0..10 {
            coords.push([i as f64, 0.0]);
        }
        for i in 0..10 {
            coords.push([10_000.0 + i as f64, 0.0]);
        }
        let good: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let bad: Vec<usize> = (0..20).map(|i| i % 2).collect();
        assert!(davies_bouldin(&coords, &good, 2) < davies_bouldin(&coords, &bad, 2));
    }
}
