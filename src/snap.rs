// Snapping transfer points onto the street/rail graph.
//
// Each representative stop is matched to its nearest edge through the
// adjacency of its closest nodes; if the perpendicular distance is inside
// the acceptance threshold the edge is split and a new routable node is
// spliced in at the stop's position. Stops with no edge in range are
// reported and left alone; the batch never fails on them.

use crate::geometry::{lat_lng_to_web_merc, point_segment_distance};
use crate::models::Candidate;
use crate::street_graph::{EdgeId, NodeId, StreetGraph};
use ahash::AHashSet;
use geo::Point;
use ordered_float::OrderedFloat;

/// A stop farther than this from every edge is not snapped, meters.
pub const SNAP_DISTANCE_THRESHOLD_M: f64 = 100.0;

/// How many closest graph nodes seed the candidate edge search.
pub const DEFAULT_CLOSEST_NODE_COUNT: usize = 20;

#[derive(Clone, Copy, Debug)]
pub struct SnapConfig {
    pub threshold_m: f64,
    pub closest_node_count: usize,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            threshold_m: SNAP_DISTANCE_THRESHOLD_M,
            closest_node_count: DEFAULT_CLOSEST_NODE_COUNT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapResult {
    pub stop_id: String,
    /// The node spliced into the graph at the stop's position.
    pub new_node: NodeId,
    /// The edge that was split (no longer present in the graph).
    pub split_edge: EdgeId,
    /// Replacement edges: prefix (from -> new node), suffix (new node -> to).
    pub replacements: (EdgeId, EdgeId),
    /// Projection of the stop onto the split segment.
    pub projection: [f64; 2],
    /// Perpendicular distance from the stop to the split edge, meters.
    pub distance_m: f64,
    /// Sub-segment of the edge polyline the split happened on.
    pub segment_index: usize,
}

/// Batch outcome; counters are explicit, nothing is ambient.
#[derive(Debug, Default)]
pub struct SnapOutcome {
    pub results: Vec<SnapResult>,
    pub snapped: usize,
    /// Stop ids with no edge within the acceptance threshold.
    pub unmatched: Vec<String>,
}

/// The `k` nodes closest to `stop`, ascending by planar distance.
///
/// Keeps a bounded candidate list: append while under capacity, then evict
/// the current maximum whenever a strictly closer node shows up, and sort
/// once at the end. Exact top-k without sorting on every step. Nodes are
/// scanned in ascending id order so equal distances resolve the same way on
/// every run.
pub fn find_closest_nodes(stop: Point, graph: &StreetGraph, k: usize) -> Vec<NodeId> {
    if k == 0 {
        return Vec::new();
    }

    let mut closest: Vec<(NodeId, f64)> = Vec::with_capacity(k);
    for id in graph.sorted_node_ids() {
        let node = match graph.node(id) {
            Some(n) => n,
            None => continue,
        };
        let d = distance_to(stop, node.pos);
        if closest.len() < k {
            closest.push((id, d));
        } else {
            let (max_index, &(_, max_d)) = closest
                .iter()
                .enumerate()
                .max_by_key(|(_, (_, d))| OrderedFloat(*d))
                .expect("candidate list is non-empty");
            if d < max_d {
                closest.remove(max_index);
                closest.push((id, d));
            }
        }
    }

    closest.sort_by_key(|&(_, d)| OrderedFloat(d));
    closest.into_iter().map(|(id, _)| id).collect()
}

/// Index of the polyline sub-segment closest to the stop; ties resolve to
/// the lowest index. None when the polyline has fewer than two points.
pub fn closest_segment(polyline: &[[f64; 2]], stop: Point) -> Option<usize> {
    closest_segment_with_distance(polyline, stop).map(|(index, _)| index)
}

fn closest_segment_with_distance(polyline: &[[f64; 2]], stop: Point) -> Option<(usize, f64)> {
    if polyline.len() < 2 {
        return None;
    }
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (index, pair) in polyline.windows(2).enumerate() {
        let d = point_segment_distance(stop, pair[0], pair[1]);
        if d < best_d {
            best_d = d;
            best = index;
        }
    }
    Some((best, best_d))
}

fn distance_to(stop: Point, pos: [f64; 2]) -> f64 {
    let dx = stop.x() - pos[0];
    let dy = stop.y() - pos[1];
    (dx * dx + dy * dy).sqrt()
}

/// Project the stop onto one segment, clamped to the segment ends.
fn project_on_segment(stop: Point, a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [stop.x() - a[0], stop.y() - a[1]];
    let len2 = ab[0] * ab[0] + ab[1] * ab[1];
    if len2 == 0.0 {
        return a;
    }
    let t = ((ap[0] * ab[0] + ap[1] * ab[1]) / len2).clamp(0.0, 1.0);
    [a[0] + t * ab[0], a[1] + t * ab[1]]
}

/// Nearest candidate edge around the stop's closest nodes:
/// (edge id, sub-segment index, distance). Edge ids are visited in
/// ascending order, so distance ties keep the lowest id.
fn nearest_candidate_edge(
    stop: Point,
    graph: &StreetGraph,
    closest_nodes: &[NodeId],
) -> Option<(EdgeId, usize, f64)> {
    let mut seen: AHashSet<EdgeId> = AHashSet::new();
    for &node in closest_nodes {
        seen.extend(graph.incident_edges(node));
    }
    let mut candidate_edges: Vec<EdgeId> = seen.into_iter().collect();
    candidate_edges.sort_unstable();

    let mut best: Option<(EdgeId, usize, f64)> = None;
    for edge_id in candidate_edges {
        let Some(edge) = graph.edge(edge_id) else {
            continue;
        };
        if let Some((segment, d)) = closest_segment_with_distance(&edge.geometry, stop) {
            if best.is_none_or(|(_, _, best_d)| d < best_d) {
                best = Some((edge_id, segment, d));
            }
        }
    }
    best
}

/// Snap one stop (planar coordinates) onto the graph.
///
/// Returns None (with the graph untouched) when no edge lies strictly
/// inside the acceptance threshold. Otherwise the nearest edge is replaced
/// by two edges meeting at a new node placed at the stop's position: the
/// prefix keeps the polyline up to and including the split segment's start,
/// the suffix carries the rest, and together they partition the original
/// coordinates.
pub fn snap_stop(
    stop_id: &str,
    stop: Point,
    graph: &mut StreetGraph,
    config: &SnapConfig,
) -> Option<SnapResult> {
    let closest = find_closest_nodes(stop, graph, config.closest_node_count);
    let Some((edge_id, segment_index, distance_m)) = nearest_candidate_edge(stop, graph, &closest)
    else {
        tracing::info!(stop = stop_id, "no candidate edge found, stop left unsnapped");
        return None;
    };

    if distance_m >= config.threshold_m {
        tracing::info!(
            stop = stop_id,
            distance_m,
            "nearest edge beyond acceptance threshold, stop left unsnapped"
        );
        return None;
    }

    let edge = graph.remove_edge(edge_id)?;
    let projection = project_on_segment(
        stop,
        edge.geometry[segment_index],
        edge.geometry[segment_index + 1],
    );

    let stop_pos = [stop.x(), stop.y()];
    let new_node = graph.add_node(stop_pos);

    let mut prefix: Vec<[f64; 2]> = edge.geometry[..=segment_index].to_vec();
    prefix.push(stop_pos);
    let mut suffix: Vec<[f64; 2]> = vec![stop_pos];
    suffix.extend_from_slice(&edge.geometry[segment_index + 1..]);

    // Both halves have >= 2 points by construction (segment_index is in
    // 0..len-1), so these inserts cannot fail.
    let before = graph
        .add_edge(edge.from, new_node, prefix)
        .expect("prefix geometry is valid");
    let after = graph
        .add_edge(new_node, edge.to, suffix)
        .expect("suffix geometry is valid");

    Some(SnapResult {
        stop_id: stop_id.to_string(),
        new_node,
        split_edge: edge_id,
        replacements: (before, after),
        projection,
        distance_m,
        segment_index,
    })
}

/// Snap a batch of candidates (geographic coordinates, projected here).
/// The graph is exclusively owned for the duration of the run.
pub fn snap_all(candidates: &[Candidate], graph: &mut StreetGraph, config: &SnapConfig) -> SnapOutcome {
    let mut outcome = SnapOutcome::default();
    for candidate in candidates {
        let (x, y) = lat_lng_to_web_merc(candidate.lon, candidate.lat);
        match snap_stop(&candidate.stop_id, Point::new(x, y), graph, config) {
            Some(result) => {
                outcome.snapped += 1;
                outcome.results.push(result);
            }
            None => outcome.unmatched.push(candidate.stop_id.clone()),
        }
    }
    tracing::info!(
        snapped = outcome.snapped,
        unmatched = outcome.unmatched.len(),
        "snapping batch finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::web_merc_to_lat_lng;

    fn graph_with_nodes(positions: &[[f64; 2]]) -> StreetGraph {
        let mut graph = StreetGraph::new();
        for &pos in positions {
            graph.add_node(pos);
        }
        graph
    }

    #[test]
    fn test_find_closest_nodes_matches_brute_force() {
        let positions: Vec<[f64; 2]> = (0..20)
            .map(|i| [(i * 37 % 100) as f64, (i * 61 % 100) as f64])
            .collect();
        let graph = graph_with_nodes(&positions);
        let stop = Point::new(42.0, 17.0);

        for k in [1, 3, 5, 20, 50] {
            let got = find_closest_nodes(stop, &graph, k);
            assert_eq!(got.len(), k.min(positions.len()));

            let mut expected: Vec<(NodeId, f64)> = positions
                .iter()
                .enumerate()
                .map(|(i, &pos)| (i as NodeId, distance_to(stop, pos)))
                .collect();
            expected.sort_by_key(|&(_, d)| OrderedFloat(d));
            let expected: Vec<NodeId> =
                expected.into_iter().take(k).map(|(id, _)| id).collect();
            assert_eq!(got, expected);

            // Ascending by distance.
            let dists: Vec<f64> = got
                .iter()
                .map(|&id| distance_to(stop, graph.node(id).unwrap().pos))
                .collect();
            assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_closest_segment_picks_minimum_and_breaks_ties_low() {
        let polyline = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0]];
        // Clearly on the first segment
        assert_eq!(closest_segment(&polyline, Point::new(50.0, 5.0)), Some(0));
        // Clearly on the second segment
        assert_eq!(closest_segment(&polyline, Point::new(95.0, 60.0)), Some(1));
        // Equidistant from both segments of a straight polyline
        let straight = [[0.0, 0.0], [100.0, 0.0], [200.0, 0.0]];
        assert_eq!(closest_segment(&straight, Point::new(100.0, 10.0)), Some(0));
        // Degenerate input
        assert_eq!(closest_segment(&[[0.0, 0.0]], Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_snap_splits_edge_at_middle_segment() {
        let mut graph = StreetGraph::new();
        let a = graph.add_node([0.0, 0.0]);
        let b = graph.add_node([100.0, 100.0]);
        let edge = graph
            .add_edge(a, b, vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0]])
            .unwrap();

        let stop = Point::new(90.0, 50.0);
        let result = snap_stop("s1", stop, &mut graph, &SnapConfig::default())
            .expect("stop should snap");

        assert_eq!(result.split_edge, edge);
        assert_eq!(result.segment_index, 1);
        assert!((result.distance_m - 10.0).abs() < 1e-9);
        assert_eq!(result.projection, [100.0, 50.0]);

        // Old edge replaced by exactly two edges through the new node.
        assert!(graph.edge(edge).is_none());
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node_count(), 3);

        let new_node = graph.node(result.new_node).unwrap();
        assert_eq!(new_node.pos, [90.0, 50.0]);

        let (before, after) = result.replacements;
        let before = graph.edge(before).unwrap();
        let after = graph.edge(after).unwrap();
        assert_eq!(before.from, a);
        assert_eq!(before.to, result.new_node);
        assert_eq!(after.from, result.new_node);
        assert_eq!(after.to, b);

        // Direction and coordinate partition are preserved.
        assert_eq!(before.geometry, vec![[0.0, 0.0], [100.0, 0.0], [90.0, 50.0]]);
        assert_eq!(after.geometry, vec![[90.0, 50.0], [100.0, 100.0]]);

        // Adjacency got rewired.
        assert_eq!(graph.node(a).unwrap().out_edges.len(), 1);
        assert_eq!(graph.node(b).unwrap().in_edges.len(), 1);
        assert_eq!(graph.incident_edges(result.new_node).len(), 2);
    }

    #[test]
    fn test_stop_beyond_threshold_is_reported_not_snapped() {
        let mut graph = StreetGraph::new();
        let a = graph.add_node([0.0, 0.0]);
        let b = graph.add_node([100.0, 0.0]);
        graph
            .add_edge(a, b, vec![[0.0, 0.0], [100.0, 0.0]])
            .unwrap();

        let result = snap_stop(
            "far",
            Point::new(50.0, 500.0),
            &mut graph,
            &SnapConfig::default(),
        );
        assert!(result.is_none());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut graph = StreetGraph::new();
        let a = graph.add_node([0.0, 0.0]);
        let b = graph.add_node([100.0, 0.0]);
        graph
            .add_edge(a, b, vec![[0.0, 0.0], [100.0, 0.0]])
            .unwrap();

        // Exactly at the threshold: not snapped.
        let result = snap_stop(
            "edge-case",
            Point::new(50.0, 100.0),
            &mut graph,
            &SnapConfig::default(),
        );
        assert!(result.is_none());

        let result = snap_stop(
            "inside",
            Point::new(50.0, 99.9),
            &mut graph,
            &SnapConfig::default(),
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_empty_graph_is_not_fatal() {
        let mut graph = StreetGraph::new();
        let result = snap_stop(
            "lonely",
            Point::new(0.0, 0.0),
            &mut graph,
            &SnapConfig::default(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_snap_all_counts_and_mutates() {
        // A short edge in planar space; candidates arrive geographic.
        let (x0, y0) = lat_lng_to_web_merc(16.60, 49.19);
        let mut graph = StreetGraph::new();
        let a = graph.add_node([x0, y0]);
        let b = graph.add_node([x0 + 400.0, y0]);
        graph
            .add_edge(a, b, vec![[x0, y0], [x0 + 400.0, y0]])
            .unwrap();

        let (near_lon, near_lat) = web_merc_to_lat_lng(x0 + 200.0, y0 + 30.0);
        let (far_lon, far_lat) = web_merc_to_lat_lng(x0 + 200.0, y0 + 5_000.0);
        let candidates = vec![
            Candidate {
                stop_id: "near".to_string(),
                name: "Near".to_string(),
                lat: near_lat,
                lon: near_lon,
            },
            Candidate {
                stop_id: "far".to_string(),
                name: "Far".to_string(),
                lat: far_lat,
                lon: far_lon,
            },
        ];

        let outcome = snap_all(&candidates, &mut graph, &SnapConfig::default());
        assert_eq!(outcome.snapped, 1);
        assert_eq!(outcome.unmatched, vec!["far".to_string()]);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
    }
}
