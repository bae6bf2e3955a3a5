// Transfer-stop candidate extraction from a GTFS feed.
//
// Candidates are stops served by rail-like routes, optionally widened by
// station name patterns. One row per distinct stop name, sorted by name.

use gtfs_structures::RouteType;
use itertools::Itertools;
use parkride::models::Candidate;
use std::collections::HashSet;

/// Heavy-rail flavored route types, standard and extended ranges.
pub const RAIL_ROUTE_TYPES: [i16; 11] = [2, 100, 101, 102, 103, 105, 106, 107, 109, 400, 401];

#[derive(Clone, Debug)]
pub struct CandidateFilter {
    pub route_types: Vec<i16>,
    /// Case-insensitive substrings matched against stop names.
    pub name_patterns: Vec<String>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            route_types: RAIL_ROUTE_TYPES.to_vec(),
            name_patterns: Vec::new(),
        }
    }
}

pub fn route_type_to_int(input: &RouteType) -> i16 {
    match input {
        RouteType::Tramway => 0,
        RouteType::Subway => 1,
        RouteType::Rail => 2,
        RouteType::Bus => 3,
        RouteType::Ferry => 4,
        RouteType::CableCar => 5,
        RouteType::Gondola => 6,
        RouteType::Funicular => 7,
        RouteType::Coach => 200,
        RouteType::Air => 1100,
        RouteType::Taxi => 1500,
        RouteType::Other(i) => *i,
    }
}

/// Pull candidate stops out of a loaded feed.
/// Returns the candidates plus the count of stops skipped for missing
/// coordinates.
pub fn extract_candidates(
    gtfs: &gtfs_structures::Gtfs,
    filter: &CandidateFilter,
) -> (Vec<Candidate>, usize) {
    // Stop ids touched by at least one matching route.
    let mut rail_served: HashSet<&str> = HashSet::new();
    for trip in gtfs.trips.values() {
        let Some(route) = gtfs.routes.get(&trip.route_id) else {
            continue;
        };
        if !filter.route_types.contains(&route_type_to_int(&route.route_type)) {
            continue;
        }
        for stop_time in &trip.stop_times {
            rail_served.insert(stop_time.stop.id.as_str());
        }
    }

    let mut skipped = 0;
    let mut candidates: Vec<Candidate> = Vec::new();
    for stop in gtfs.stops.values() {
        let name = stop.name.clone().unwrap_or_default();
        let name_matches = filter
            .name_patterns
            .iter()
            .any(|p| name.to_lowercase().contains(&p.to_lowercase()));
        if !rail_served.contains(stop.id.as_str()) && !name_matches {
            continue;
        }
        let (Some(lat), Some(lon)) = (stop.latitude, stop.longitude) else {
            skipped += 1;
            tracing::warn!(stop = %stop.id, "skipping candidate without coordinates");
            continue;
        };
        candidates.push(Candidate {
            stop_id: stop.id.clone(),
            name,
            lat,
            lon,
        });
    }

    // One candidate per distinct stop name, alphabetical, first id wins.
    let candidates = candidates
        .into_iter()
        .sorted_by(|a, b| a.name.cmp(&b.name).then_with(|| a.stop_id.cmp(&b.stop_id)))
        .unique_by(|c| c.name.clone())
        .collect();

    (candidates, skipped)
}
