// Park-and-ride proximity classification.
//
// A stop becomes a transfer candidate when parking infrastructure sits within
// the distance threshold. All geometry here is expected in Web Mercator
// (meters); callers project before invoking.

use crate::geometry::planar_distance;
use crate::models::{ParkingFacility, Stop, TransferKind, TransferParking};
use geo::{BoundingRect, Point};
use rstar::{AABB, RTree, RTreeObject};

/// Maximum walking distance between a stop and a parking facility, meters.
pub const PARKING_DISTANCE_THRESHOLD_M: f64 = 500.0;

#[derive(Clone, Copy, Debug)]
pub struct ClassifierConfig {
    pub threshold_m: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold_m: PARKING_DISTANCE_THRESHOLD_M,
        }
    }
}

/// Evaluate one stop against the parking layers.
///
/// Returns the facilities strictly closer than `threshold_m`: structures
/// first (as `park_and_ride`), then lots (as `parking_lot`), each in input
/// order. A facility whose geometry has no distance semantics is skipped.
pub fn evaluate(
    stop: &Point,
    structures: &[ParkingFacility],
    lots: &[ParkingFacility],
    threshold_m: f64,
) -> Vec<TransferParking> {
    let mut places_to_park = Vec::new();

    for house in structures {
        if let Some(d) = planar_distance(stop, &house.geometry) {
            if d < threshold_m {
                places_to_park.push(TransferParking {
                    kind: TransferKind::ParkAndRide,
                    parking_id: house.id.clone(),
                });
            }
        }
    }

    for lot in lots {
        if let Some(d) = planar_distance(stop, &lot.geometry) {
            if d < threshold_m {
                places_to_park.push(TransferParking {
                    kind: TransferKind::ParkingLot,
                    parking_id: lot.id.clone(),
                });
            }
        }
    }

    places_to_park
}

/// Batch classification result. Counters are returned explicitly; nothing
/// here is ambient state.
#[derive(Debug)]
pub struct ClassifyOutcome {
    pub stops: Vec<Stop>,
    /// Stops that ended up with at least one association.
    pub flagged: usize,
    /// Facilities dropped for unusable geometry.
    pub skipped_facilities: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FacilityList {
    Structures,
    Lots,
}

struct IndexedFacility {
    list: FacilityList,
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFacility {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn index_facilities(
    facilities: &[ParkingFacility],
    list: FacilityList,
    skipped: &mut usize,
) -> Vec<IndexedFacility> {
    facilities
        .iter()
        .enumerate()
        .filter_map(|(index, facility)| match facility.geometry.bounding_rect() {
            Some(rect) => Some(IndexedFacility {
                list,
                index,
                aabb: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            }),
            None => {
                *skipped += 1;
                tracing::warn!(facility = %facility.id, "skipping facility with unusable geometry");
                None
            }
        })
        .collect()
}

/// Classify every stop against both parking layers.
///
/// An R-tree over facility envelopes, padded by the threshold, prefilters
/// candidates; the exact strictly-less-than check and input-order sorting
/// afterwards make the output identical to calling [`evaluate`] per stop.
pub fn classify_stops(
    mut stops: Vec<Stop>,
    structures: &[ParkingFacility],
    lots: &[ParkingFacility],
    config: &ClassifierConfig,
) -> ClassifyOutcome {
    let mut skipped_facilities = 0;
    let mut indexed = index_facilities(structures, FacilityList::Structures, &mut skipped_facilities);
    indexed.extend(index_facilities(lots, FacilityList::Lots, &mut skipped_facilities));
    let tree = RTree::bulk_load(indexed);

    let mut flagged = 0;

    for stop in &mut stops {
        let (sx, sy) = stop.point.x_y();
        let envelope = AABB::from_corners(
            [sx - config.threshold_m, sy - config.threshold_m],
            [sx + config.threshold_m, sy + config.threshold_m],
        );

        let mut hits: Vec<(FacilityList, usize)> = Vec::new();
        for candidate in tree.locate_in_envelope_intersecting(&envelope) {
            let facility = match candidate.list {
                FacilityList::Structures => &structures[candidate.index],
                FacilityList::Lots => &lots[candidate.index],
            };
            if let Some(d) = planar_distance(&stop.point, &facility.geometry) {
                if d < config.threshold_m {
                    hits.push((candidate.list, candidate.index));
                }
            }
        }

        // Restore the contract ordering: structures before lots, input order
        // within each layer.
        hits.sort();
        stop.transfer_parking = hits
            .into_iter()
            .map(|(list, index)| match list {
                FacilityList::Structures => TransferParking {
                    kind: TransferKind::ParkAndRide,
                    parking_id: structures[index].id.clone(),
                },
                FacilityList::Lots => TransferParking {
                    kind: TransferKind::ParkingLot,
                    parking_id: lots[index].id.clone(),
                },
            })
            .collect();

        if stop.is_transfer() {
            flagged += 1;
        }
    }

    ClassifyOutcome {
        stops,
        flagged,
        skipped_facilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, polygon};

    fn facility(id: &str, kind: crate::models::ParkingKind, x: f64, y: f64) -> ParkingFacility {
        ParkingFacility {
            id: id.to_string(),
            kind,
            geometry: Geometry::Point(Point::new(x, y)),
        }
    }

    fn structure(id: &str, x: f64, y: f64) -> ParkingFacility {
        facility(id, crate::models::ParkingKind::Structure, x, y)
    }

    fn lot(id: &str, x: f64, y: f64) -> ParkingFacility {
        facility(id, crate::models::ParkingKind::Lot, x, y)
    }

    #[test]
    fn test_structure_within_threshold_is_park_and_ride() {
        let stop = Point::new(0.0, 0.0);
        let result = evaluate(&stop, &[structure("ph1", 0.0, 400.0)], &[], 500.0);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, TransferKind::ParkAndRide);
        assert_eq!(result[0].parking_id, "ph1");
    }

    #[test]
    fn test_lot_beyond_threshold_is_excluded() {
        let stop = Point::new(0.0, 0.0);
        let result = evaluate(&stop, &[], &[lot("pl1", 0.0, 600.0)], 500.0);
        assert!(result.is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let stop = Point::new(0.0, 0.0);
        assert!(evaluate(&stop, &[structure("at", 0.0, 500.0)], &[], 500.0).is_empty());
        assert_eq!(
            evaluate(&stop, &[structure("under", 0.0, 499.9)], &[], 500.0).len(),
            1
        );
    }

    #[test]
    fn test_ordering_structures_first_then_input_order() {
        let stop = Point::new(0.0, 0.0);
        let structures = [structure("ph1", 0.0, 450.0), structure("ph2", 0.0, 100.0)];
        let lots = [lot("pl1", 0.0, 300.0), lot("pl2", 0.0, 200.0)];
        let result = evaluate(&stop, &structures, &lots, 500.0);
        let ids: Vec<&str> = result.iter().map(|t| t.parking_id.as_str()).collect();
        // Not sorted by distance: layer order, then input order.
        assert_eq!(ids, vec!["ph1", "ph2", "pl1", "pl2"]);
        assert_eq!(result[0].kind, TransferKind::ParkAndRide);
        assert_eq!(result[2].kind, TransferKind::ParkingLot);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let stop = Point::new(10.0, -20.0);
        let structures = [structure("a", 0.0, 0.0), structure("b", 100.0, 100.0)];
        let lots = [lot("c", -50.0, 30.0)];
        let first = evaluate(&stop, &structures, &lots, 500.0);
        let second = evaluate(&stop, &structures, &lots, 500.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_polygon_lot_distance_to_boundary() {
        let stop = Point::new(0.0, 0.0);
        let square = polygon![
            (x: 300.0, y: -50.0),
            (x: 400.0, y: -50.0),
            (x: 400.0, y: 50.0),
            (x: 300.0, y: 50.0),
        ];
        let lots = [ParkingFacility {
            id: "poly".to_string(),
            kind: crate::models::ParkingKind::Lot,
            geometry: Geometry::Polygon(square),
        }];
        let result = evaluate(&stop, &[], &lots, 500.0);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_malformed_geometry_is_skipped_not_fatal() {
        let stop = Point::new(0.0, 0.0);
        let broken = ParkingFacility {
            id: "broken".to_string(),
            kind: crate::models::ParkingKind::Lot,
            geometry: Geometry::GeometryCollection(geo::GeometryCollection::default()),
        };
        let fine = lot("fine", 0.0, 100.0);
        let result = evaluate(&stop, &[], &[broken.clone(), fine.clone()], 500.0);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].parking_id, "fine");

        let outcome = classify_stops(
            vec![Stop::new("s1".to_string(), "Stop 1".to_string(), stop)],
            &[],
            &[broken, fine],
            &ClassifierConfig::default(),
        );
        assert_eq!(outcome.skipped_facilities, 1);
        assert_eq!(outcome.flagged, 1);
    }

    #[test]
    fn test_batch_matches_per_stop_evaluation() {
        // A little grid of stops against scattered facilities; the R-tree
        // path must agree with the brute-force contract everywhere.
        let structures: Vec<ParkingFacility> = (0..6)
            .map(|i| structure(&format!("ph{i}"), (i as f64) * 350.0, 120.0))
            .collect();
        let lots: Vec<ParkingFacility> = (0..6)
            .map(|i| lot(&format!("pl{i}"), (i as f64) * 350.0, -480.0))
            .collect();

        let stops: Vec<Stop> = (0..10)
            .map(|i| {
                Stop::new(
                    format!("s{i}"),
                    format!("Stop {i}"),
                    Point::new((i as f64) * 210.0, 0.0),
                )
            })
            .collect();

        let config = ClassifierConfig::default();
        let outcome = classify_stops(stops.clone(), &structures, &lots, &config);

        for (enriched, original) in outcome.stops.iter().zip(stops.iter()) {
            let expected = evaluate(&original.point, &structures, &lots, config.threshold_m);
            assert_eq!(enriched.transfer_parking, expected, "stop {}", original.stop_id);
        }
    }
}
