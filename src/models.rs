// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use geo::{Geometry, Point};
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// A transit stop under consideration as a park-and-ride transfer point.
///
/// `point` is geographic (lon/lat) as loaded; the classification pipeline
/// works on a projected copy and writes its findings back here.
#[derive(Clone, Debug)]
pub struct Stop {
    pub stop_id: String,
    pub name: String,
    pub point: Point,
    pub transfer_parking: Vec<TransferParking>,
}

impl Stop {
    pub fn new(stop_id: String, name: String, point: Point) -> Self {
        Self {
            stop_id,
            name,
            point,
            transfer_parking: Vec::new(),
        }
    }

    /// A stop is a transfer stop iff at least one parking facility sits
    /// within the classification threshold.
    pub fn is_transfer(&self) -> bool {
        !self.transfer_parking.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkingKind {
    Structure,
    Lot,
}

/// A parking structure or surface lot, point or polygon footprint.
#[derive(Clone, Debug)]
pub struct ParkingFacility {
    pub id: String,
    pub kind: ParkingKind,
    pub geometry: Geometry,
}

/// The association type attached to a flagged stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    ParkAndRide,
    ParkingLot,
}

/// One `(type, facility)` association produced by the classifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParking {
    pub kind: TransferKind,
    pub parking_id: String,
}

/// A transfer-stop candidate fed into clustering and snapping.
/// Coordinates are geographic (lat/lon); consumers project as needed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "stopId")]
    pub stop_id: String,
    #[serde(rename = "stopName")]
    pub name: String,
    #[serde(rename = "stopLat")]
    pub lat: f64,
    #[serde(rename = "stopLon")]
    pub lon: f64,
}

impl Candidate {
    pub fn point(&self) -> Point {
        Point::new(self.lon, self.lat)
    }
}
