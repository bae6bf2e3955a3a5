// ===========================================================================
// Web Mercator Coordinate Conversion + planar distance helpers
// ===========================================================================
//
// All threshold comparisons in this crate happen in a metric planar CRS
// (EPSG:3857 semantics, spherical formula). Inputs arrive as WGS84 lat/lon
// and must be projected before any distance math.

use geo::{Coord, Distance, Euclidean, Geometry, Line, MapCoordsInPlace, Point};

pub const EARTH_RADIUS: f64 = 6378137.0;

/// Convert lat/lng (EPSG:4326) to Web Mercator (EPSG:3857).
/// Input: (longitude, latitude) in degrees. Output: (x, y) in meters.
pub fn lat_lng_to_web_merc(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * ((std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan()).ln();
    (x, y)
}

/// Convert Web Mercator (EPSG:3857) back to lat/lng (EPSG:4326).
/// Input: (x, y) in meters. Output: (longitude, latitude) in degrees.
pub fn web_merc_to_lat_lng(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Project a geographic point (x = lon, y = lat) into Web Mercator.
pub fn project_point(p: Point) -> Point {
    let (x, y) = lat_lng_to_web_merc(p.x(), p.y());
    Point::new(x, y)
}

/// Project a whole geometry into Web Mercator.
/// Returns None for geometry kinds the pipeline has no distance semantics
/// for; callers treat that as a malformed record and skip it.
pub fn project_geometry(geom: &Geometry) -> Option<Geometry> {
    let mut projected = geom.clone();
    match &projected {
        Geometry::Point(_)
        | Geometry::LineString(_)
        | Geometry::Polygon(_)
        | Geometry::MultiPolygon(_) => {}
        _ => return None,
    }
    projected.map_coords_in_place(|c| {
        let (x, y) = lat_lng_to_web_merc(c.x, c.y);
        Coord { x, y }
    });
    Some(projected)
}

/// Planar distance from a point to a facility geometry, in meters.
/// Both sides must already be in Web Mercator. Point-in-polygon yields 0.
/// Returns None for unsupported geometry kinds (skip semantics, never fatal).
pub fn planar_distance(p: &Point, geom: &Geometry) -> Option<f64> {
    match geom {
        Geometry::Point(other) => Some(Euclidean.distance(*p, *other)),
        Geometry::LineString(ls) => Some(Euclidean.distance(p, ls)),
        Geometry::Polygon(poly) => Some(Euclidean.distance(p, poly)),
        Geometry::MultiPolygon(mp) => Some(Euclidean.distance(p, mp)),
        _ => None,
    }
}

/// Planar distance from a point to a single polyline segment.
pub fn point_segment_distance(p: Point, a: [f64; 2], b: [f64; 2]) -> f64 {
    let seg = Line::new(Coord { x: a[0], y: a[1] }, Coord { x: b[0], y: b[1] });
    Euclidean.distance(&p, &seg)
}

/// Euclidean length of a planar polyline.
pub fn polyline_length(coords: &[[f64; 2]]) -> f64 {
    coords
        .windows(2)
        .map(|w| {
            let dx = w[1][0] - w[0][0];
            let dy = w[1][1] - w[0][1];
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}
