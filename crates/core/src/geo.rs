//! Geographic value types and point-in-area predicates used by location
//! targeting criteria.

use serde::{Deserialize, Serialize};

use crate::error::{PulseError, PulseResult};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A point on the globe, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

impl GeoLocation {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// An axis-aligned bounding box. A box whose `left` is greater than its
/// `right` spans the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl GeoBox {
    pub fn new(top: f64, right: f64, bottom: f64, left: f64) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn center_lat(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    pub fn center_lon(&self) -> f64 {
        if self.left <= self.right {
            (self.left + self.right) / 2.0
        } else {
            // Wrapped box: midpoint of the arc crossing the antimeridian,
            // normalized back into [-180, 180].
            let mid = (self.left + self.right + 360.0) / 2.0;
            if mid > 180.0 {
                mid - 360.0
            } else {
                mid
            }
        }
    }

    pub fn contains(&self, point: &GeoLocation) -> bool {
        if point.lat < self.bottom || point.lat > self.top {
            return false;
        }
        if self.left <= self.right {
            self.left <= point.lon && point.lon <= self.right
        } else {
            point.lon >= self.left || point.lon <= self.right
        }
    }
}

/// A circle of `radius_meters` around a center point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCircle {
    pub center: GeoLocation,
    pub radius_meters: f64,
}

impl GeoCircle {
    pub fn new(center: GeoLocation, radius_meters: f64) -> Self {
        Self {
            center,
            radius_meters,
        }
    }

    pub fn contains(&self, point: &GeoLocation) -> bool {
        haversine_distance(&self.center, point) <= self.radius_meters
    }
}

/// Great-circle distance in meters.
pub fn haversine_distance(a: &GeoLocation, b: &GeoLocation) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// An ordered list of vertices, implicitly closed (the last vertex
/// connects back to the first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub points: Vec<GeoLocation>,
}

impl GeoPolygon {
    pub fn new(points: Vec<GeoLocation>) -> Self {
        Self { points }
    }

    /// Ray-casting point-in-polygon test. Points exactly on an edge or
    /// vertex may fall on either side.
    pub fn contains(&self, point: &GeoLocation) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = &self.points[i];
            let b = &self.points[j];
            let crosses = (a.lat > point.lat) != (b.lat > point.lat);
            if crosses {
                let intersect_lon = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
                if point.lon < intersect_lon {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

pub mod geohash {
    //! Base-32 geohash decoding.

    use super::{GeoBox, PulseError, PulseResult};

    const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

    /// Decode a geohash string into its bounding box. Case-insensitive;
    /// fails on empty input or characters outside the geohash alphabet.
    pub fn decode(hash: &str) -> PulseResult<GeoBox> {
        if hash.is_empty() {
            return Err(PulseError::InvalidGeohash(hash.to_string()));
        }
        let mut lat = (-90.0_f64, 90.0_f64);
        let mut lon = (-180.0_f64, 180.0_f64);
        let mut even = true;
        for c in hash.chars() {
            let c = c.to_ascii_lowercase();
            let index = BASE32
                .iter()
                .position(|&b| b as char == c)
                .ok_or_else(|| PulseError::InvalidGeohash(hash.to_string()))?;
            for bit in (0..5).rev() {
                let range = if even { &mut lon } else { &mut lat };
                let mid = (range.0 + range.1) / 2.0;
                if index >> bit & 1 == 1 {
                    range.0 = mid;
                } else {
                    range.1 = mid;
                }
                even = !even;
            }
        }
        Ok(GeoBox::new(lat.1, lon.1, lat.0, lon.0))
    }
}
