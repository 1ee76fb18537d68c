//! CAP polygon parsing and point-in-polygon tests.
//!
//! A CAP polygon is a whitespace separated list of `lat,lon` vertex pairs.
//! Rings are not required to be closed; the last vertex implicitly connects
//! back to the first.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<GeoPoint>,
}

impl Polygon {
    pub fn new(vertices: Vec<GeoPoint>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        contains_point(point, self)
    }

    /// Inclusive `(min, max)` corners, or `None` for an empty polygon.
    pub fn bounds(&self) -> Option<(GeoPoint, GeoPoint)> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(min, max), v| {
            (
                GeoPoint::new(min.lat.min(v.lat), min.lon.min(v.lon)),
                GeoPoint::new(max.lat.max(v.lat), max.lon.max(v.lon)),
            )
        }))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolygonParseError {
    #[error("polygon has no vertices")]
    Empty,

    #[error("vertex {index}: {token:?} is not a number")]
    InvalidCoordinate { index: usize, token: String },
}

/// Parse one CAP polygon literal. Ring closure and vertex count are not
/// validated.
///
/// Only a non-numeric coordinate fails the polygon. A token with more than
/// two coordinates uses the first two as `lat,lon`; a token with a single
/// coordinate is not a vertex and is skipped.
pub fn parse_polygon_string(s: &str) -> Result<Polygon, PolygonParseError> {
    let mut vertices = Vec::new();

    for (index, token) in s.split_whitespace().enumerate() {
        let coordinates = token
            .split(',')
            .map(|coordinate| {
                coordinate
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| PolygonParseError::InvalidCoordinate {
                        index,
                        token: coordinate.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let [lat, lon, ..] = coordinates.as_slice() {
            vertices.push(GeoPoint::new(*lat, *lon));
        }
    }

    if vertices.is_empty() {
        return Err(PolygonParseError::Empty);
    }

    Ok(Polygon { vertices })
}

/// Parse every polygon literal of a CAP area independently. A literal that
/// fails to parse yields `None` at its position; callers skip those.
///
/// A single literal is passed as a one-element collection, e.g.
/// `parse_polygon_set([raw])`.
pub fn parse_polygon_set<I, S>(raw: I) -> Vec<Option<Polygon>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|literal| parse_polygon_string(literal.as_ref()).ok())
        .collect()
}

/// Even-odd ray casting with latitude as y and longitude as x.
///
/// Points on the minimum-latitude or minimum-longitude edge of an
/// axis-aligned ring count as inside; points on the maximum edges count as
/// outside. Rings with fewer than three vertices contain nothing.
pub fn contains_point(point: GeoPoint, polygon: &Polygon) -> bool {
    let vertices = polygon.vertices();
    if vertices.len() < 3 {
        return false;
    }

    match polygon.bounds() {
        Some((min, max))
            if point.lat >= min.lat
                && point.lat <= max.lat
                && point.lon >= min.lon
                && point.lon <= max.lon => {}
        _ => return false,
    }

    let (y, x) = (point.lat, point.lon);
    let mut inside = false;
    let mut j = vertices.len() - 1;

    for i in 0..vertices.len() {
        let (yi, xi) = (vertices[i].lat, vertices[i].lon);
        let (yj, xj) = (vertices[j].lat, vertices[j].lon);

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}
