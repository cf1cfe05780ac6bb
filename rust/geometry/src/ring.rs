// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring and polygon validation.

use citydb_import_core::{LinearRing, Polygon};
use nalgebra::Point3;

use crate::error::{Error, Result};
use crate::payload::PolygonPayload;
use crate::transform::AffineTransform;

/// Minimum number of points of a closed ring (first point repeated last).
pub const MIN_RING_POINTS: usize = 4;

/// Turn a parsed ring into validated, closed, optionally transformed and
/// reversed points.
///
/// Unclosed rings are closed by repeating the first point. Rings with fewer
/// than [`MIN_RING_POINTS`] points after closing, fewer than three distinct
/// points, non-finite values or a coordinate list that is not a multiple of
/// three are rejected.
pub fn prepare_ring(
    ring: &LinearRing,
    transform: Option<&AffineTransform>,
    reverse: bool,
) -> Result<Vec<Point3<f64>>> {
    let coords = &ring.coordinates;
    if coords.len() % 3 != 0 {
        return Err(Error::ring(format!(
            "coordinate list of length {} is not 3-dimensional",
            coords.len()
        )));
    }
    if coords.iter().any(|v| !v.is_finite()) {
        return Err(Error::ring("non-finite coordinate"));
    }

    let mut points: Vec<Point3<f64>> = coords
        .chunks_exact(3)
        .map(|c| Point3::new(c[0], c[1], c[2]))
        .collect();

    if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
        if first != last {
            points.push(first);
        }
    }

    if points.len() < MIN_RING_POINTS {
        return Err(Error::ring(format!(
            "ring has {} points, at least {} required",
            points.len(),
            MIN_RING_POINTS
        )));
    }

    let mut distinct: Vec<&Point3<f64>> = Vec::with_capacity(3);
    for p in &points {
        if !distinct.contains(&p) {
            distinct.push(p);
            if distinct.len() == 3 {
                break;
            }
        }
    }
    if distinct.len() < 3 {
        return Err(Error::ring("ring has fewer than 3 distinct points"));
    }

    if let Some(t) = transform {
        for p in points.iter_mut() {
            *p = t.apply(p);
        }
    }
    if reverse {
        points.reverse();
    }
    Ok(points)
}

/// Outcome of preparing a polygon: the payload plus the indices of interior
/// rings that were dropped, with the reason.
#[derive(Debug, Clone)]
pub struct PreparedPolygon {
    pub payload: PolygonPayload,
    pub dropped_interiors: Vec<(usize, Error)>,
}

/// Validate a polygon. An invalid exterior rejects the whole polygon; an
/// invalid interior ring is dropped and reported.
pub fn prepare_polygon(
    polygon: &Polygon,
    transform: Option<&AffineTransform>,
    reverse: bool,
) -> Result<PreparedPolygon> {
    let exterior = polygon
        .exterior
        .as_ref()
        .ok_or_else(|| Error::DegeneratePolygon("polygon has no exterior ring".into()))?;

    let exterior = prepare_ring(exterior, transform, reverse)
        .map_err(|e| Error::DegeneratePolygon(format!("exterior ring: {}", e)))?;

    let mut rings = Vec::with_capacity(1 + polygon.interior.len());
    rings.push(exterior);

    let mut dropped_interiors = Vec::new();
    for (i, interior) in polygon.interior.iter().enumerate() {
        match prepare_ring(interior, transform, reverse) {
            Ok(points) => rings.push(points),
            Err(e) => dropped_interiors.push((i, e)),
        }
    }

    Ok(PreparedPolygon {
        payload: PolygonPayload::new(rings),
        dropped_interiors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(coords: &[f64]) -> LinearRing {
        LinearRing::new(coords.to_vec())
    }

    const SQUARE: [f64; 15] = [
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
    ];

    #[test]
    fn test_closed_ring_kept() {
        let pts = prepare_ring(&ring(&SQUARE), None, false).unwrap();
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], pts[4]);
    }

    #[test]
    fn test_unclosed_ring_closed() {
        let pts = prepare_ring(&ring(&SQUARE[..12]), None, false).unwrap();
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], Point3::new(0.0, 0.0, 0.0));
        assert_eq!(pts[4], Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_reverse_and_transform() {
        let t = AffineTransform::translation(10.0, 0.0, 0.0);
        let pts = prepare_ring(&ring(&SQUARE), Some(&t), true).unwrap();
        assert_eq!(pts[0], Point3::new(10.0, 0.0, 0.0));
        assert_eq!(pts[1], Point3::new(10.0, 1.0, 0.0));
        assert_eq!(pts[3], Point3::new(11.0, 0.0, 0.0));
    }

    #[test]
    fn test_degenerate_rings() {
        // Two distinct points only
        let line = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        assert!(prepare_ring(&ring(&line), None, false).is_err());
        // Not 3D
        assert!(prepare_ring(&ring(&SQUARE[..14]), None, false).is_err());
        // Too short
        assert!(prepare_ring(&ring(&SQUARE[..6]), None, false).is_err());
        // NaN
        let mut nan = SQUARE;
        nan[4] = f64::NAN;
        assert!(prepare_ring(&ring(&nan), None, false).is_err());
    }

    #[test]
    fn test_invalid_interior_dropped() {
        let polygon = Polygon {
            exterior: Some(ring(&SQUARE)),
            interior: vec![ring(&SQUARE[..6]), ring(&SQUARE)],
        };
        let prepared = prepare_polygon(&polygon, None, false).unwrap();
        assert_eq!(prepared.payload.rings.len(), 2);
        assert_eq!(prepared.dropped_interiors.len(), 1);
        assert_eq!(prepared.dropped_interiors[0].0, 0);
    }

    #[test]
    fn test_invalid_exterior_rejects_polygon() {
        let polygon = Polygon {
            exterior: Some(ring(&SQUARE[..6])),
            interior: vec![],
        };
        assert!(matches!(
            prepare_polygon(&polygon, None, false),
            Err(Error::DegeneratePolygon(_))
        ));
        assert!(prepare_polygon(&Polygon::default(), None, false).is_err());
    }
}
