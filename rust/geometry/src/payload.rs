// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coordinate payloads and their text encoding.
//!
//! Polygons are encoded as `POLYGON Z ((x y z, ...), (...))` and solids as
//! `POLYHEDRALSURFACE Z (((...)), ...)`. `f64` values are written with
//! Rust's shortest round-trip formatting, so decoding an encoded payload
//! restores the exact coordinates.

use std::fmt::Write as _;

use citydb_import_core::Envelope;
use nalgebra::Point3;
use nom::{
    bytes::complete::tag_no_case,
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map},
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// Explicit coordinates of one polygon: exterior ring first, then holes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolygonPayload {
    pub rings: Vec<Vec<Point3<f64>>>,
}

/// A closed polyhedral surface assembled from a solid's exterior shell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolidPayload {
    pub polygons: Vec<PolygonPayload>,
}

/// The single payload a surface-geometry row may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Explicit (world) coordinates
    Explicit(PolygonPayload),
    /// Prototype coordinates of an implicit geometry
    Implicit(PolygonPayload),
    Solid(SolidPayload),
}

impl PolygonPayload {
    pub fn new(rings: Vec<Vec<Point3<f64>>>) -> Self {
        Self { rings }
    }

    pub fn exterior(&self) -> Option<&[Point3<f64>]> {
        self.rings.first().map(Vec::as_slice)
    }

    /// Same polygon with every ring's point order reversed.
    pub fn reversed(&self) -> Self {
        Self {
            rings: self
                .rings
                .iter()
                .map(|r| r.iter().rev().copied().collect())
                .collect(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.rings.iter().map(Vec::len).sum()
    }

    pub fn envelope(&self) -> Option<Envelope> {
        let mut points = self.rings.iter().flatten();
        let first = points.next()?;
        let mut env = Envelope::from_point([first.x, first.y, first.z]);
        for p in points {
            env.expand_point([p.x, p.y, p.z]);
        }
        Some(env)
    }

    pub fn to_wkt(&self) -> String {
        let mut out = String::from("POLYGON Z ");
        write_polygon_body(&mut out, self);
        out
    }

    pub fn from_wkt(text: &str) -> Result<Self> {
        all_consuming(delimited(multispace0, polygon, multispace0))(text)
            .map(|(_, p)| p)
            .map_err(|e| Error::InvalidPayload(format!("polygon: {}", e)))
    }
}

impl SolidPayload {
    pub fn new(polygons: Vec<PolygonPayload>) -> Self {
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn to_wkt(&self) -> String {
        let mut out = String::from("POLYHEDRALSURFACE Z (");
        for (i, polygon) in self.polygons.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_polygon_body(&mut out, polygon);
        }
        out.push(')');
        out
    }

    pub fn from_wkt(text: &str) -> Result<Self> {
        all_consuming(delimited(multispace0, polyhedral_surface, multispace0))(text)
            .map(|(_, s)| s)
            .map_err(|e| Error::InvalidPayload(format!("polyhedral surface: {}", e)))
    }
}

impl Payload {
    pub fn to_wkt(&self) -> String {
        match self {
            Self::Explicit(p) | Self::Implicit(p) => p.to_wkt(),
            Self::Solid(s) => s.to_wkt(),
        }
    }

    /// Polygon coordinates, whether explicit or implicit.
    pub fn polygon(&self) -> Option<&PolygonPayload> {
        match self {
            Self::Explicit(p) | Self::Implicit(p) => Some(p),
            Self::Solid(_) => None,
        }
    }
}

fn write_polygon_body(out: &mut String, polygon: &PolygonPayload) {
    out.push('(');
    for (i, ring) in polygon.rings.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for (j, p) in ring.iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            // Writing to a String cannot fail
            let _ = write!(out, "{} {} {}", p.x, p.y, p.z);
        }
        out.push(')');
    }
    out.push(')');
}

fn ws_char<'a>(c: char) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    delimited(multispace0, char(c), multispace0)
}

fn point(input: &str) -> IResult<&str, Point3<f64>> {
    map(
        tuple((double, preceded(multispace1, double), preceded(multispace1, double))),
        |(x, y, z)| Point3::new(x, y, z),
    )(input)
}

fn ring(input: &str) -> IResult<&str, Vec<Point3<f64>>> {
    delimited(ws_char('('), separated_list1(ws_char(','), point), ws_char(')'))(input)
}

fn polygon_body(input: &str) -> IResult<&str, PolygonPayload> {
    map(
        delimited(ws_char('('), separated_list1(ws_char(','), ring), ws_char(')')),
        PolygonPayload::new,
    )(input)
}

fn polygon(input: &str) -> IResult<&str, PolygonPayload> {
    preceded(
        tuple((tag_no_case("POLYGON"), multispace1, tag_no_case("Z"))),
        polygon_body,
    )(input)
}

fn polyhedral_surface(input: &str) -> IResult<&str, SolidPayload> {
    map(
        preceded(
            tuple((tag_no_case("POLYHEDRALSURFACE"), multispace1, tag_no_case("Z"))),
            delimited(
                ws_char('('),
                separated_list1(ws_char(','), polygon_body),
                ws_char(')'),
            ),
        ),
        SolidPayload::new,
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(offset: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(offset, 0.0, 0.0),
            Point3::new(offset + 1.0, 0.0, 0.0),
            Point3::new(offset + 1.0, 1.0, 0.0),
            Point3::new(offset, 1.0, 0.0),
            Point3::new(offset, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_polygon_round_trip() {
        let payload = PolygonPayload::new(vec![
            square(0.0),
            vec![
                Point3::new(0.25, 0.25, 0.0),
                Point3::new(0.25, 0.75, 0.0),
                Point3::new(0.75, 0.75, 0.0),
                Point3::new(0.25, 0.25, 0.0),
            ],
        ]);
        let wkt = payload.to_wkt();
        assert!(wkt.starts_with("POLYGON Z ((0 0 0, 1 0 0"));
        assert_eq!(PolygonPayload::from_wkt(&wkt).unwrap(), payload);
    }

    #[test]
    fn test_large_coordinates_exact() {
        let ring = vec![
            Point3::new(5_678_901.123_456_789, 1_234_567.000_000_1, 45.67),
            Point3::new(5_678_902.5, 1_234_567.25, 45.67),
            Point3::new(5_678_902.5, 1_234_568.0, -0.000_001),
            Point3::new(5_678_901.123_456_789, 1_234_567.000_000_1, 45.67),
        ];
        let payload = PolygonPayload::new(vec![ring]);
        assert_eq!(PolygonPayload::from_wkt(&payload.to_wkt()).unwrap(), payload);
    }

    #[test]
    fn test_solid_round_trip() {
        let solid = SolidPayload::new(vec![
            PolygonPayload::new(vec![square(0.0)]),
            PolygonPayload::new(vec![square(2.0)]),
        ]);
        let wkt = solid.to_wkt();
        assert!(wkt.starts_with("POLYHEDRALSURFACE Z (((0 0 0"));
        assert_eq!(SolidPayload::from_wkt(&wkt).unwrap(), solid);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(PolygonPayload::from_wkt("POLYGON Z ((0 0, 1 1))").is_err());
        assert!(PolygonPayload::from_wkt("LINESTRING Z (0 0 0, 1 1 1)").is_err());
        assert!(SolidPayload::from_wkt("POLYHEDRALSURFACE Z ()").is_err());
    }

    #[test]
    fn test_reversed_and_envelope() {
        let payload = PolygonPayload::new(vec![square(3.0)]);
        let rev = payload.reversed();
        assert_eq!(rev.rings[0][1], Point3::new(3.0, 1.0, 0.0));
        assert_eq!(rev.reversed(), payload);
        let env = payload.envelope().unwrap();
        assert_eq!(env.lower, [3.0, 0.0, 0.0]);
        assert_eq!(env.upper, [4.0, 1.0, 0.0]);
    }
}
