// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Affine coordinate transformation
//!
//! Applied to explicit coordinates during import. Implicit geometry is never
//! transformed here; its transformation is folded into the placement matrix
//! instead (see [`AffineTransform::fold_into_placement`]).

use crate::error::{Error, Result};
use nalgebra::{Matrix4, Point3};

/// A 3D affine transformation stored as a homogeneous 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix4<f64>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Build from 12 row-major values of the upper 3x4 part:
    /// `m00 m01 m02 tx m10 m11 m12 ty m20 m21 m22 tz`
    pub fn from_row_major_3x4(values: &[f64]) -> Result<Self> {
        if values.len() != 12 {
            return Err(Error::InvalidTransform(format!(
                "expected 12 values, got {}",
                values.len()
            )));
        }
        let mut row_major = [0.0; 16];
        row_major[..12].copy_from_slice(values);
        row_major[15] = 1.0;
        Self::from_row_major_4x4(&row_major)
    }

    /// Build from 16 row-major values. The bottom row must be `0 0 0 1`.
    pub fn from_row_major_4x4(values: &[f64]) -> Result<Self> {
        if values.len() != 16 {
            return Err(Error::InvalidTransform(format!(
                "expected 16 values, got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidTransform("non-finite matrix entry".into()));
        }
        let matrix = Matrix4::from_row_slice(values);
        let bottom = matrix.row(3);
        if bottom[0] != 0.0 || bottom[1] != 0.0 || bottom[2] != 0.0 || bottom[3] != 1.0 {
            return Err(Error::InvalidTransform(
                "bottom row must be 0 0 0 1 for an affine transformation".into(),
            ));
        }
        Ok(Self { matrix })
    }

    /// Parse a comma or whitespace separated list of 12 numbers.
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| Error::InvalidTransform(format!("not a number: {}", s)))
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_row_major_3x4(&values)
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            matrix: Matrix4::new_translation(&nalgebra::Vector3::new(x, y, z)),
        }
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix4::identity()
    }

    #[inline]
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        self.matrix.transform_point(p)
    }

    /// Fold this transformation into an implicit-geometry placement: the
    /// result maps prototype coordinates to transformed world coordinates.
    /// Returns the new row-major matrix and the transformed reference point.
    pub fn fold_into_placement(
        &self,
        matrix: Option<&[f64; 16]>,
        reference_point: Option<[f64; 3]>,
    ) -> (Option<[f64; 16]>, Option<[f64; 3]>) {
        let folded = matrix.map(|m| {
            let placement = Matrix4::from_row_slice(m);
            // The linear part is transformed; translation stays attached to
            // the reference point.
            let mut linear = self.matrix;
            linear[(0, 3)] = 0.0;
            linear[(1, 3)] = 0.0;
            linear[(2, 3)] = 0.0;
            to_row_major(&(linear * placement))
        });
        let point = reference_point.map(|p| {
            let t = self.apply(&Point3::new(p[0], p[1], p[2]));
            [t.x, t.y, t.z]
        });
        (folded, point)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

fn to_row_major(m: &Matrix4<f64>) -> [f64; 16] {
    let mut out = [0.0; 16];
    for row in 0..4 {
        for col in 0..4 {
            out[row * 4 + col] = m[(row, col)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translation_from_3x4() {
        let t = AffineTransform::parse("1,0,0,10, 0,1,0,20, 0,0,1,30").unwrap();
        let p = t.apply(&Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(p.x, 11.0);
        assert_relative_eq!(p.y, 22.0);
        assert_relative_eq!(p.z, 33.0);
        assert!(!t.is_identity());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(AffineTransform::parse("1,2,3").is_err());
        assert!(AffineTransform::parse("1,0,0,0,0,1,0,0,0,0,1,x").is_err());
        let mut projective = [0.0; 16];
        projective[0] = 1.0;
        projective[5] = 1.0;
        projective[10] = 1.0;
        projective[12] = 1.0;
        projective[15] = 1.0;
        assert!(AffineTransform::from_row_major_4x4(&projective).is_err());
    }

    #[test]
    fn test_fold_into_placement() {
        // Scale by 2, shift by (100, 0, 0)
        let t = AffineTransform::from_row_major_3x4(&[
            2.0, 0.0, 0.0, 100.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0,
        ])
        .unwrap();
        let mut identity = [0.0; 16];
        for i in 0..4 {
            identity[i * 5] = 1.0;
        }
        let (m, p) = t.fold_into_placement(Some(&identity), Some([1.0, 1.0, 1.0]));
        let m = m.unwrap();
        assert_relative_eq!(m[0], 2.0);
        assert_relative_eq!(m[3], 0.0);
        assert_relative_eq!(m[15], 1.0);
        assert_eq!(p, Some([102.0, 2.0, 2.0]));
    }
}
