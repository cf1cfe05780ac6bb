// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implicit (prototype) geometry placed by reference point and matrix.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::Member;

/// Reusable geometry instanced by a feature.
///
/// The prototype is either an external library object (identified by URI) or
/// a relative geometry tree (identified by its gml:id). Both are stored once
/// and shared by every feature that places them.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImplicitGeometry {
    #[cfg_attr(feature = "serde", serde(default))]
    pub mime_type: Option<String>,
    /// URI of an external library object
    #[cfg_attr(feature = "serde", serde(default))]
    pub library_object: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub relative_geometry: Option<Member>,
    /// Row-major 4x4 matrix
    #[cfg_attr(feature = "serde", serde(default))]
    pub transformation_matrix: Option<Vec<f64>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reference_point: Option<[f64; 3]>,
}

impl ImplicitGeometry {
    pub fn library(uri: impl Into<String>) -> Self {
        Self {
            library_object: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn relative(geometry: Member) -> Self {
        Self {
            relative_geometry: Some(geometry),
            ..Default::default()
        }
    }

    pub fn at(mut self, reference_point: [f64; 3]) -> Self {
        self.reference_point = Some(reference_point);
        self
    }

    /// The transformation matrix as a fixed-size array, validating its length.
    pub fn matrix(&self) -> Result<Option<[f64; 16]>> {
        match &self.transformation_matrix {
            None => Ok(None),
            Some(values) => {
                let matrix: [f64; 16] = values
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidMatrix(values.len()))?;
                Ok(Some(matrix))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_length_is_checked() {
        let mut ig = ImplicitGeometry::library("tree.3ds");
        assert!(ig.matrix().unwrap().is_none());

        ig.transformation_matrix = Some(vec![1.0; 12]);
        assert!(matches!(ig.matrix(), Err(Error::InvalidMatrix(12))));

        ig.transformation_matrix = Some(vec![0.0; 16]);
        assert_eq!(ig.matrix().unwrap(), Some([0.0; 16]));
    }
}
