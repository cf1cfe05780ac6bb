// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appearance model: materials and parameterized textures targeting
//! surface geometry by gml:id.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Appearance {
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub theme: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub surface_data: Vec<SurfaceData>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfaceData {
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub kind: SurfaceDataKind,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum SurfaceDataKind {
    X3dMaterial {
        #[cfg_attr(feature = "serde", serde(default))]
        diffuse_color: Option<[f64; 3]>,
        #[cfg_attr(feature = "serde", serde(default))]
        transparency: Option<f64>,
        /// Surface geometry targets (`#gml_id`)
        #[cfg_attr(feature = "serde", serde(default))]
        targets: Vec<String>,
    },
    ParameterizedTexture {
        image_uri: String,
        #[cfg_attr(feature = "serde", serde(default))]
        mime_type: Option<String>,
        #[cfg_attr(feature = "serde", serde(default))]
        targets: Vec<TextureTarget>,
    },
}

/// Texture target: a surface geometry plus per-ring texture coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureTarget {
    /// `#gml_id` of the targeted polygon; may be empty when only ring ids
    /// are given.
    #[cfg_attr(feature = "serde", serde(default))]
    pub uri: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tex_coords: Vec<TexCoordList>,
}

/// Texture coordinates for one ring, flat `s, t, s, t, ...`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TexCoordList {
    /// `#gml_id` of the ring
    pub ring: String,
    pub coordinates: Vec<f64>,
}

impl SurfaceData {
    pub fn material(id: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: SurfaceDataKind::X3dMaterial {
                diffuse_color: None,
                transparency: None,
                targets,
            },
        }
    }

    pub fn texture(id: impl Into<String>, image_uri: impl Into<String>, targets: Vec<TextureTarget>) -> Self {
        Self {
            id: Some(id.into()),
            kind: SurfaceDataKind::ParameterizedTexture {
                image_uri: image_uri.into(),
                mime_type: None,
                targets,
            },
        }
    }

    /// Whether this is a texture (as opposed to a material).
    pub fn is_texture(&self) -> bool {
        matches!(self.kind, SurfaceDataKind::ParameterizedTexture { .. })
    }
}
