// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feature Types
//!
//! Fast type checking using an enum instead of string comparison.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// City model feature types handled by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureType {
    // Core
    CityObjectGroup,
    GenericCityObject,
    LandUse,
    CityFurniture,

    // Building module
    Building,
    BuildingPart,
    Room,
    BuildingInstallation,
    IntBuildingInstallation,
    BuildingFurniture,

    // Boundary surfaces
    RoofSurface,
    WallSurface,
    GroundSurface,
    ClosureSurface,
    FloorSurface,
    CeilingSurface,
    InteriorWallSurface,
    OuterCeilingSurface,
    OuterFloorSurface,

    // Openings
    Window,
    Door,

    // Bridge and tunnel modules
    Bridge,
    BridgePart,
    Tunnel,
    TunnelPart,
}

impl FeatureType {
    /// All feature types, in declaration order.
    pub const ALL: [FeatureType; 25] = [
        Self::CityObjectGroup,
        Self::GenericCityObject,
        Self::LandUse,
        Self::CityFurniture,
        Self::Building,
        Self::BuildingPart,
        Self::Room,
        Self::BuildingInstallation,
        Self::IntBuildingInstallation,
        Self::BuildingFurniture,
        Self::RoofSurface,
        Self::WallSurface,
        Self::GroundSurface,
        Self::ClosureSurface,
        Self::FloorSurface,
        Self::CeilingSurface,
        Self::InteriorWallSurface,
        Self::OuterCeilingSurface,
        Self::OuterFloorSurface,
        Self::Window,
        Self::Door,
        Self::Bridge,
        Self::BridgePart,
        Self::Tunnel,
        Self::TunnelPart,
    ];

    /// Parse from the CityGML element name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    /// CityGML element name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CityObjectGroup => "CityObjectGroup",
            Self::GenericCityObject => "GenericCityObject",
            Self::LandUse => "LandUse",
            Self::CityFurniture => "CityFurniture",
            Self::Building => "Building",
            Self::BuildingPart => "BuildingPart",
            Self::Room => "Room",
            Self::BuildingInstallation => "BuildingInstallation",
            Self::IntBuildingInstallation => "IntBuildingInstallation",
            Self::BuildingFurniture => "BuildingFurniture",
            Self::RoofSurface => "RoofSurface",
            Self::WallSurface => "WallSurface",
            Self::GroundSurface => "GroundSurface",
            Self::ClosureSurface => "ClosureSurface",
            Self::FloorSurface => "FloorSurface",
            Self::CeilingSurface => "CeilingSurface",
            Self::InteriorWallSurface => "InteriorWallSurface",
            Self::OuterCeilingSurface => "OuterCeilingSurface",
            Self::OuterFloorSurface => "OuterFloorSurface",
            Self::Window => "Window",
            Self::Door => "Door",
            Self::Bridge => "Bridge",
            Self::BridgePart => "BridgePart",
            Self::Tunnel => "Tunnel",
            Self::TunnelPart => "TunnelPart",
        }
    }

    /// Object class id stored in `cityobject.objectclass_id`.
    pub fn objectclass_id(&self) -> i32 {
        match self {
            Self::LandUse => 4,
            Self::GenericCityObject => 5,
            Self::CityFurniture => 21,
            Self::CityObjectGroup => 23,
            Self::BuildingPart => 25,
            Self::Building => 26,
            Self::BuildingInstallation => 27,
            Self::IntBuildingInstallation => 28,
            Self::CeilingSurface => 30,
            Self::InteriorWallSurface => 31,
            Self::FloorSurface => 32,
            Self::RoofSurface => 33,
            Self::WallSurface => 34,
            Self::GroundSurface => 35,
            Self::ClosureSurface => 36,
            Self::Window => 38,
            Self::Door => 39,
            Self::BuildingFurniture => 40,
            Self::Room => 41,
            Self::OuterCeilingSurface => 60,
            Self::OuterFloorSurface => 61,
            Self::BridgePart => 63,
            Self::Bridge => 64,
            Self::TunnelPart => 84,
            Self::Tunnel => 85,
        }
    }

    /// Boundary surfaces of buildings and rooms
    pub fn is_boundary_surface(&self) -> bool {
        matches!(
            self,
            Self::RoofSurface
                | Self::WallSurface
                | Self::GroundSurface
                | Self::ClosureSurface
                | Self::FloorSurface
                | Self::CeilingSurface
                | Self::InteriorWallSurface
                | Self::OuterCeilingSurface
                | Self::OuterFloorSurface
        )
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, Self::Window | Self::Door)
    }
}

impl FromStr for FeatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::UnknownFeatureType(s.to_string()))
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
