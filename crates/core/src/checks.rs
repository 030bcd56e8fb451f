//! The closed set of validation checks reported per administrative level.
//!
//! The server runs the geometry and attribute checks; this module only
//! knows their names, how severe a positive count is, and how they are
//! grouped for display. The warning/blocking partition is fixed here and
//! never derived from response data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a positive count for a check affects importability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    /// Reported but does not block import.
    Warning,
    /// The entity cannot be imported until fixed.
    Blocking,
}

/// Column group used by the error summary grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    GeometryValidity,
    GeometryTopology,
    Attributes,
}

impl CheckCategory {
    /// All categories in display order.
    pub const ALL: [CheckCategory; 3] = [
        CheckCategory::GeometryValidity,
        CheckCategory::GeometryTopology,
        CheckCategory::Attributes,
    ];

    /// Group header shown above the category's columns.
    pub fn title(self) -> &'static str {
        match self {
            CheckCategory::GeometryValidity => "Geometry Validity Checks",
            CheckCategory::GeometryTopology => "Geometry Topology Checks",
            CheckCategory::Attributes => "Attributes Checks",
        }
    }
}

/// One named validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckName {
    SelfIntersects,
    SelfContacts,
    DuplicateNodes,
    PolygonLessThanFourNodes,
    Overlaps,
    Gaps,
    DuplicatedGeometries,
    FeatureWithinOtherFeatures,
    NotWithinParent,
    ParentCodeMissing,
    DefaultCodeMissing,
    DefaultNameMissing,
    PrivacyLevelMissing,
    ParentMissing,
    DuplicatedCodes,
    InvalidPrivacyLevel,
    UpgradedPrivacyLevel,
}

/// Checks whose findings never block import.
pub const WARNING_CHECKS: [CheckName; 5] = [
    CheckName::SelfIntersects,
    CheckName::SelfContacts,
    CheckName::DuplicateNodes,
    CheckName::Gaps,
    CheckName::UpgradedPrivacyLevel,
];

/// Checks whose findings make an entity non-importable.
pub const BLOCKING_CHECKS: [CheckName; 12] = [
    CheckName::PolygonLessThanFourNodes,
    CheckName::DuplicatedGeometries,
    CheckName::FeatureWithinOtherFeatures,
    CheckName::Overlaps,
    CheckName::NotWithinParent,
    CheckName::ParentCodeMissing,
    CheckName::DefaultCodeMissing,
    CheckName::DefaultNameMissing,
    CheckName::DuplicatedCodes,
    CheckName::InvalidPrivacyLevel,
    CheckName::PrivacyLevelMissing,
    CheckName::ParentMissing,
];

impl CheckName {
    /// Every check, in grid column order.
    pub const ALL: [CheckName; 17] = [
        CheckName::SelfIntersects,
        CheckName::SelfContacts,
        CheckName::DuplicateNodes,
        CheckName::PolygonLessThanFourNodes,
        CheckName::Overlaps,
        CheckName::Gaps,
        CheckName::DuplicatedGeometries,
        CheckName::FeatureWithinOtherFeatures,
        CheckName::NotWithinParent,
        CheckName::ParentCodeMissing,
        CheckName::DefaultCodeMissing,
        CheckName::DefaultNameMissing,
        CheckName::PrivacyLevelMissing,
        CheckName::ParentMissing,
        CheckName::DuplicatedCodes,
        CheckName::InvalidPrivacyLevel,
        CheckName::UpgradedPrivacyLevel,
    ];

    /// Name exactly as it appears as a key in the server's error summary.
    pub fn as_str(self) -> &'static str {
        match self {
            CheckName::SelfIntersects => "Self Intersects",
            CheckName::SelfContacts => "Self Contacts",
            CheckName::DuplicateNodes => "Duplicate Nodes",
            CheckName::PolygonLessThanFourNodes => "Polygon with less than 4 nodes",
            CheckName::Overlaps => "Overlaps",
            CheckName::Gaps => "Gaps",
            CheckName::DuplicatedGeometries => "Duplicated Geometries",
            CheckName::FeatureWithinOtherFeatures => "Feature within other features",
            CheckName::NotWithinParent => "Not Within Parent",
            CheckName::ParentCodeMissing => "Parent Code Missing",
            CheckName::DefaultCodeMissing => "Default Code Missing",
            CheckName::DefaultNameMissing => "Default Name Missing",
            CheckName::PrivacyLevelMissing => "Privacy Level Missing",
            CheckName::ParentMissing => "Parent Missing",
            CheckName::DuplicatedCodes => "Duplicated Codes",
            CheckName::InvalidPrivacyLevel => "Invalid Privacy Level",
            CheckName::UpgradedPrivacyLevel => "Upgraded Privacy Level",
        }
    }

    pub fn severity(self) -> CheckSeverity {
        if WARNING_CHECKS.contains(&self) {
            CheckSeverity::Warning
        } else {
            CheckSeverity::Blocking
        }
    }

    pub fn is_blocking(self) -> bool {
        self.severity() == CheckSeverity::Blocking
    }

    pub fn category(self) -> CheckCategory {
        match self {
            CheckName::SelfIntersects
            | CheckName::SelfContacts
            | CheckName::DuplicateNodes
            | CheckName::PolygonLessThanFourNodes => CheckCategory::GeometryValidity,
            CheckName::Overlaps
            | CheckName::Gaps
            | CheckName::DuplicatedGeometries
            | CheckName::FeatureWithinOtherFeatures
            | CheckName::NotWithinParent => CheckCategory::GeometryTopology,
            CheckName::ParentCodeMissing
            | CheckName::DefaultCodeMissing
            | CheckName::DefaultNameMissing
            | CheckName::PrivacyLevelMissing
            | CheckName::ParentMissing
            | CheckName::DuplicatedCodes
            | CheckName::InvalidPrivacyLevel
            | CheckName::UpgradedPrivacyLevel => CheckCategory::Attributes,
        }
    }

    /// Self contacts are still counted but not shown as a grid column.
    pub fn is_displayed(self) -> bool {
        self != CheckName::SelfContacts
    }

    /// Tooltip text explaining what the check looks for.
    pub fn description(self) -> Option<&'static str> {
        let text = match self {
            CheckName::SelfIntersects => {
                "Check for self-intersects using GEOSisValidDetail with flag 1"
            }
            CheckName::SelfContacts => return None,
            CheckName::DuplicateNodes => "Check for duplicate nodes",
            CheckName::PolygonLessThanFourNodes => "Check if polygon with less than 4 nodes",
            CheckName::Overlaps => "Check for overlapping polygons smaller than (map units sqr.)",
            CheckName::Gaps => {
                "Checks for gaps between neighbouring polygons smaller than (map units sqr.)"
            }
            CheckName::DuplicatedGeometries => {
                "There are entities in the same level with same geometries"
            }
            CheckName::FeatureWithinOtherFeatures => {
                "Check whether feature is within other features"
            }
            CheckName::NotWithinParent => "Child geometry is not within parent geometry",
            CheckName::ParentCodeMissing => "Empty/Missing Parent Id Field",
            CheckName::DefaultCodeMissing => "Empty/Missing Default Code/Id Field",
            CheckName::DefaultNameMissing => "Empty/Missing Default Name",
            CheckName::PrivacyLevelMissing => "Empty/Missing Privacy Level",
            CheckName::ParentMissing => {
                "Cannot find parent from upper level by its Parent Id Field"
            }
            CheckName::DuplicatedCodes => "There is default code that is not unique",
            CheckName::InvalidPrivacyLevel => {
                "Privacy level is higher than maximum level in dataset configuration"
            }
            CheckName::UpgradedPrivacyLevel => {
                "Privacy level has been upgraded to dataset minimum privacy level"
            }
        };
        Some(text)
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckName::ALL
            .into_iter()
            .find(|check| check.as_str() == s)
            .ok_or_else(|| CoreError::UnknownCheck(s.to_string()))
    }
}

impl TryFrom<String> for CheckName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckName> for String {
    fn from(check: CheckName) -> Self {
        check.as_str().to_string()
    }
}
