//! Target identity for digest aggregation buckets.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of recipient a digest is aggregated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Route to the owners of the offending issues.
    IssueOwners,
    /// Route to a single project member.
    Member,
    /// Route to a team.
    Team,
}

impl TargetType {
    /// Stable string form used in the wire encoding of a target key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::IssueOwners => "issue_owners",
            TargetType::Member => "member",
            TargetType::Team => "team",
        }
    }
}

/// Who to notify when the primary target cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallthroughChoice {
    /// Notify every member of the project.
    AllMembers,
    /// Notify only recently active members.
    ActiveMembers,
    /// Notify no one.
    NoOne,
}

impl FallthroughChoice {
    /// Stable string form used in the wire encoding of a target key.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallthroughChoice::AllMembers => "all_members",
            FallthroughChoice::ActiveMembers => "active_members",
            FallthroughChoice::NoOne => "no_one",
        }
    }
}

/// Errors that can occur when parsing a target key from its string form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetKeyParseError {
    /// The key did not have the expected number of segments.
    #[error("malformed target key: {0}")]
    Malformed(String),

    /// The project segment was not a valid integer.
    #[error("invalid project id in target key: {0}")]
    InvalidProject(String),

    /// The target type segment was not recognized.
    #[error("unknown target type: {0}")]
    UnknownTargetType(String),

    /// The target identifier segment was not a valid integer.
    #[error("invalid target identifier: {0}")]
    InvalidIdentifier(String),

    /// The fallthrough segment was not recognized.
    #[error("unknown fallthrough choice: {0}")]
    UnknownFallthrough(String),
}

/// Uniquely identifies one aggregation bucket. Used as the sharding and
/// locking unit throughout the digest pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    /// The project the notifiable events belong to.
    pub project_id: u64,
    /// The kind of recipient.
    pub target_type: TargetType,
    /// Identifier of the member or team, when the target type requires one.
    pub target_identifier: Option<u64>,
    /// Fallback routing when the primary target resolves to no one.
    pub fallthrough_choice: Option<FallthroughChoice>,
}

impl TargetKey {
    /// Creates a key for an issue-owners target with an optional fallthrough.
    pub fn issue_owners(project_id: u64, fallthrough_choice: Option<FallthroughChoice>) -> Self {
        Self {
            project_id,
            target_type: TargetType::IssueOwners,
            target_identifier: None,
            fallthrough_choice,
        }
    }

    /// Creates a key for a single-member target.
    pub fn member(project_id: u64, member_id: u64) -> Self {
        Self {
            project_id,
            target_type: TargetType::Member,
            target_identifier: Some(member_id),
            fallthrough_choice: None,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identifier =
            self.target_identifier.map(|id| id.to_string()).unwrap_or_default();
        let fallthrough = self.fallthrough_choice.map(|c| c.as_str()).unwrap_or_default();
        write!(
            f,
            "{}:{}:{}:{}",
            self.project_id,
            self.target_type.as_str(),
            identifier,
            fallthrough
        )
    }
}

impl FromStr for TargetKey {
    type Err = TargetKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        let &[project, target_type, identifier, fallthrough] = segments.as_slice() else {
            return Err(TargetKeyParseError::Malformed(s.to_string()));
        };

        let project_id = project
            .parse::<u64>()
            .map_err(|_| TargetKeyParseError::InvalidProject(project.to_string()))?;

        let target_type = match target_type {
            "issue_owners" => TargetType::IssueOwners,
            "member" => TargetType::Member,
            "team" => TargetType::Team,
            other => return Err(TargetKeyParseError::UnknownTargetType(other.to_string())),
        };

        let target_identifier = if identifier.is_empty() {
            None
        } else {
            Some(
                identifier
                    .parse::<u64>()
                    .map_err(|_| TargetKeyParseError::InvalidIdentifier(identifier.to_string()))?,
            )
        };

        let fallthrough_choice = match fallthrough {
            "" => None,
            "all_members" => Some(FallthroughChoice::AllMembers),
            "active_members" => Some(FallthroughChoice::ActiveMembers),
            "no_one" => Some(FallthroughChoice::NoOne),
            other => return Err(TargetKeyParseError::UnknownFallthrough(other.to_string())),
        };

        Ok(TargetKey { project_id, target_type, target_identifier, fallthrough_choice })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        let keys = vec![
            TargetKey::issue_owners(42, Some(FallthroughChoice::ActiveMembers)),
            TargetKey::issue_owners(1, None),
            TargetKey::member(7, 99),
            TargetKey {
                project_id: 3,
                target_type: TargetType::Team,
                target_identifier: Some(12),
                fallthrough_choice: Some(FallthroughChoice::NoOne),
            },
        ];

        for key in keys {
            let encoded = key.to_string();
            let parsed: TargetKey = encoded.parse().unwrap();
            assert_eq!(parsed, key, "key {} did not round trip", encoded);
        }
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        let err = "42:member:7".parse::<TargetKey>().unwrap_err();
        assert!(matches!(err, TargetKeyParseError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_target_type() {
        let err = "42:robot:7:".parse::<TargetKey>().unwrap_err();
        assert_eq!(err, TargetKeyParseError::UnknownTargetType("robot".to_string()));
    }

    #[test]
    fn test_parse_rejects_bad_project_id() {
        let err = "abc:member:7:".parse::<TargetKey>().unwrap_err();
        assert!(matches!(err, TargetKeyParseError::InvalidProject(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_fallthrough() {
        let err = "42:issue_owners::everyone".parse::<TargetKey>().unwrap_err();
        assert_eq!(err, TargetKeyParseError::UnknownFallthrough("everyone".to_string()));
    }
}
