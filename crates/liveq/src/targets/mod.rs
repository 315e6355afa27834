//! Target specifications and their resolution into concrete host sets.

mod resolver;

pub use resolver::{ResolveError, TargetResolver};

use serde::{Deserialize, Serialize};

/// Kind of campaign target. An explicit discriminant plus a numeric id;
/// resolution is a flat match, never dispatch on polymorphic target
/// objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Host,
    Label,
    Team,
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetType::Host => write!(f, "host"),
            TargetType::Label => write!(f, "label"),
            TargetType::Team => write!(f, "team"),
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" => Ok(TargetType::Host),
            "label" => Ok(TargetType::Label),
            "team" => Ok(TargetType::Team),
            _ => Err(format!("unknown target type: {}", s)),
        }
    }
}

/// Join row tying a campaign to one declared target. Purely descriptive;
/// execution uses the resolved host-ID set, not these rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTarget {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub campaign_id: u64,
    pub target_id: u64,
}

/// Explicit target selection before resolution.
///
/// Resolution unions all three buckets and dedups; an empty spec resolves
/// to an empty set rather than an error, so multi-source specs can be
/// unioned before the caller rejects empties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub host_ids: Vec<u64>,
    #[serde(default)]
    pub label_ids: Vec<u64>,
    #[serde(default)]
    pub team_ids: Vec<u64>,
}

impl TargetSpec {
    pub fn is_empty(&self) -> bool {
        self.host_ids.is_empty() && self.label_ids.is_empty() && self.team_ids.is_empty()
    }
}

/// Viewer scoping threaded through to the datastore on every resolution
/// call. Opaque to the resolver itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFilter {
    /// Restrict visibility to a single team, if the viewer is scoped.
    pub team_id: Option<u64>,
    /// Whether label-based observer-can-run visibility applies.
    pub observer_can_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_round_trip() {
        for ty in [TargetType::Host, TargetType::Label, TargetType::Team] {
            assert_eq!(ty.to_string().parse::<TargetType>(), Ok(ty));
        }
        assert!("group".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_spec_emptiness() {
        assert!(TargetSpec::default().is_empty());
        assert!(!TargetSpec {
            team_ids: vec![3],
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn test_campaign_target_tagged_shape() {
        let target = CampaignTarget {
            target_type: TargetType::Label,
            campaign_id: 4,
            target_id: 7,
        };
        let json = serde_json::to_value(target).unwrap();
        assert_eq!(json["type"], "label");
        assert_eq!(json["target_id"], 7);
    }
}
