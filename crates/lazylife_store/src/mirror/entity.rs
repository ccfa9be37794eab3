//! Entities mirrored to the remote backend.

use crate::binding::Storable;
use crate::identity::KeyScope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record kept locally as a list under one logical key and mirrored
/// row-per-entity into one remote table.
pub trait MirroredEntity: Storable {
    const TABLE: &'static str;
    const LOGICAL_KEY: &'static str;
    const SCOPE: KeyScope;

    /// Identifying key; entities with equal keys replace each other whole.
    fn entity_key(&self) -> String;

    /// Whether a pulled entity belongs in `identity`'s local snapshot.
    fn is_relevant_to(&self, identity: &str) -> bool;
}

/// Collaboration group shared across identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub shared_notes: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            members: vec![owner_id.clone()],
            owner_id,
            shared_notes: Vec::new(),
        }
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.members.iter().any(|member| member == user_id)
    }
}

impl MirroredEntity for Group {
    const TABLE: &'static str = "groups";
    const LOGICAL_KEY: &'static str = "groups";
    const SCOPE: KeyScope = KeyScope::Global;

    fn entity_key(&self) -> String {
        self.id.clone()
    }

    fn is_relevant_to(&self, identity: &str) -> bool {
        self.has_member(identity)
    }
}

/// Public profile of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: String,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            bio: String::new(),
        }
    }
}

impl MirroredEntity for Profile {
    const TABLE: &'static str = "profiles";
    const LOGICAL_KEY: &'static str = "profiles";
    const SCOPE: KeyScope = KeyScope::Identity;

    fn entity_key(&self) -> String {
        self.user_id.clone()
    }

    fn is_relevant_to(&self, identity: &str) -> bool {
        self.user_id == identity
    }
}

#[cfg(test)]
mod tests {
    use super::{Group, MirroredEntity, Profile};

    #[test]
    fn group_owner_is_a_member() {
        let group = Group::new("Book club", "u1");
        assert!(group.is_relevant_to("u1"));
        assert!(!group.is_relevant_to("u2"));
        assert_eq!(group.entity_key(), group.id);
    }

    #[test]
    fn profile_is_relevant_only_to_its_user() {
        let profile = Profile::new("u1", "Ada");
        assert!(profile.is_relevant_to("u1"));
        assert!(!profile.is_relevant_to("guest"));
    }

    #[test]
    fn group_tolerates_missing_optional_fields() {
        let group: Group =
            serde_json::from_str(r#"{"id":"g1","name":"Team","owner_id":"u1"}"#).unwrap();
        assert!(group.members.is_empty());
        assert!(group.has_member("u1"));
    }
}
