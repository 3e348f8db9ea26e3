//! Group membership and user identity, consumed through narrow traits.
//!
//! The engine only asks yes/no questions of a group directory and reads
//! identities from a user directory. [`InMemoryDirectory`] backs both for the
//! daemon and for tests.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{GroupId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}

/// Actions gated by group permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    CreateBet,
    PlaceBet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
    /// Can see bets, can not create or join them
    Viewer,
}

impl GroupRole {
    pub fn allows(&self, action: GroupAction) -> bool {
        match (self, action) {
            (GroupRole::Admin, _) | (GroupRole::Member, _) => true,
            (GroupRole::Viewer, GroupAction::CreateBet | GroupAction::PlaceBet) => false,
        }
    }
}

pub trait GroupDirectory: Send + Sync {
    fn is_member(&self, user: UserId, group: GroupId) -> bool;
    fn has_permission(&self, user: UserId, group: GroupId, action: GroupAction) -> bool;
}

pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: UserId) -> Option<User>;
    fn record_user(&self, user: User);
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, User>,
    groups: DashMap<GroupId, HashMap<UserId, GroupRole>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, group: GroupId, user: UserId, role: GroupRole) {
        self.groups.entry(group).or_default().insert(user, role);
    }

    pub fn remove_member(&self, group: GroupId, user: UserId) {
        if let Some(mut members) = self.groups.get_mut(&group) {
            members.remove(&user);
        }
    }

    fn role(&self, user: UserId, group: GroupId) -> Option<GroupRole> {
        self.groups.get(&group).and_then(|members| members.get(&user).copied())
    }
}

impl GroupDirectory for InMemoryDirectory {
    fn is_member(&self, user: UserId, group: GroupId) -> bool {
        self.role(user, group).is_some()
    }

    fn has_permission(&self, user: UserId, group: GroupId, action: GroupAction) -> bool {
        self.role(user, group).map(|role| role.allows(action)).unwrap_or(false)
    }
}

impl UserDirectory for InMemoryDirectory {
    fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    fn record_user(&self, user: User) {
        self.users.insert(user.id, user);
    }
}
