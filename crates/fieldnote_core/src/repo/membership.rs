//! In-memory membership/grant directory.
//!
//! # Responsibility
//! - Provide a [`MembershipDirectory`] implementation for tests and
//!   embedders that keep membership in process memory.
//!
//! Membership and grant storage is owned by the embedding application;
//! this registry only answers the boolean questions the capability checks
//! ask.

use crate::model::view::{GroupGrant, MembershipDirectory};
use crate::model::{ProjectId, UserId, ViewId};
use std::collections::{BTreeMap, BTreeSet};

/// Simple map-backed grant registry.
#[derive(Debug, Default)]
pub struct InMemoryMembershipDirectory {
    admins: BTreeSet<(ProjectId, UserId)>,
    grants: BTreeMap<(ViewId, UserId), Vec<GroupGrant>>,
}

impl InMemoryMembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user as administrator of a project.
    pub fn add_admin(&mut self, project: ProjectId, user: UserId) {
        self.admins.insert((project, user));
    }

    /// Records one usergroup grant linking a user to a view.
    pub fn add_grant(&mut self, view: ViewId, user: UserId, grant: GroupGrant) {
        self.grants.entry((view, user)).or_default().push(grant);
    }
}

impl MembershipDirectory for InMemoryMembershipDirectory {
    fn is_project_admin(&self, project: ProjectId, user: UserId) -> bool {
        self.admins.contains(&(project, user))
    }

    fn view_grants(&self, view: ViewId, user: UserId) -> Vec<GroupGrant> {
        self.grants
            .get(&(view, user))
            .cloned()
            .unwrap_or_default()
    }
}
