//! Saved views, their filter rules and capability checks.
//!
//! # Responsibility
//! - Compile per-schema rule filters into conjunctive predicates.
//! - Union the active rules of a view into the predicate its data set is
//!   defined by.
//! - Answer the view/read/moderate capability questions for an actor.
//!
//! # Invariants
//! - A view with zero active rules resolves to the empty set, never to
//!   "all observations".
//! - Rule compilation is total: unknown fields and malformed specs degrade
//!   to literal matches instead of failing or widening the result.
//! - Capability checks are pure over (view, actor, membership grants).

use crate::filter::predicate::Predicate;
use crate::filter::spec::FilterSpec;
use crate::model::schema::SchemaRegistry;
use crate::model::{Actor, ObservationTypeId, ProjectId, RuleId, UserId, ViewId};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Soft-delete lifecycle shared by views and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Active,
    Deleted,
}

impl LifecycleStatus {
    /// Stable string id used for storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a stored status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Per-usergroup grants a membership directory reports for one view.
///
/// `can_view`/`can_read` are granted per view; the moderate flag lives on
/// the usergroup itself, not on the view association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupGrant {
    pub can_view: bool,
    pub can_read: bool,
    pub group_can_moderate: bool,
}

/// External membership/grant lookup collaborator.
///
/// Grant storage belongs to the embedding application; the core only
/// consumes boolean answers.
pub trait MembershipDirectory {
    /// Whether the user administers the project.
    fn is_project_admin(&self, project: ProjectId, user: UserId) -> bool;

    /// Grant rows for every usergroup linking the user to the view.
    fn view_grants(&self, view: ViewId, user: UserId) -> Vec<GroupGrant>;
}

/// One per-schema filter set inside a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    id: RuleId,
    observation_type: ObservationTypeId,
    /// Field key -> opaque stored filter spec. `None` selects every
    /// observation of the type.
    filters: Option<BTreeMap<String, String>>,
    status: LifecycleStatus,
}

impl Rule {
    pub fn new(
        observation_type: ObservationTypeId,
        filters: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            observation_type,
            filters,
            status: LifecycleStatus::Active,
        }
    }

    /// Rehydrates a rule from storage.
    pub fn from_parts(
        id: RuleId,
        observation_type: ObservationTypeId,
        filters: Option<BTreeMap<String, String>>,
        status: LifecycleStatus,
    ) -> Self {
        Self {
            id,
            observation_type,
            filters,
            status,
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn observation_type(&self) -> ObservationTypeId {
        self.observation_type
    }

    pub fn filters(&self) -> Option<&BTreeMap<String, String>> {
        self.filters.as_ref()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == LifecycleStatus::Active
    }

    /// Soft-deletes the rule; the owning view stops compiling it.
    pub fn soft_delete(&mut self) {
        self.status = LifecycleStatus::Deleted;
    }

    /// Compiles this rule into a conjunctive predicate.
    ///
    /// The base term constrains the observation type; each filter entry
    /// contributes one field predicate. A filter key with no matching
    /// schema field compiles to a literal text match on the raw spec, which
    /// narrows the selected set instead of widening it.
    pub fn compile(&self, registry: &SchemaRegistry) -> Predicate {
        let mut terms = vec![Predicate::TypeIs(self.observation_type)];
        let schema = registry.get(self.observation_type);

        if let Some(filters) = &self.filters {
            for (key, raw) in filters {
                let spec = FilterSpec::decode(raw.as_str());
                let term = match schema.and_then(|schema| schema.field(key)) {
                    Some(field) => field.compile_filter(&spec),
                    None => Predicate::TextEq {
                        key: key.clone(),
                        value: raw.clone(),
                    },
                };
                terms.push(term);
            }
        }

        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::AllOf(terms)
        }
    }
}

/// A named, access-controlled selection of a project's observations.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    id: ViewId,
    project: ProjectId,
    name: String,
    description: Option<String>,
    creator: UserId,
    isprivate: bool,
    status: LifecycleStatus,
    created_at: i64,
    rules: Vec<Rule>,
}

impl View {
    pub fn new(
        project: ProjectId,
        name: impl Into<String>,
        creator: UserId,
        isprivate: bool,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project,
            name: name.into(),
            description: None,
            creator,
            isprivate,
            status: LifecycleStatus::Active,
            created_at: now_ms,
            rules: Vec::new(),
        }
    }

    /// Rehydrates a view from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ViewId,
        project: ProjectId,
        name: String,
        description: Option<String>,
        creator: UserId,
        isprivate: bool,
        status: LifecycleStatus,
        created_at: i64,
        rules: Vec<Rule>,
    ) -> Self {
        Self {
            id,
            project,
            name,
            description,
            creator,
            isprivate,
            status,
            created_at,
            rules,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub fn creator(&self) -> UserId {
        self.creator
    }

    pub fn is_private(&self) -> bool {
        self.isprivate
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Soft-deletes the view.
    pub fn soft_delete(&mut self) {
        self.status = LifecycleStatus::Deleted;
    }

    pub fn is_active(&self) -> bool {
        self.status == LifecycleStatus::Active
    }

    /// Resolves the view into the predicate defining its data set.
    ///
    /// The union (OR) of every active rule; with no active rules the view
    /// exposes nothing.
    pub fn resolve(&self, registry: &SchemaRegistry) -> Predicate {
        let mut terms: Vec<Predicate> = self
            .rules
            .iter()
            .filter(|rule| rule.is_active())
            .map(|rule| rule.compile(registry))
            .collect();
        match terms.len() {
            0 => Predicate::Nothing,
            1 => terms.remove(0),
            _ => Predicate::AnyOf(terms),
        }
    }

    /// Whether the actor may see that this view exists.
    pub fn can_view(&self, actor: Actor, members: &dyn MembershipDirectory) -> bool {
        match actor {
            Actor::Anonymous => !self.isprivate,
            Actor::User(user) => {
                members.is_project_admin(self.project, user)
                    || members
                        .view_grants(self.id, user)
                        .iter()
                        .any(|grant| grant.can_view)
            }
        }
    }

    /// Whether the actor may read the data the view exposes.
    pub fn can_read(&self, actor: Actor, members: &dyn MembershipDirectory) -> bool {
        match actor {
            Actor::Anonymous => !self.isprivate,
            Actor::User(user) => {
                members.is_project_admin(self.project, user)
                    || members
                        .view_grants(self.id, user)
                        .iter()
                        .any(|grant| grant.can_read)
            }
        }
    }

    /// Whether the actor may moderate observations exposed by the view.
    ///
    /// Never true for anonymous actors; gated on the usergroup-level
    /// moderate flag rather than a per-view grant.
    pub fn can_moderate(&self, actor: Actor, members: &dyn MembershipDirectory) -> bool {
        match actor {
            Actor::Anonymous => false,
            Actor::User(user) => {
                members.is_project_admin(self.project, user)
                    || members
                        .view_grants(self.id, user)
                        .iter()
                        .any(|grant| grant.group_can_moderate)
            }
        }
    }
}
