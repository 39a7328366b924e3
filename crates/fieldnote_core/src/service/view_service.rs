//! View use-case service.
//!
//! # Responsibility
//! - Manage saved views and their rules through the repository contract.
//! - Resolve views into predicates and hand them to observation storage.
//! - Expose the view/read/moderate capability checks against loaded views.
//!
//! # Invariants
//! - A view with no active rules yields an empty data set without touching
//!   observation storage.
//! - Capability decisions stay in the model; this layer only loads state.

use crate::filter::predicate::Predicate;
use crate::model::observation::Observation;
use crate::model::schema::SchemaRegistry;
use crate::model::view::{MembershipDirectory, Rule, View};
use crate::model::{Actor, ProjectId, RuleId, ViewId};
use crate::repo::observation_repo::{ObservationRepository, RepoError};
use crate::repo::view_repo::ViewRepository;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-facing error for view use-cases.
#[derive(Debug)]
pub enum ViewServiceError {
    /// No visible view (or rule) with the given id.
    NotFound(ViewId),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for ViewServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "view not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ViewServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ViewServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Use-case service for saved, access-controlled views.
pub struct ViewService<R: ViewRepository> {
    repo: R,
}

impl<R: ViewRepository> ViewService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Persists a view and its current rules.
    pub fn create_view(&mut self, view: &View) -> Result<ViewId, ViewServiceError> {
        let id = self.repo.create_view(view)?;
        info!(
            "event=view_create module=service status=ok id={id} project={} rules={}",
            view.project(),
            view.rules().len()
        );
        Ok(id)
    }

    /// Loads one visible view with its rules.
    pub fn get_view(&self, id: ViewId) -> Result<Option<View>, ViewServiceError> {
        Ok(self.repo.get_view(id, false)?)
    }

    /// Lists a project's visible views.
    pub fn list_views(&self, project: ProjectId) -> Result<Vec<View>, ViewServiceError> {
        Ok(self.repo.list_views(project)?)
    }

    /// Appends a rule to an existing view.
    pub fn add_rule(&mut self, view: ViewId, rule: &Rule) -> Result<(), ViewServiceError> {
        self.repo.add_rule(view, rule)?;
        info!(
            "event=rule_add module=service status=ok view={view} rule={} type={}",
            rule.id(),
            rule.observation_type()
        );
        Ok(())
    }

    /// Soft-deletes one rule; the next resolve excludes it.
    pub fn delete_rule(&mut self, rule: RuleId) -> Result<(), ViewServiceError> {
        self.repo.soft_delete_rule(rule)?;
        info!("event=rule_delete module=service status=ok rule={rule}");
        Ok(())
    }

    /// Soft-deletes a view.
    pub fn delete_view(&mut self, view: ViewId) -> Result<(), ViewServiceError> {
        self.repo.soft_delete_view(view)?;
        info!("event=view_delete module=service status=ok view={view}");
        Ok(())
    }

    /// Resolves a view into the predicate defining its data set.
    pub fn resolve(
        &self,
        id: ViewId,
        registry: &SchemaRegistry,
    ) -> Result<Predicate, ViewServiceError> {
        let view = self.load(id)?;
        Ok(view.resolve(registry))
    }

    /// Resolves a view and executes it against observation storage.
    pub fn data<O: ObservationRepository>(
        &self,
        id: ViewId,
        registry: &SchemaRegistry,
        observations: &O,
    ) -> Result<Vec<Observation>, ViewServiceError> {
        let view = self.load(id)?;
        let predicate = view.resolve(registry);
        if predicate == Predicate::Nothing {
            return Ok(Vec::new());
        }
        observations
            .query(view.project(), &predicate)
            .map_err(ViewServiceError::Repo)
    }

    /// Whether the actor may see that the view exists.
    pub fn can_view(
        &self,
        id: ViewId,
        actor: Actor,
        members: &dyn MembershipDirectory,
    ) -> Result<bool, ViewServiceError> {
        Ok(self.load(id)?.can_view(actor, members))
    }

    /// Whether the actor may read the view's data.
    pub fn can_read(
        &self,
        id: ViewId,
        actor: Actor,
        members: &dyn MembershipDirectory,
    ) -> Result<bool, ViewServiceError> {
        Ok(self.load(id)?.can_read(actor, members))
    }

    /// Whether the actor may moderate the view's data.
    pub fn can_moderate(
        &self,
        id: ViewId,
        actor: Actor,
        members: &dyn MembershipDirectory,
    ) -> Result<bool, ViewServiceError> {
        Ok(self.load(id)?.can_moderate(actor, members))
    }

    fn load(&self, id: ViewId) -> Result<View, ViewServiceError> {
        self.repo
            .get_view(id, false)?
            .ok_or(ViewServiceError::NotFound(id))
    }
}
