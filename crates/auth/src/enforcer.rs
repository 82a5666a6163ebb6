//! Policy enforcement over the durable policy store.
//!
//! The enforcer keeps a Casbin evaluator built from the last loaded
//! [`PolicySnapshot`]. Callers reload before each decision so that grouping
//! changes committed by concurrent requests are observed.

use std::sync::Arc;

use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::model::parse_model;
use crate::policy::{PolicySnapshot, default_policies};
use crate::store::{PolicyStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid policy model: {0}")]
    Model(String),

    #[error("policy evaluation failed: {0}")]
    Evaluation(String),
}

impl From<StoreError> for PolicyError {
    fn from(value: StoreError) -> Self {
        PolicyError::StoreUnavailable(value.to_string())
    }
}

struct Loaded {
    enforcer: Enforcer,
    snapshot: PolicySnapshot,
}

pub struct PolicyEnforcer {
    store: Arc<dyn PolicyStore>,
    /// Parsed once; every reload builds its evaluator from a clone.
    model: DefaultModel,
    loaded: RwLock<Loaded>,
}

impl core::fmt::Debug for PolicyEnforcer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyEnforcer").finish_non_exhaustive()
    }
}

impl PolicyEnforcer {
    /// Validate `model` and load the current rules from `store`.
    pub async fn new(store: Arc<dyn PolicyStore>, model: &str) -> Result<Self, PolicyError> {
        let model = parse_model(model)
            .await
            .map_err(|e| PolicyError::Model(e.to_string()))?;
        let snapshot = store.load_policy().await?;
        let enforcer = build_enforcer(&model, &snapshot).await?;
        Ok(Self {
            store,
            model,
            loaded: RwLock::new(Loaded { enforcer, snapshot }),
        })
    }

    /// Insert the default admin/user rules that are not present yet, then
    /// reload. Returns how many rules were added.
    #[instrument(skip(self), err)]
    pub async fn seed_default_policies(&self) -> Result<usize, PolicyError> {
        let mut added = 0;
        for rule in default_policies() {
            if !self.store.has_policy(&rule).await? && self.store.add_policy(&rule).await? {
                info!(subject = %rule.subject, object = %rule.object, action = %rule.action, "seeded policy");
                added += 1;
            }
        }
        self.reload_policy().await?;
        Ok(added)
    }

    /// Re-read every rule from the store and rebuild the evaluator.
    pub async fn reload_policy(&self) -> Result<(), PolicyError> {
        let snapshot = self.store.load_policy().await?;
        let enforcer = build_enforcer(&self.model, &snapshot).await?;
        debug!(
            policies = snapshot.policies.len(),
            groupings = snapshot.groupings.len(),
            "policy reloaded"
        );
        *self.loaded.write().await = Loaded { enforcer, snapshot };
        Ok(())
    }

    /// Decide whether `subject` may perform `action` on `resource` under the
    /// rules loaded by the last reload.
    pub async fn enforce(&self, subject: &str, resource: &str, action: &str) -> Result<bool, PolicyError> {
        let loaded = self.loaded.read().await;
        loaded
            .enforcer
            .enforce((subject, resource, action))
            .map_err(|e| PolicyError::Evaluation(e.to_string()))
    }

    /// Rules as of the last reload.
    pub async fn rules(&self) -> PolicySnapshot {
        self.loaded.read().await.snapshot.clone()
    }
}

async fn build_enforcer(model: &DefaultModel, snapshot: &PolicySnapshot) -> Result<Enforcer, PolicyError> {
    let mut enforcer = Enforcer::new(model.clone(), MemoryAdapter::default())
        .await
        .map_err(|e| PolicyError::Model(e.to_string()))?;

    for policy in &snapshot.policies {
        enforcer
            .add_policy(vec![
                policy.subject.clone(),
                policy.object.clone(),
                policy.action.clone(),
            ])
            .await
            .map_err(|e| PolicyError::Evaluation(e.to_string()))?;
    }
    for grouping in &snapshot.groupings {
        enforcer
            .add_grouping_policy(vec![grouping.user.clone(), grouping.role.clone()])
            .await
            .map_err(|e| PolicyError::Evaluation(e.to_string()))?;
    }

    enforcer
        .build_role_links()
        .map_err(|e| PolicyError::Evaluation(e.to_string()))?;
    Ok(enforcer)
}
