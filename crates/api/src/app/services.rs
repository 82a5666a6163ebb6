//! Startup wiring: pick a store, prepare it, and assemble [`AppState`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use gatekeeper_auth::model::{default_model, read_model};
use gatekeeper_auth::{PolicyEnforcer, PolicyError, PolicyStore, TokenService, UserLifecycle, UserStore};
use gatekeeper_infra::{InMemoryDirectory, PostgresDirectory};

use crate::app::AppState;
use crate::config::Config;

/// Build an [`AppState`] over one store implementing both user and rule
/// storage; the default rules are seeded and loaded.
pub async fn state_with_store<S>(
    tokens: Arc<TokenService>,
    store: Arc<S>,
    model: &str,
) -> Result<AppState, PolicyError>
where
    S: PolicyStore + UserStore + 'static,
{
    let enforcer = PolicyEnforcer::new(store.clone(), model).await?;
    let seeded = enforcer.seed_default_policies().await?;
    if seeded > 0 {
        info!(seeded, "default policies seeded");
    }
    Ok(AppState::new(
        tokens,
        Arc::new(enforcer),
        UserLifecycle::new(store),
    ))
}

/// Everything `main` needs before serving. Any error here is fatal.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let tokens = TokenService::load(&config.private_key_path, &config.public_key_path)
        .context("loading token signing keys")?;
    let tokens = Arc::new(tokens);

    let model = match &config.model_path {
        Some(path) => read_model(path)
            .with_context(|| format!("reading policy model {}", path.display()))?,
        None => default_model().to_string(),
    };

    let state = match &config.database {
        Some(db) => {
            let store = PostgresDirectory::connect(&db.url, db.max_connections)
                .await
                .context("connecting to postgres")?;
            store.ensure_schema().await.context("creating schema")?;
            state_with_store(tokens, Arc::new(store), &model).await?
        }
        None => {
            warn!("no database configured; using in-memory store (data is lost on exit)");
            state_with_store(tokens, Arc::new(InMemoryDirectory::new()), &model).await?
        }
    };

    if let Some(root) = config.root_admin.clone() {
        match state.users.bootstrap_root_admin(root).await? {
            Some(user) => info!(user_id = %user.id, "root admin created"),
            None => info!("users present; root admin bootstrap skipped"),
        }
    }

    Ok(state)
}
