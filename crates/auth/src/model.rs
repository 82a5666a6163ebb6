//! RESTful RBAC model: subjects inherit roles via `g`, resources use
//! `keyMatch2` path patterns, actions are regex alternations over HTTP methods.

use std::path::Path;

use casbin::DefaultModel;

const MODEL: &str = include_str!("model.conf");

pub fn default_model() -> &'static str {
    MODEL
}

/// Read a model definition from disk (startup only).
pub fn read_model(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

pub(crate) async fn parse_model(text: &str) -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(text).await
}
