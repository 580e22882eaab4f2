use crate::patch::registry;
use anyhow::Result;
use serde_json::Value;

pub async fn list() -> Result<Value> {
    Ok(serde_json::to_value(registry::catalog())?)
}

pub async fn describe(kind: String) -> Result<Value> {
    Ok(serde_json::to_value(registry::describe(&kind)?)?)
}
