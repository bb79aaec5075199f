use std::env;

use anyhow::{anyhow, Result};

/// The identity the orchestrator hands this node: its own pod name, the
/// address the peer RPC server binds, and the namespace to watch.
#[derive(Debug, Clone)]
pub(crate) struct Environment {
    pub name: String,
    pub ip: String,
    pub namespace: String,
}

impl Environment {
    pub fn from_env() -> Result<Environment> {
        Ok(Environment {
            name: required("NAME")?,
            ip: required("IP")?,
            namespace: required("NAMESPACE")?,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("could not find {} in the environment variables", key))
}
