//! Writes the agent's OpenAPI document.
//!
//! ```bash
//! cargo run --bin gen-openapi -p homebound-agent            # ./openapi.json at the workspace root
//! cargo run --bin gen-openapi -p homebound-agent -- out.json
//! ```

use std::path::PathBuf;

use anyhow::Context;
use serde_json::Value;

fn default_output() -> anyhow::Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .ancestors()
        .nth(2)
        .context("agent crate is not inside a workspace")?;
    Ok(root.join("openapi.json"))
}

fn main() -> anyhow::Result<()> {
    let output = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_output()?,
    };

    let json = homebound_agent::api::get_openapi_json()?;
    let document: Value = serde_json::from_str(&json)?;
    let operations: Vec<&str> = document["paths"]
        .as_object()
        .into_iter()
        .flat_map(|paths| paths.values())
        .filter_map(Value::as_object)
        .flat_map(|methods| methods.values())
        .filter_map(|operation| operation["operationId"].as_str())
        .collect();

    std::fs::write(&output, &json)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{}: {} operations ({})",
        output.display(),
        operations.len(),
        operations.join(", ")
    );
    Ok(())
}
