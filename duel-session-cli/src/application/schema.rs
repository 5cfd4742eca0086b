use crate::infrastructure::error::{CliError, Result};
use duel_session_core::{GameMessage, RoleMessage};
use duel_session_p2p::infrastructure::{ClientFrame, ServerFrame};
use duel_session_p2p::{ActionData, SetupMessage};
use schemars::schema::RootSchema;
use schemars::schema_for;
use std::path::{Path, PathBuf};
use tracing::info;

fn schemas() -> Vec<(&'static str, RootSchema)> {
    vec![
        ("client_frame", schema_for!(ClientFrame)),
        ("server_frame", schema_for!(ServerFrame)),
        ("setup_message", schema_for!(SetupMessage)),
        ("action_data", schema_for!(ActionData)),
        ("role_message", schema_for!(RoleMessage)),
        ("game_message", schema_for!(GameMessage)),
    ]
}

/// Write one JSON Schema per wire message into `dir`
pub fn write_schemas(dir: &Path) -> Result<Vec<PathBuf>> {
    if dir.exists() && !dir.is_dir() {
        return Err(CliError::invalid_directory(dir.to_path_buf()));
    }
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for (name, schema) in schemas() {
        let json = serde_json::to_string_pretty(&schema)
            .map_err(|e| CliError::SchemaGeneration(format!("{}: {}", name, e)))?;
        let path = dir.join(format!("{}.schema.json", name));
        std::fs::write(&path, json)?;
        info!("📤 Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
