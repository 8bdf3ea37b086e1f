//! Workflow alias registry (spec §3 `WorkflowAlias`).
//!
//! Grounded on `make_workflow_alias_list_and_map` in
//! `bridge_server/assistant.py`: load a curated alias list from a JSON
//! file, then walk the workflow directory and append any `.json` template
//! not already covered, defaulting its alias to its filename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// One entry in the workflow alias list, exposed verbatim by
/// `GET /workflow-list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAlias {
    pub alias: String,
    pub fn_: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct RawAliasEntry {
    alias: String,
    #[serde(rename = "fn")]
    fn_: String,
    #[serde(default)]
    description: String,
}

/// Alias list plus the alias→filename lookup map used to resolve a
/// caller-supplied workflow name into a template file.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    aliases: Vec<WorkflowAlias>,
    alias_map: HashMap<String, String>,
    workflow_dir: PathBuf,
}

impl WorkflowRegistry {
    /// Load the alias file at `alias_path` (if present) and supplement it
    /// with any `.json` template under `workflow_dir` that the alias file
    /// didn't already mention.
    pub async fn load(alias_path: impl AsRef<Path>, workflow_dir: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let workflow_dir = workflow_dir.into();
        let mut aliases = load_curated_aliases(alias_path.as_ref()).await?;

        let known_fns: std::collections::HashSet<String> =
            aliases.iter().map(|a| a.fn_.clone()).collect();

        let mut entries = tokio::fs::read_dir(&workflow_dir)
            .await
            .map_err(|e| ServerError::Internal(format!("reading workflow dir: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            if known_fns.contains(fname) {
                continue;
            }
            aliases.push(WorkflowAlias {
                alias: fname.to_owned(),
                fn_: fname.to_owned(),
                description: String::new(),
            });
        }

        let alias_map = aliases
            .iter()
            .map(|a| (a.alias.clone(), a.fn_.clone()))
            .collect();

        Ok(Self {
            aliases,
            alias_map,
            workflow_dir,
        })
    }

    pub fn list(&self) -> &[WorkflowAlias] {
        &self.aliases
    }

    /// Resolve a caller-supplied alias to the absolute path of its
    /// template file. Fails with [`ServerError::UnknownWorkflow`] if the
    /// alias isn't registered.
    pub fn resolve_path(&self, alias: &str) -> Result<PathBuf, ServerError> {
        let fn_ = self
            .alias_map
            .get(alias)
            .ok_or_else(|| ServerError::UnknownWorkflow(alias.to_owned()))?;
        Ok(self.workflow_dir.join(fn_))
    }
}

async fn load_curated_aliases(path: &Path) -> Result<Vec<WorkflowAlias>, ServerError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ServerError::Internal(e.to_string())),
    };
    let raw: Vec<RawAliasEntry> = serde_json::from_slice(&bytes)
        .map_err(|e| ServerError::Internal(format!("parsing workflow alias file: {e}")))?;
    Ok(raw
        .into_iter()
        .map(|r| WorkflowAlias {
            alias: r.alias,
            fn_: r.fn_,
            description: r.description,
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn supplements_curated_list_with_unlisted_templates() {
        let dir = tempfile::tempdir().unwrap();
        let alias_path = dir.path().join("workflow_alias.json");
        let workflow_dir = dir.path().join("workflows");
        tokio::fs::create_dir_all(&workflow_dir).await.unwrap();

        tokio::fs::write(
            &alias_path,
            serde_json::json!([
                {"alias": "txt2img", "fn": "basic.json", "description": "basic text to image"}
            ])
            .to_string(),
        )
        .await
        .unwrap();
        tokio::fs::write(workflow_dir.join("basic.json"), "{}").await.unwrap();
        tokio::fs::write(workflow_dir.join("upscale.json"), "{}").await.unwrap();

        let registry = WorkflowRegistry::load(&alias_path, &workflow_dir).await.unwrap();

        assert_eq!(registry.resolve_path("txt2img").unwrap(), workflow_dir.join("basic.json"));
        assert_eq!(
            registry.resolve_path("upscale.json").unwrap(),
            workflow_dir.join("upscale.json")
        );
        assert!(matches!(
            registry.resolve_path("missing"),
            Err(ServerError::UnknownWorkflow(_))
        ));
    }

    #[tokio::test]
    async fn missing_alias_file_falls_back_to_directory_scan() {
        let dir = tempfile::tempdir().unwrap();
        let alias_path = dir.path().join("does_not_exist.json");
        let workflow_dir = dir.path().join("workflows");
        tokio::fs::create_dir_all(&workflow_dir).await.unwrap();
        tokio::fs::write(workflow_dir.join("only.json"), "{}").await.unwrap();

        let registry = WorkflowRegistry::load(&alias_path, &workflow_dir).await.unwrap();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].alias, "only.json");
    }
}
