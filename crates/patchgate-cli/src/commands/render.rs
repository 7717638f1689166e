//! Render command - apply an object's patch directive offline

use clap::{Args, ValueEnum};
use patchgate_core::{ImpersonationContext, PatchOutcome, ResourceTypeKey, SchemaModels, apply_patch};
use patchgate_engine::Engine;
use serde_json::{Value as JsonValue, json};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Object to admit (YAML or JSON)
    #[arg(long, env = "PATCHGATE_OBJECT")]
    pub object: PathBuf,

    /// OpenAPI v2 document, needed for strategic merge patches
    #[arg(long, env = "PATCHGATE_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Username the directive is evaluated as
    #[arg(long, default_value = "system:admin", env = "PATCHGATE_USER")]
    pub user: String,

    /// Group of the evaluating user (repeatable)
    #[arg(long = "group", env = "PATCHGATE_GROUPS", value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml, env = "PATCHGATE_OUTPUT")]
    pub output: OutputFormat,

    /// Allow undefined template variables
    #[arg(long, env = "PATCHGATE_LENIENT")]
    pub lenient: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// Run the render command
///
/// Cluster lookups are not available offline; `lookup` returns `{}`.
pub fn run(args: &RenderArgs) -> Result<()> {
    let object = load_object(&args.object)?;
    let models = match &args.schema {
        Some(path) => SchemaModels::from_document(&fs::read(path)?)?,
        None => SchemaModels::empty(),
    };
    let identity = ImpersonationContext::new(&args.user).with_groups(args.groups.iter().cloned());

    let outcome = render(&object, &models, &identity, !args.lenient)?;
    let (patched, diff) = match &outcome {
        Some(outcome) => {
            let diff = serde_json::to_value(&outcome.diff)
                .map_err(|e| CliError::internal(e.to_string()))?;
            (outcome.patched.clone(), diff)
        }
        None => {
            tracing::info!("object carries no patch directive");
            (object, json!([]))
        }
    };

    print!("{}", format_output(&patched, &diff, args.output)?);
    Ok(())
}

/// Render and apply the directive; `None` when there is none
pub fn render(
    object: &JsonValue,
    models: &SchemaModels,
    identity: &ImpersonationContext,
    strict: bool,
) -> Result<Option<PatchOutcome>> {
    let Some(directive) = Engine::new(strict).render(object, identity)? else {
        return Ok(None);
    };

    let key = ResourceTypeKey::from_api_version(
        object.get("apiVersion").and_then(JsonValue::as_str).unwrap_or_default(),
        object.get("kind").and_then(JsonValue::as_str).unwrap_or_default(),
    );
    let original = serde_json::to_vec(object).map_err(|e| CliError::internal(e.to_string()))?;
    let outcome = apply_patch(&original, &directive.patch, directive.patch_type, &key, models)?;
    Ok(Some(outcome))
}

fn load_object(path: &Path) -> Result<JsonValue> {
    let content = fs::read_to_string(path)?;
    let object: JsonValue = serde_yaml::from_str(&content)
        .map_err(|e| CliError::input(format!("{}: {}", path.display(), e)))?;
    if !object.is_object() {
        return Err(CliError::input(format!("{}: not a Kubernetes object", path.display())));
    }
    Ok(object)
}

/// Final object followed by the JSON patch that produces it
fn format_output(patched: &JsonValue, diff: &JsonValue, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            let object = serde_yaml::to_string(patched).map_err(|e| CliError::internal(e.to_string()))?;
            let diff = serde_yaml::to_string(diff).map_err(|e| CliError::internal(e.to_string()))?;
            Ok(format!("{}---\n{}", object, diff))
        }
        OutputFormat::Json => {
            let out = serde_json::to_string_pretty(&json!({"object": patched, "patch": diff}))
                .map_err(|e| CliError::internal(e.to_string()))?;
            Ok(format!("{}\n", out))
        }
    }
}
