//! `conductor validate`: parse, validate and compile a plan file.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use conductor_core::codec::VersionedJsonCodec;
use conductor_core::plan::{PlanDocument, PlanError, compile_plan, load_plan_file};
use console::style;

/// Load `file` and turn plan errors into readable messages.
pub fn load_plan(file: &Path) -> Result<PlanDocument> {
    load_plan_file(file)
        .map_err(|e| match e {
            PlanError::ParseError(msg) => anyhow::anyhow!("failed to parse plan YAML: {msg}"),
            PlanError::ValidationError(msg) => anyhow::anyhow!("plan validation failed: {msg}"),
            other => anyhow::anyhow!("failed to load plan: {other}"),
        })
        .with_context(|| format!("plan file {}", file.display()))
}

pub fn validate_plan_file(file: &Path, json: bool) -> Result<()> {
    let doc = load_plan(file)?;
    let plan = compile_plan(&doc, &VersionedJsonCodec).context("failed to compile plan")?;

    if json {
        let summary = serde_json::json!({
            "plan_id": doc.plan_id,
            "root": doc.root,
            "nodes": plan.len(),
            "valid": true,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Plan '{}' is valid ({} nodes, root '{}')",
        style("✓").green().bold(),
        style(&doc.plan_id).cyan(),
        plan.len(),
        doc.root
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Category"),
            Cell::new("Advisers"),
            Cell::new("Children"),
        ]);
    for node in &doc.nodes {
        let advisers: Vec<&str> = node
            .advisers
            .iter()
            .map(|a| a.adviser_type.as_str())
            .collect();
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(&node.step_type),
            Cell::new(format!("{:?}", node.category)),
            Cell::new(advisers.join(", ")),
            Cell::new(node.child_references().join(", ")),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_plan_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION
    parameters: { child: hello }
  - id: hello
    type: ECHO
    parameters: { message: hi }
"#,
        )
        .unwrap();
        validate_plan_file(&path, true).unwrap();
    }

    #[test]
    fn unknown_child_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION
    parameters: { child: missing }
"#,
        )
        .unwrap();
        let err = validate_plan_file(&path, true).unwrap_err();
        assert!(format!("{err:#}").contains("missing"));
    }

    #[test]
    fn demo_plans_are_valid() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        for name in ["release.yaml", "approval_chain.yaml"] {
            validate_plan_file(&demos.join(name), true).unwrap();
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_plan(Path::new("/nonexistent/plan.yaml")).is_err());
    }
}
