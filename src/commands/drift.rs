use super::{format_millis, holder_id, state_from_nodes, with_stack_lock, StackContext};
use crate::output::UserOutput;
use serde_json::json;
use stack_provider::{Provider, ResourceProvider, StateBackend};

pub async fn run_drift(ctx: &StackContext, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let nodes = ctx.saved_nodes().await?;
    let provider = ResourceProvider::new(ctx.provider_config()?);

    let mut reports = Vec::with_capacity(nodes.len());
    for node in &nodes {
        reports.push(provider.detect_drift(node).await);
    }

    if json {
        out.status(&serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        out.status(&format!("No saved state for stack '{}'", ctx.name()));
        return Ok(());
    }

    match ctx.backend.get_state_record(ctx.name()).await? {
        Some(record) => out.status(&format!(
            "Drift report for '{}' (state saved {}):",
            ctx.name(),
            format_millis(record.updated_at)
        )),
        None => out.status(&format!("Drift report for '{}':", ctx.name())),
    }
    out.status(&format!("{:-<50}", ""));
    for report in &reports {
        if report.has_drifted {
            let description = report.drift_description.as_deref().unwrap_or("drifted");
            out.warning(&format!("  x {:<24} {}", report.node_id, description));
        } else {
            out.status(&format!("  + {:<24} in sync", report.node_id));
        }
    }
    Ok(())
}

pub async fn run_refresh(ctx: &StackContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    let holder = holder_id();
    with_stack_lock(
        &*ctx.backend,
        ctx.name(),
        &holder,
        ctx.stack.lock_ttl_seconds(),
        || refresh_locked(ctx, &holder, out),
    )
    .await
}

async fn refresh_locked(ctx: &StackContext, holder: &str, out: &dyn UserOutput) -> anyhow::Result<()> {
    let mut nodes = ctx.saved_nodes().await?;
    let provider = ResourceProvider::new(ctx.provider_config()?);

    let mut cleared = Vec::new();
    for node in nodes.iter_mut() {
        let had_outputs = node.has_outputs();
        provider.refresh_state(node).await;
        if had_outputs && !node.has_outputs() {
            cleared.push(node.id().to_string());
        }
    }

    ctx.backend.save_state(ctx.name(), &state_from_nodes(&nodes)).await?;
    ctx.backend
        .append_audit_log(
            ctx.name(),
            &json!({ "action": "refresh", "holder": holder, "cleared": cleared }),
        )
        .await?;

    if cleared.is_empty() {
        out.success("All recorded nodes are responding");
    } else {
        for id in &cleared {
            out.warning(&format!("  Cleared stale outputs of '{}'", id));
        }
    }
    Ok(())
}
