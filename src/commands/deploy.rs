use super::{holder_id, state_from_nodes, with_stack_lock, StackContext};
use crate::output::UserOutput;
use serde_json::json;
use stack_provider::provider::hook_installed;
use stack_provider::{DeploymentNode, Provider, ResourceProvider, StateBackend};
use std::sync::Arc;

pub async fn run_deploy(ctx: &StackContext, hold: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let stack = ctx.name().to_string();
    let holder = holder_id();

    let (provider, nodes) = with_stack_lock(
        &*ctx.backend,
        &stack,
        &holder,
        ctx.stack.lock_ttl_seconds(),
        || deploy_locked(ctx, &holder, out),
    )
    .await?;

    for node in &nodes {
        if let Some(outputs) = node.content_outputs() {
            out.success(&format!("  + {:<24} {} (pid {})", node.id(), outputs.url, outputs.pid));
        } else {
            out.status(&format!("  - {:<24} {} (not managed here)", node.id(), node.kind()));
        }
    }

    if hold {
        out.blank();
        out.status("Serving. Press Ctrl-C to stop.");
        if hook_installed() {
            // The interrupt hook stops every worker and exits with 130 or 143.
            std::future::pending::<()>().await;
        }
        tokio::signal::ctrl_c().await?;
        out.status("Stopping workers...");
    }
    provider.cleanup().await;

    if !hold {
        out.status("Deploy verified; workers stopped. Use --hold to keep them serving.");
    }
    Ok(())
}

/// Deploy body run under the stack lock. Returns the provider still owning
/// the started workers.
async fn deploy_locked(
    ctx: &StackContext,
    holder: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<(ResourceProvider, Vec<DeploymentNode>)> {
    let stack = ctx.name();
    out.status(&format!("Deploying stack '{}' as {}", stack, holder));

    let backend: Arc<dyn StateBackend> = ctx.backend.clone();
    let provider = ResourceProvider::new(ctx.provider_config()?).with_backend(backend, stack.to_string());

    let mut nodes = ctx.stack.nodes.clone();
    let previous = ctx.saved_nodes().await?;
    restore_outputs(&mut nodes, &previous);

    provider.pre_deploy(&mut nodes).await;
    if let Err(e) = provider.materialize(&mut nodes).await {
        let entry = json!({
            "action": "deploy",
            "status": "failed",
            "holder": holder,
            "error": e.to_string(),
        });
        if let Err(audit_err) = ctx.backend.append_audit_log(stack, &entry).await {
            tracing::warn!("Failed to record failed deploy: {}", audit_err);
        }
        provider.cleanup().await;
        out.error(&format!("Deploy of '{}' failed; workers started by this run were stopped", stack));
        return Err(e.into());
    }

    ctx.backend.save_state(stack, &state_from_nodes(&nodes)).await?;
    let node_ids: Vec<&str> = nodes.iter().map(|n| n.id()).collect();
    ctx.backend
        .append_audit_log(
            stack,
            &json!({
                "action": "deploy",
                "status": "succeeded",
                "holder": holder,
                "nodes": node_ids,
            }),
        )
        .await?;

    Ok((provider, nodes))
}

/// Carry outputs of previously saved nodes over to the declared ones.
fn restore_outputs(nodes: &mut [DeploymentNode], previous: &[DeploymentNode]) {
    for node in nodes.iter_mut() {
        if let Some(prev) = previous.iter().find(|p| p.id() == node.id()) {
            node.adopt_outputs(prev);
        }
    }
}
