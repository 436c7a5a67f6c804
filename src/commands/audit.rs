use super::{format_millis, StackContext};
use crate::output::UserOutput;

pub async fn run_audit(ctx: &StackContext, limit: usize, out: &dyn UserOutput) -> anyhow::Result<()> {
    let entries = ctx.backend.get_audit_log(ctx.name(), Some(limit)).await?;
    if entries.is_empty() {
        out.status(&format!("No audit entries for '{}'", ctx.name()));
        return Ok(());
    }

    for entry in entries {
        out.status(&format!(
            "{:>5}  {}  {}",
            entry.id,
            format_millis(entry.created_at),
            entry.entry
        ));
    }
    Ok(())
}
