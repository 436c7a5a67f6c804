use super::StackContext;
use crate::output::UserOutput;
use stack_provider::StateBackend;

pub async fn run_lock_status(ctx: &StackContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    match ctx.backend.check_lock(ctx.name()).await? {
        None => out.status(&format!("Stack '{}' is not locked", ctx.name())),
        Some(lock) if lock.is_expired_at(now) => out.warning(&format!(
            "Stack '{}' has an expired lock from '{}' ({}s old, ttl {}s)",
            ctx.name(),
            lock.holder,
            lock.age_ms(now) / 1000,
            lock.ttl
        )),
        Some(lock) => out.status(&format!(
            "Stack '{}' is locked by '{}' ({}s old, ttl {}s)",
            ctx.name(),
            lock.holder,
            lock.age_ms(now) / 1000,
            lock.ttl
        )),
    }
    Ok(())
}

pub async fn run_lock_release(ctx: &StackContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    if let Some(lock) = ctx.backend.check_lock(ctx.name()).await? {
        tracing::warn!("Force-releasing lock held by '{}'", lock.holder);
    }
    ctx.backend.release_lock(ctx.name()).await?;
    out.success(&format!("Released lock of '{}'", ctx.name()));
    Ok(())
}
