use crate::Context;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};

pub fn run(_ctx: &Context, stage: &str) -> Result<()> {
    let stack = super::load_stack(stage)?;
    stack
        .cancel()
        .with_context(|| format!("Could not release the lock for stage {stage}"))?;

    ui::success(&format!("released lock for stage {stage}"));
    Ok(())
}
