use crate::Context;
use crate::cli::ImportArgs;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use stackops::ImportOptions;

pub fn run(_ctx: &Context, stage: &str, args: ImportArgs) -> Result<()> {
    let stack = super::load_stack(stage)?;
    let urn = stack
        .import_resource(&ImportOptions {
            ty: args.ty,
            name: args.name,
            id: args.id,
            parent: args.parent,
        })
        .with_context(|| format!("Could not import resource into stage {stage}"))?;

    ui::success(&format!("imported as {urn}"));
    Ok(())
}
