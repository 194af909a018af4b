//! Check command - dry-run build of a manifest

use super::load_manifest;
use crate::cli::args::CheckArgs;
use crate::config::Config;
use crate::error::ComposeResult;
use crate::ui::{self, UiContext};

/// Execute the check command
///
/// Every extension is produced with synthesized members, validated against
/// its contract and registered, exactly as a real build would; the container
/// is disposed again afterwards.
pub async fn execute(args: CheckArgs, config: &Config) -> ComposeResult<()> {
    let ctx = UiContext::detect();
    let (mut container, engine) =
        load_manifest(&args.manifest, config, args.allow_unknown_contracts).await?;

    ui::intro(&ctx, &format!("Checking '{}'", container.name()));

    let outcome = match container.build(&engine).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let kind = e.kind().unwrap_or("container");
            ui::step_error_detail(&ctx, kind, &e.cause().to_string());
            return Err(e);
        }
    };

    for (n, level) in outcome.levels.iter().enumerate() {
        ui::step_ok_detail(&ctx, &level.join(", "), &format!("level {}", n));
    }
    if container.attached_members().next().is_some() {
        let members: Vec<&str> = container.attached_members().collect();
        ui::key_value(&ctx, "attached", &members.join(", "));
    }
    ui::key_value(&ctx, "build", &outcome.build_id.to_string());

    let report = container.dispose().await;
    if !report.is_clean() {
        ui::step_warn(&ctx, &format!("{} dispose failure(s)", report.failures.len()));
    }

    println!();
    println!("{} capabilities composed", outcome.registered.len());
    Ok(())
}
