//! The one-shot commands: `plan` previews a pass, `apply` runs it and
//! persists the resulting snapshot.

use anyhow::Result;
use colored::Colorize;
use indicatif::ProgressBar;
use std::path::Path;

use crate::cli::{ApplyArgs, PlanArgs};
use crate::engine::{
    CancelToken, Command, DryRunExecutor, Executor, RecorderExecutor, ReconcileReport, Reconciler,
};
use crate::local::{DirectoryLocal, OrgLocal};
use crate::progress;
use crate::remote::OrgSnapshot;
use crate::ui;
use crate::Context;

fn load(org_dir: &Path, snapshot: &Path) -> Result<(DirectoryLocal, OrgSnapshot)> {
    let (local, warnings) = DirectoryLocal::load(org_dir)?;
    for warning in &warnings {
        ui::warn(warning);
    }
    log::debug!(
        "loaded {} users, {} external users, {} teams, {} repositories",
        local.users().len(),
        local.external_users().len(),
        local.teams().len(),
        local.repositories().len()
    );
    let remote = OrgSnapshot::load_file(snapshot)?;
    Ok((local, remote))
}

pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let (local, remote) = load(&args.org_dir, &args.snapshot)?;
    let reconciler = Reconciler::new(local.repo_config().clone());
    let report = reconciler.reconcile(
        &local,
        &remote,
        &mut DryRunExecutor,
        true,
        &CancelToken::new(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.commands)?);
        return Ok(());
    }

    display_plan(ctx, &report);
    Ok(())
}

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    ui::header("Applying organization state");

    let (local, remote) = load(&args.org_dir, &args.snapshot)?;
    let reconciler = Reconciler::new(local.repo_config().clone());

    // preview first so the operator confirms what is about to change
    let preview = reconciler.reconcile(
        &local,
        &remote,
        &mut DryRunExecutor,
        true,
        &CancelToken::new(),
    )?;
    display_plan(ctx, &preview);

    if preview.commands.is_empty() {
        return Ok(());
    }

    let destructive = preview
        .commands
        .iter()
        .filter(|c| c.is_destructive())
        .count();
    if !args.yes && !confirm_apply(preview.commands.len(), destructive)? {
        println!();
        println!("  {} Aborted, nothing applied", "✗".red());
        return Ok(());
    }

    let mut executor = ProgressExecutor {
        inner: RecorderExecutor::new(),
        bar: progress::bar(preview.commands.len() as u64, "Applying"),
    };
    let report = reconciler.reconcile(&local, &remote, &mut executor, false, &CancelToken::new())?;
    executor.bar.finish_and_clear();

    report.snapshot.save_file(&args.snapshot)?;

    println!();
    ui::success(&format!("Applied {} changes", executor.inner.applied));
    Ok(())
}

/// Recorder wrapped with a progress bar for the apply path.
struct ProgressExecutor {
    inner: RecorderExecutor,
    bar: ProgressBar,
}

impl Executor for ProgressExecutor {
    fn apply(&mut self, cmd: &Command) -> Result<()> {
        let result = self.inner.apply(cmd);
        self.bar.inc(1);
        result
    }
}

fn display_plan(ctx: &Context, report: &ReconcileReport) {
    if report.commands.is_empty() {
        println!();
        println!("  {} Nothing to change", "✓".green());
    } else {
        println!();
        println!(
            "┌─ {} ──────────────────────────────────────────┐",
            "Planned Changes".bold()
        );
        println!("│");
        for cmd in &report.commands {
            let symbol = if cmd.is_destructive() {
                "-".red()
            } else if matches!(
                cmd.kind(),
                "AddUserToOrg" | "CreateTeam" | "CreateRepository" | "AddRuleset"
            ) {
                "+".green()
            } else {
                "~".yellow()
            };
            println!("│   {} {}", symbol, cmd);
        }
        println!("│");
        println!("├───────────────────────────────────────────────────────────┤");
        println!(
            "│ Summary: {} changes",
            report.commands.len().to_string().bold()
        );
        println!("└───────────────────────────────────────────────────────────┘");
    }

    display_unmanaged(ctx, report);
}

fn display_unmanaged(ctx: &Context, report: &ReconcileReport) {
    if report.unmanaged.is_empty() || ctx.quiet {
        return;
    }

    ui::section("Unmanaged");
    ui::hint("present remotely, absent locally; destructive operations are off");
    for handle in &report.unmanaged.users {
        println!("  {} user {}", "!".yellow(), handle);
    }
    for team_slug in &report.unmanaged.teams {
        println!("  {} team {}", "!".yellow(), team_slug);
    }
    for repo in &report.unmanaged.repositories {
        println!("  {} repository {}", "!".yellow(), repo);
    }
    for name in &report.unmanaged.rulesets {
        println!("  {} ruleset {}", "!".yellow(), name);
    }
}

/// Destructive commands flip the default answer to no.
fn confirm_apply(pending: usize, destructive: usize) -> Result<bool> {
    use dialoguer::Confirm;

    let prompt = if destructive > 0 {
        format!(
            "Apply {} commands, {} of them destructive?",
            pending, destructive
        )
    } else {
        format!("Apply {} commands?", pending)
    };

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(destructive == 0)
        .interact()?;

    Ok(confirmed)
}
