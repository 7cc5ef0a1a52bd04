//! Server mode: reconcile on a fixed cadence.
//!
//! Passes never overlap; each iteration runs to completion before the
//! loop sleeps. A failing pass is logged and the next one starts from a
//! fresh load, so transient problems heal on the following cycle.

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

use crate::cli::ServeArgs;
use crate::engine::{CancelToken, RecorderExecutor, Reconciler};
use crate::local::{DirectoryLocal, OrgLocal};
use crate::remote::OrgSnapshot;
use crate::ui;
use crate::Context;

pub fn run(ctx: &Context, args: ServeArgs) -> Result<()> {
    if !ctx.quiet {
        ui::header("orgsync server");
        ui::kv("org dir", &args.org_dir.display().to_string());
        ui::kv("snapshot", &args.snapshot.display().to_string());
        ui::kv("interval", &format!("{}s", args.interval));
    }

    loop {
        let started = Instant::now();
        match pass(&args) {
            Ok(applied) => log::info!(
                "pass complete commands={} elapsed_ms={}",
                applied,
                started.elapsed().as_millis()
            ),
            Err(e) => log::error!("pass failed: {:#}", e),
        }

        if args.once {
            break;
        }
        thread::sleep(Duration::from_secs(args.interval));
    }

    Ok(())
}

fn pass(args: &ServeArgs) -> Result<usize> {
    let (local, warnings) = DirectoryLocal::load(&args.org_dir)?;
    for warning in &warnings {
        log::warn!("{}", warning);
    }
    let remote = OrgSnapshot::load_file(&args.snapshot)?;

    let reconciler = Reconciler::new(local.repo_config().clone());
    let mut recorder = RecorderExecutor::new();
    let report = reconciler.reconcile(&local, &remote, &mut recorder, false, &CancelToken::new())?;

    if !report.commands.is_empty() {
        report.snapshot.save_file(&args.snapshot)?;
    }
    if !report.unmanaged.is_empty() {
        log::info!(
            "unmanaged objects left alone: users={} teams={} repositories={} rulesets={}",
            report.unmanaged.users.len(),
            report.unmanaged.teams.len(),
            report.unmanaged.repositories.len(),
            report.unmanaged.rulesets.len()
        );
    }

    Ok(report.commands.len())
}
