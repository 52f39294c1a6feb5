//! The three run commands: deploy, destroy, refresh
//!
//! All of them are one orchestrated run with a different operation; the
//! difference in UX lives entirely in the event sink that renders the run's
//! progress to the terminal.

use crate::Context;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use stackops::{
    DiagnosticEvent, EngineEvent, Error, EventSink, Op, RunRequest, RunResult, Severity,
    StackEvent,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub fn run(ctx: &Context, op: Op, stage: &str, dev: bool) -> Result<()> {
    let stack = super::load_stack(stage)?;
    let sink = Arc::new(CliSink {
        quiet: ctx.quiet,
        verbose: ctx.verbose,
    });

    let request = RunRequest {
        op,
        dev,
        sink,
        cancel: Arc::new(AtomicBool::new(false)),
    };
    match stack.run(&request) {
        Ok(()) => {
            ui::success(&format!("{op} complete for stage {stage}"));
            Ok(())
        }
        Err(Error::ConcurrentUpdate) => anyhow::bail!(
            "another update is in progress for stage {stage}; \
             `stagehand cancel` releases a stale lock"
        ),
        Err(Error::StageNotFound) => {
            anyhow::bail!("stage {stage} has no deployed state; nothing to {op}")
        }
        // Per-resource detail was already rendered from the event stream
        Err(Error::StackRunFailed) => anyhow::bail!("{op} failed for stage {stage}"),
        Err(e) => Err(e.into()),
    }
}

/// Renders run events to the terminal as they arrive
struct CliSink {
    quiet: bool,
    verbose: u8,
}

impl CliSink {
    fn diagnostic(&self, event: &DiagnosticEvent) {
        match event.severity {
            Severity::Error => ui::error(&event.message),
            Severity::Warning => {
                if !self.quiet {
                    ui::warn(&event.message);
                }
            }
            Severity::Info | Severity::Debug => {
                if self.verbose > 0 {
                    ui::dim(&event.message);
                }
            }
        }
    }

    fn complete(&self, result: &RunResult) {
        if self.quiet {
            return;
        }
        if !result.outputs.is_empty() {
            ui::header("Outputs");
            for (name, value) in &result.outputs {
                ui::kv(name, &value.to_string());
            }
        }
        if !result.errors.is_empty() {
            ui::header("Errors");
            for error in &result.errors {
                if error.urn.is_empty() {
                    ui::error(&error.message);
                } else {
                    ui::error(&format!("{}: {}", error.urn, error.message));
                }
            }
        }
    }
}

impl EventSink for CliSink {
    fn on_event(&self, event: &StackEvent) {
        match event {
            StackEvent::Command { command } => {
                if !self.quiet {
                    ui::header(&format!("Running {command}"));
                }
            }
            StackEvent::Engine(EngineEvent::Diagnostic(diagnostic)) => self.diagnostic(diagnostic),
            StackEvent::Engine(EngineEvent::ResourcePre(op)) => {
                if !self.quiet {
                    println!("  {} {} {}", op.op.cyan(), op.ty.dimmed(), op.urn);
                }
            }
            StackEvent::Engine(_) => {}
            StackEvent::StdOut { text } => print!("{text}"),
            StackEvent::ConcurrentUpdate => {
                ui::warn("another update is already in progress for this stage");
            }
            StackEvent::Complete(result) => self.complete(result),
        }
    }
}
