//! Subprocess adapter for the infrastructure engine
//!
//! Drives the engine binary through its CLI: a project file is rendered
//! into the working directory, stacks are selected per stage, and run
//! operations stream their JSON event lines from stdout straight onto the
//! orchestrator's channel. Everything the engine needs (backend URL, home
//! directory, secrets, passphrase) travels via the workspace environment.

use stackops::{
    ConfigMap, Engine, EngineEvent, Error, Result, StackHandle, StateSnapshot, Urn,
    WorkspaceSettings,
};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;

/// Project settings file the engine reads from the working directory
///
/// The name shares the engine's marker prefix, so lock release cleans it
/// up along with the engine's own transient files.
const PROJECT_FILE: &str = "Stack.yaml";

/// Engine driven as a child process
pub struct ProcessEngine {
    bin: String,
}

impl ProcessEngine {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Engine for ProcessEngine {
    fn select_stack(
        &self,
        workspace: &WorkspaceSettings,
        stage: &str,
        create: bool,
    ) -> Result<Box<dyn StackHandle>> {
        fs::write(
            workspace.workdir.join(PROJECT_FILE),
            render_project_file(workspace),
        )?;

        let stack = ProcessStack {
            bin: self.bin.clone(),
            workspace: workspace.clone(),
            stage: stage.to_string(),
        };
        let mut args = vec!["stack", "select", stage];
        if create {
            args.push("--create");
        }
        stack.run_quiet(&args)?;
        Ok(Box::new(stack))
    }
}

/// Render the engine's project settings file
fn render_project_file(workspace: &WorkspaceSettings) -> String {
    let mut out = format!(
        "name: {}\nruntime: {}\n",
        workspace.project, workspace.runtime
    );
    if let Some(entrypoint) = &workspace.entrypoint {
        out.push_str(&format!("main: {}\n", entrypoint.display()));
    }
    out.push_str(&format!("backend:\n  url: {}\n", workspace.backend_url));
    out
}

/// Parse one stdout line into an engine event
///
/// The engine interleaves human-readable progress with its JSON event
/// stream; non-event lines are dropped.
fn parse_event_line(line: &str) -> Option<EngineEvent> {
    let line = line.trim();
    if line.is_empty() || !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            log::debug!("skipping unparsable engine event: {e}");
            None
        }
    }
}

struct ProcessStack {
    bin: String,
    workspace: WorkspaceSettings,
    stage: String,
}

impl ProcessStack {
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .arg("--non-interactive")
            .current_dir(&self.workspace.workdir)
            .env_clear()
            .envs(&self.workspace.env)
            .env("PULUMI_HOME", &self.workspace.engine_home)
            .env("PULUMI_BACKEND_URL", &self.workspace.backend_url);
        cmd
    }

    /// Run to completion, discarding stdout
    fn run_quiet(&self, args: &[&str]) -> Result<()> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        check_status(&output.status, &output.stderr)
    }

    /// Run a blocking operation, streaming its event lines onto `events`
    fn run_streaming(&self, args: &[&str], events: Sender<EngineEvent>) -> Result<()> {
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = drain_stderr(&mut child);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Engine("engine stdout unavailable".to_string()))?;
        for line in BufReader::new(stdout).lines() {
            if let Some(event) = parse_event_line(&line?) {
                // A cancelled consumer drops the receiver; keep draining
                // the child so it can exit cleanly
                events.send(event).ok();
            }
        }
        drop(events);

        let status = child.wait()?;
        check_status(&status, &stderr.join().unwrap_or_default())
    }
}

impl StackHandle for ProcessStack {
    fn set_config(&mut self, config: &ConfigMap) -> Result<()> {
        for (key, value) in config {
            let mut args = vec![
                "config",
                "set",
                "--stack",
                self.stage.as_str(),
                key.as_str(),
                value.value.as_str(),
            ];
            args.push(if value.secret { "--secret" } else { "--plaintext" });
            self.run_quiet(&args)?;
        }
        Ok(())
    }

    fn apply(&mut self, events: Sender<EngineEvent>) -> Result<()> {
        self.run_streaming(
            &["up", "--stack", self.stage.as_str(), "--yes", "--json"],
            events,
        )
    }

    fn destroy(&mut self, events: Sender<EngineEvent>) -> Result<()> {
        self.run_streaming(
            &["destroy", "--stack", self.stage.as_str(), "--yes", "--json"],
            events,
        )
    }

    fn refresh(&mut self, events: Sender<EngineEvent>) -> Result<()> {
        self.run_streaming(
            &["refresh", "--stack", self.stage.as_str(), "--yes", "--json"],
            events,
        )
    }

    fn export(&mut self) -> Result<StateSnapshot> {
        let output = self
            .command(&["stack", "export", "--stack", self.stage.as_str()])
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        check_status(&output.status, &output.stderr)?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn import(&mut self, snapshot: &StateSnapshot) -> Result<()> {
        let mut child = self
            .command(&["stack", "import", "--stack", self.stage.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serde_json::to_vec(snapshot)?)?;
        }
        let output = child.wait_with_output()?;
        check_status(&output.status, &output.stderr)
    }

    fn refresh_targets(&mut self, targets: &[Urn]) -> Result<()> {
        let mut args = vec![
            "refresh".to_string(),
            "--stack".to_string(),
            self.stage.clone(),
            "--yes".to_string(),
        ];
        for target in targets {
            args.push("--target".to_string());
            args.push(target.to_string());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_quiet(&args)
    }
}

/// Collect the child's stderr on a side thread so a chatty engine cannot
/// deadlock against a full pipe
fn drain_stderr(child: &mut Child) -> std::thread::JoinHandle<Vec<u8>> {
    let stderr = child.stderr.take();
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut buffer).ok();
        }
        buffer
    })
}

fn check_status(status: &std::process::ExitStatus, stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let detail = String::from_utf8_lossy(stderr).trim().to_string();
    if detail.is_empty() {
        return Err(Error::Engine(format!("engine exited with {status}")));
    }
    Err(Error::Engine(detail))
}
