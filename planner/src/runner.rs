use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use crate::{domain::DomainModel, SolverError};

/// Domain file per model, relative to `domain_dir`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainFiles {
    pub v1: PathBuf,
    pub v2: PathBuf,
}

impl Default for DomainFiles {
    fn default() -> Self {
        Self {
            v1: "mvplanner-energy.pddl".into(),
            v2: "mvplanner-depot.pddl".into(),
        }
    }
}

/// External solver invocation. Arguments may contain the placeholders
/// `{domain}`, `{problem}`, `{output}`, `{tries}` and `{seconds}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub command: Vec<String>,
    /// Appended when asking for the fastest plan.
    pub fast_args: Vec<String>,
    /// Appended when running with a time budget.
    pub budget_args: Vec<String>,
    pub timed_tries: u32,
    /// Wall-clock limit of a fastest-plan run.
    pub fast_limit_secs: u64,
    pub scratch_dir: PathBuf,
    pub domain_dir: PathBuf,
    pub domain_files: DomainFiles,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            command: ["lpg", "-o", "{domain}", "-f", "{problem}", "-out", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fast_args: vec!["-speed".to_string()],
            budget_args: ["-n", "{tries}", "-cputime", "{seconds}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timed_tries: 20,
            fast_limit_secs: 5,
            scratch_dir: "log/mvplanner".into(),
            domain_dir: "conf/mvplanner".into(),
            domain_files: DomainFiles::default(),
        }
    }
}

pub struct SolverRunner {
    config: SolverConfig,
    seq: AtomicU64,
}

impl SolverRunner {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn domain_path(&self, model: DomainModel) -> PathBuf {
        let file = match model {
            DomainModel::V1 => &self.config.domain_files.v1,
            DomainModel::V2 => &self.config.domain_files.v2,
        };
        self.config.domain_dir.join(file)
    }

    /// Writes the problem to a fresh file in the scratch directory and
    /// builds the command line. A budget of 0 asks for the fastest plan.
    pub async fn prepare(&self, model: DomainModel, problem: &str, budget: u64) -> Result<SolverJob, SolverError> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        let workdir = tokio::fs::canonicalize(&self.config.scratch_dir).await?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let problem_path = workdir.join(format!("problem_{}_{}.pddl", stamp, seq));
        let output_path = workdir.join(format!("solution_{}_{}.soln", stamp, seq));
        tokio::fs::write(&problem_path, problem).await?;

        let domain = self.domain_path(model);
        let domain = if domain.is_absolute() {
            domain
        } else {
            std::env::current_dir()?.join(domain)
        };

        let extra = if budget == 0 {
            &self.config.fast_args
        } else {
            &self.config.budget_args
        };
        let mut argv = self
            .config
            .command
            .iter()
            .chain(extra.iter())
            .map(|arg| {
                arg.replace("{domain}", &domain.to_string_lossy())
                    .replace("{problem}", &problem_path.to_string_lossy())
                    .replace("{output}", &output_path.to_string_lossy())
                    .replace("{tries}", &self.config.timed_tries.to_string())
                    .replace("{seconds}", &budget.to_string())
            });
        let program = argv.next().ok_or(SolverError::NoCommand)?;
        let args = argv.collect();

        let limit = if budget == 0 {
            self.config.fast_limit_secs
        } else {
            budget + 1
        };
        Ok(SolverJob {
            program,
            args,
            workdir,
            problem_path,
            output_path,
            budget,
            limit: Duration::from_secs(limit),
        })
    }
}

/// One solver process, from launch to reading its output.
#[derive(Debug)]
pub struct SolverJob {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    problem_path: PathBuf,
    output_path: PathBuf,
    budget: u64,
    limit: Duration,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl SolverJob {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn problem_path(&self) -> &Path {
        &self.problem_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Runs the solver until it exits, exceeds its limit, or `cancel` fires.
    /// Success is decided by the output file alone: solvers may exit
    /// non-zero after writing a usable plan.
    pub async fn run(self, cancel: Option<&CancellationToken>) -> Result<String, SolverError> {
        let command_line = self.command_line();
        info!("running solver: {}", command_line);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| {
            error!("could not launch solver: {}: {}", command_line, source);
            SolverError::Launch {
                command: command_line.clone(),
                source,
            }
        })?;

        let mut echo = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut captured = Vec::new();
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("solver: {}", line);
                    captured.push(line);
                }
                captured
            })
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.limit) => Outcome::TimedOut,
            _ = cancelled(cancel) => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            kill(&mut child).await;
        }

        let stdout = match echo.as_mut() {
            Some(handle) => match tokio::time::timeout(Duration::from_millis(500), &mut *handle).await {
                Ok(Ok(lines)) => lines,
                _ => {
                    handle.abort();
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        match outcome {
            Outcome::Exited(Ok(status)) => debug!("solver exited with {}", status),
            Outcome::Exited(Err(e)) => warn!("waiting for solver failed: {}", e),
            Outcome::TimedOut => {
                warn!("solver exceeded {:?}, killed: {}", self.limit, command_line);
                if tokio::fs::metadata(&self.output_path).await.is_err() {
                    return Err(SolverError::Timeout { budget: self.budget });
                }
            }
            Outcome::Cancelled => {
                info!("solver run cancelled: {}", command_line);
                return Err(SolverError::Cancelled);
            }
        }

        match tokio::fs::read_to_string(&self.output_path).await {
            Ok(text) => Ok(text),
            Err(e) => {
                error!(
                    "solver produced no output ({}): {}\n{}",
                    e,
                    command_line,
                    stdout.join("\n")
                );
                Err(SolverError::NoOutput {
                    command: command_line,
                    stdout: stdout.join("\n"),
                })
            }
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL);
    }
    if let Err(e) = child.start_kill() {
        debug!("solver already gone: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("could not reap solver: {}", e);
    }
}
