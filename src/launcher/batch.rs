//! Batch script generation and submission
//!
//! Renders a scheduler-specific shell script (Slurm, LSF or Flux), writes
//! it into the job's work directory, and either stops there, submits it to
//! the scheduler, or runs it inside the current allocation.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::environment::BatchEnvironment;
use crate::error::{IoResultExt, LaunchError, Result};
use crate::system::SchedulerKind;

/// Script file written into the work directory
pub const SCRIPT_NAME: &str = "batch.sh";

/// What to do once the script is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Only write the work directory
    SetupOnly,
    /// Hand the script to the scheduler's batch queue
    Submit,
    /// Execute the script in the current allocation
    Run,
}

/// Result of [`BatchJob::launch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Path of the written script
    pub script_path: PathBuf,
    /// Job ID reported by the scheduler, when submitted
    pub job_id: Option<String>,
}

/// A batch job ready to be rendered
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Target scheduler
    pub scheduler: SchedulerKind,
    /// Job name
    pub job_name: String,
    /// Number of nodes
    pub nodes: u32,
    /// Processes per node
    pub procs_per_node: u32,
    /// Partition/queue
    pub partition: Option<String>,
    /// Account/bank
    pub account: Option<String>,
    /// Reservation
    pub reservation: Option<String>,
    /// Time limit in minutes
    pub time_limit: Option<u32>,
    /// Work directory
    pub work_dir: PathBuf,
    /// Exported environment
    pub environment: BatchEnvironment,
    /// Parallel launcher arguments
    pub launcher_args: Vec<String>,
    /// Commands run before the launch line
    pub preamble: Vec<String>,
    /// Profiler prefixed to the executable
    pub profiler_cmd: Option<String>,
    /// Executable to launch
    pub executable: String,
    /// Executable arguments
    pub args: Vec<String>,
}

impl BatchJob {
    /// Create a job with no extra settings
    pub fn new(
        scheduler: SchedulerKind,
        job_name: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        executable: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            job_name: job_name.into(),
            nodes: 1,
            procs_per_node: 1,
            partition: None,
            account: None,
            reservation: None,
            time_limit: None,
            work_dir: work_dir.into(),
            environment: BatchEnvironment::new(),
            launcher_args: Vec::new(),
            preamble: Vec::new(),
            profiler_cmd: None,
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    /// Path of the script inside the work directory
    pub fn script_path(&self) -> PathBuf {
        self.work_dir.join(SCRIPT_NAME)
    }

    /// Render the full batch script
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");

        match self.scheduler {
            SchedulerKind::Slurm => self.push_slurm_header(&mut script),
            SchedulerKind::Lsf => self.push_lsf_header(&mut script),
            SchedulerKind::Flux => self.push_flux_header(&mut script),
        }

        if !self.environment.is_empty() {
            script.push_str("\n# Environment\n");
            for (key, value) in self.environment.iter() {
                script.push_str(&format!("export {}=\"{}\"\n", key, escape_double_quoted(value)));
            }
        }

        if !self.preamble.is_empty() {
            script.push_str("\n# Preamble\n");
            for command in &self.preamble {
                script.push_str(command);
                script.push('\n');
            }
        }

        script.push_str("\n# Run\n");
        let work_dir = escape_double_quoted(&self.work_dir.to_string_lossy());
        script.push_str(&format!("cd \"{}\"\n", work_dir));
        script.push_str(&self.launch_line());
        script.push('\n');

        script
    }

    /// The parallel launch command
    pub fn launch_line(&self) -> String {
        let total = self.nodes.saturating_mul(self.procs_per_node);
        let mut parts: Vec<String> = vec![self.scheduler.parallel_launcher().to_string()];

        match self.scheduler {
            SchedulerKind::Slurm => {
                parts.push(format!("--nodes={}", self.nodes));
                parts.push(format!("--ntasks={}", total));
                parts.push(format!("--ntasks-per-node={}", self.procs_per_node));
            }
            SchedulerKind::Lsf => {
                parts.push(format!("--nrs={}", self.nodes));
                parts.push("--rs_per_host=1".to_string());
                parts.push(format!("--tasks_per_rs={}", self.procs_per_node));
                parts.push("--launch_distribution=packed".to_string());
                parts.push("--cpu_per_rs=ALL_CPUS".to_string());
                parts.push("--gpu_per_rs=ALL_GPUS".to_string());
            }
            SchedulerKind::Flux => {
                parts.push(format!("-N{}", self.nodes));
                parts.push(format!("-n{}", total));
            }
        }

        parts.extend(self.launcher_args.iter().cloned());
        if let Some(ref profiler) = self.profiler_cmd {
            parts.push(profiler.clone());
        }
        parts.push(self.executable.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn log_paths(&self) -> (PathBuf, PathBuf) {
        (self.work_dir.join("out.log"), self.work_dir.join("err.log"))
    }

    fn push_slurm_header(&self, script: &mut String) {
        let (out, err) = self.log_paths();
        script.push_str(&format!("#SBATCH --job-name={}\n", self.job_name));
        script.push_str(&format!("#SBATCH --nodes={}\n", self.nodes));
        script.push_str(&format!("#SBATCH --chdir={}\n", self.work_dir.display()));
        script.push_str(&format!("#SBATCH --output={}\n", out.display()));
        script.push_str(&format!("#SBATCH --error={}\n", err.display()));
        if let Some(ref partition) = self.partition {
            script.push_str(&format!("#SBATCH --partition={}\n", partition));
        }
        if let Some(ref account) = self.account {
            script.push_str(&format!("#SBATCH --account={}\n", account));
        }
        if let Some(ref reservation) = self.reservation {
            script.push_str(&format!("#SBATCH --reservation={}\n", reservation));
        }
        if let Some(minutes) = self.time_limit {
            script.push_str(&format!("#SBATCH --time={}\n", minutes));
        }
    }

    fn push_lsf_header(&self, script: &mut String) {
        let (out, err) = self.log_paths();
        script.push_str(&format!("#BSUB -J {}\n", self.job_name));
        script.push_str(&format!("#BSUB -nnodes {}\n", self.nodes));
        script.push_str(&format!("#BSUB -cwd {}\n", self.work_dir.display()));
        script.push_str(&format!("#BSUB -o {}\n", out.display()));
        script.push_str(&format!("#BSUB -e {}\n", err.display()));
        if let Some(ref partition) = self.partition {
            script.push_str(&format!("#BSUB -q {}\n", partition));
        }
        if let Some(ref account) = self.account {
            script.push_str(&format!("#BSUB -G {}\n", account));
        }
        if let Some(ref reservation) = self.reservation {
            script.push_str(&format!("#BSUB -U {}\n", reservation));
        }
        if let Some(minutes) = self.time_limit {
            script.push_str(&format!("#BSUB -W {}\n", minutes));
        }
    }

    fn push_flux_header(&self, script: &mut String) {
        let (out, err) = self.log_paths();
        script.push_str(&format!("# flux: --job-name={}\n", self.job_name));
        script.push_str(&format!("# flux: -N{}\n", self.nodes));
        script.push_str("# flux: --exclusive\n");
        script.push_str(&format!("# flux: --output={}\n", out.display()));
        script.push_str(&format!("# flux: --error={}\n", err.display()));
        if let Some(ref partition) = self.partition {
            script.push_str(&format!("# flux: -q {}\n", partition));
        }
        if let Some(ref account) = self.account {
            script.push_str(&format!("# flux: -B {}\n", account));
        }
        if let Some(ref reservation) = self.reservation {
            script.push_str(&format!("# flux: --setattr=system.reservation={}\n", reservation));
        }
        if let Some(minutes) = self.time_limit {
            script.push_str(&format!("# flux: -t {}m\n", minutes));
        }
    }

    /// Create the work directory and write the script
    pub fn write(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_dir).with_path(&self.work_dir)?;
        let path = self.script_path();
        fs::write(&path, self.render()).with_path(&path)?;
        tracing::info!("Wrote batch script {}", path.display());
        Ok(path)
    }

    /// Write the script and act on it according to `mode`
    ///
    /// A relative work directory is resolved against the current directory
    /// first, since the scheduler and the script's `cd` would each resolve it
    /// from somewhere else.
    pub fn launch(&self, mode: LaunchMode) -> Result<LaunchOutcome> {
        if self.work_dir.is_relative() {
            let mut job = self.clone();
            job.work_dir = absolute_path(&self.work_dir)?;
            return job.launch(mode);
        }

        let script_path = self.write()?;

        let job_id = match mode {
            LaunchMode::SetupOnly => None,
            LaunchMode::Submit => Some(self.submit(&script_path)?),
            LaunchMode::Run => {
                self.run(&script_path)?;
                None
            }
        };

        Ok(LaunchOutcome {
            script_path,
            job_id,
        })
    }

    fn submit(&self, script_path: &Path) -> Result<String> {
        let command = self.scheduler.submit_command();
        let mut cmd = Command::new(command[0]);
        cmd.args(&command[1..]);

        // bsub reads the script from stdin; the others take a path.
        if self.scheduler == SchedulerKind::Lsf {
            let script = fs::File::open(script_path).with_path(script_path)?;
            cmd.stdin(script);
        } else {
            cmd.arg(script_path);
        }
        let output = cmd
            .output()
            .map_err(|e| LaunchError::scheduler(command.join(" "), e.to_string()))?;

        if !output.status.success() {
            return Err(LaunchError::scheduler(
                command.join(" "),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parse_job_id(self.scheduler, &stdout);
        tracing::info!("Submitted job {} via {}", job_id, command.join(" "));
        Ok(job_id)
    }

    fn run(&self, script_path: &Path) -> Result<()> {
        tracing::info!("Running {}", script_path.display());
        let status = Command::new("sh")
            .arg(script_path)
            .current_dir(&self.work_dir)
            .status()
            .map_err(|e| LaunchError::scheduler("sh", e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(LaunchError::scheduler(
                "sh",
                format!("batch script exited with {}", status),
            ))
        }
    }
}

/// Extract the job ID from a submit command's output
pub fn parse_job_id(scheduler: SchedulerKind, stdout: &str) -> String {
    match scheduler {
        // "Submitted batch job 12345"
        SchedulerKind::Slurm => stdout.split_whitespace().last(),
        // "Job <12345> is submitted to default queue <pbatch>."
        SchedulerKind::Lsf => stdout.split('<').nth(1).and_then(|s| s.split('>').next()),
        // Flux prints the job ID alone
        SchedulerKind::Flux => stdout.lines().map(str::trim).find(|l| !l.is_empty()),
    }
    .unwrap_or("unknown")
    .to_string()
}

/// Default work directory: `./<timestamp>_<job_name>`
pub fn default_work_dir(job_name: &str, now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("{}_{}", now.format("%Y%m%d_%H%M%S"), job_name))
}

/// Resolve `path` against the current directory without touching the filesystem
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_path(path)
}

fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_job(scheduler: SchedulerKind) -> BatchJob {
        let mut job = BatchJob::new(scheduler, "lbann_cosmoflow", "/work/run1", "lbann");
        job.nodes = 2;
        job.procs_per_node = 4;
        job.time_limit = Some(30);
        job.partition = Some("pbatch".to_string());
        job.environment.insert("MV2_USE_RDMA_CM", 0);
        job.launcher_args.push("--mpibind=off".to_string());
        job.args.push("--use_data_store".to_string());
        job
    }

    #[test]
    fn test_slurm_script() {
        let script = sample_job(SchedulerKind::Slurm).render();
        assert!(script.starts_with("#!/bin/sh\n#SBATCH --job-name=lbann_cosmoflow\n"));
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --partition=pbatch\n"));
        assert!(script.contains("#SBATCH --time=30\n"));
        assert!(script.contains("export MV2_USE_RDMA_CM=\"0\"\n"));
        assert!(script.ends_with(
            "srun --nodes=2 --ntasks=8 --ntasks-per-node=4 --mpibind=off lbann --use_data_store\n"
        ));
    }

    #[test]
    fn test_lsf_launch_line() {
        let job = sample_job(SchedulerKind::Lsf);
        assert!(job.render().contains("#BSUB -nnodes 2\n"));
        assert!(job.launch_line().starts_with(
            "jsrun --nrs=2 --rs_per_host=1 --tasks_per_rs=4 --launch_distribution=packed"
        ));
    }

    #[test]
    fn test_flux_with_profiler_and_preamble() {
        let mut job = sample_job(SchedulerKind::Flux);
        job.profiler_cmd = Some("nsys profile".to_string());
        job.preamble.push("module load rocm".to_string());
        let script = job.render();
        assert!(script.contains("# flux: -N2\n"));
        assert!(script.contains("# flux: -t 30m\n"));
        assert!(script.contains("\n# Preamble\nmodule load rocm\n"));
        assert!(script
            .contains("flux run -N2 -n8 --mpibind=off nsys profile lbann --use_data_store"));
    }

    #[test]
    fn test_export_escaping() {
        let mut job = BatchJob::new(SchedulerKind::Slurm, "j", "/w", "lbann");
        job.environment.insert("ODD", "a\"b$c");
        assert!(job.render().contains("export ODD=\"a\\\"b\\$c\"\n"));
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id(SchedulerKind::Slurm, "Submitted batch job 12345\n"), "12345");
        assert_eq!(
            parse_job_id(SchedulerKind::Lsf, "Job <4242> is submitted to default queue <pbatch>."),
            "4242"
        );
        assert_eq!(parse_job_id(SchedulerKind::Flux, "\nf2Dr7mXZ\n"), "f2Dr7mXZ");
        assert_eq!(parse_job_id(SchedulerKind::Lsf, ""), "unknown");
    }

    #[test]
    fn test_default_work_dir() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            default_work_dir("lbann_cosmoflow", now),
            PathBuf::from("20240309_070501_lbann_cosmoflow")
        );
    }

    #[test]
    fn test_setup_only_writes_script() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("nested").join("run");
        let job = BatchJob::new(SchedulerKind::Slurm, "j", &work, "lbann");
        let outcome = job.launch(LaunchMode::SetupOnly).unwrap();
        assert_eq!(outcome.script_path, work.join(SCRIPT_NAME));
        assert!(outcome.job_id.is_none());
        let written = fs::read_to_string(&outcome.script_path).unwrap();
        assert_eq!(written, job.render());
    }

    #[test]
    fn test_relative_work_dir_is_made_absolute() {
        let relative = PathBuf::from(format!("target/batch-rel-{}", std::process::id()));
        let job = BatchJob::new(SchedulerKind::Flux, "j", &relative, "true");
        let outcome = job.launch(LaunchMode::SetupOnly).unwrap();

        let absolute = std::env::current_dir().unwrap().join(&relative);
        assert!(outcome.script_path.is_absolute());
        assert_eq!(outcome.script_path, absolute.join(SCRIPT_NAME));
        let written = fs::read_to_string(&outcome.script_path).unwrap();
        assert!(written.contains(&format!("cd \"{}\"\n", absolute.display())));
        let output = format!("# flux: --output={}\n", absolute.join("out.log").display());
        assert!(written.contains(&output));

        fs::remove_dir_all(&absolute).unwrap();
    }

    #[test]
    fn test_launch_line_saturates_total_tasks() {
        let mut job = BatchJob::new(SchedulerKind::Flux, "j", "/w", "lbann");
        job.nodes = u32::MAX;
        job.procs_per_node = 2;
        assert!(job.launch_line().contains(&format!("-n{}", u32::MAX)));
    }
}
