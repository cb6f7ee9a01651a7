use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use judge_sandbox::sandbox::spec::{DEFAULT_EXTRA_MEMORY_MARGIN_MB, DEFAULT_WALL_CLOCK_GRACE_SECS};
use judge_sandbox::sandbox::{init_config, SandboxConfig};
use judge_sandbox::{RunSpec, SandboxError, Supervisor, Verdict};

/// Run one program inside the sandbox and print its verdict
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Working directory holding the program and its input
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// CPU time limit in seconds
    #[arg(short, long, default_value_t = 5.0)]
    time: f64,

    /// Extra CPU time excused for I/O waiting, in seconds
    #[arg(long, default_value_t = 0.0)]
    io_time: f64,

    /// Wall clock margin beyond the CPU limit, in seconds
    #[arg(long, default_value_t = DEFAULT_WALL_CLOCK_GRACE_SECS)]
    wall_grace: f64,

    /// Memory limit in MB (unlimited when omitted)
    #[arg(short, long)]
    memory: Option<u32>,

    /// Headroom added to the runtime's memory cap, in MB
    #[arg(long, default_value_t = DEFAULT_EXTRA_MEMORY_MARGIN_MB)]
    memory_margin: u32,

    /// Maximum number of processes and threads
    #[arg(short, long, default_value_t = 1)]
    processes: u32,

    /// Isolate box id
    #[arg(short, long, default_value_t = 0)]
    box_id: u32,

    #[arg(long, default_value = "input")]
    stdin: String,

    #[arg(long, default_value = "output")]
    stdout: String,

    #[arg(long, default_value = "error")]
    stderr: String,

    /// Relaxed limits for trusted build steps
    #[arg(long)]
    trusted: bool,

    /// Do not surface the program's stderr in the verdict
    #[arg(long)]
    no_capture_error: bool,

    /// Delete the working directory afterwards
    #[arg(long)]
    clean: bool,

    /// Sandbox configuration file (TOML)
    #[arg(short, long, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Print the verdict as JSON
    #[arg(long)]
    json: bool,

    /// Command to run; a single argument is split on whitespace
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

impl Cli {
    fn run_spec(&self) -> Result<RunSpec, SandboxError> {
        let builder = RunSpec::builder(&self.dir, Vec::<String>::new());
        let builder = match self.command.as_slice() {
            [single] => builder.with_command_line(single),
            command => builder.with_command(command.iter().cloned()),
        };

        builder
            .with_cpu_time_limit(self.time)
            .with_io_time_allowance(self.io_time)
            .with_wall_clock_grace(self.wall_grace)
            .with_memory_limit(self.memory)
            .with_extra_memory_margin(self.memory_margin)
            .with_process_limit(self.processes)
            .with_box_id(self.box_id)
            .with_stdin(&self.stdin)
            .with_stdout(&self.stdout)
            .with_stderr(&self.stderr)
            .with_trusted(self.trusted)
            .with_capture_error(!self.no_capture_error)
            .with_cleanup_after(self.clean)
            .build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_sandbox=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = SandboxConfig::load(cli.config.as_deref())?;
    info!("Sandbox runtime: {:?} (cgroups: {})", config.runtime, config.use_cgroups);
    init_config(config)?;

    let verdict = match cli.run_spec() {
        Ok(spec) => Supervisor::default().execute(spec).await,
        Err(e) => Verdict::from(e),
    };

    if cli.json {
        println!("{}", serde_json::to_string(&verdict)?);
    } else {
        println!("{}", verdict);
    }

    Ok(())
}
