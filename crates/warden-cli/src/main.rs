//! Warden CLI - inspect and exercise access policies
//!
//! Usage:
//!   warden resolve --policy policy.json src/main.rs secrets/key.pem
//!   warden check --policy policy.json --op write logs/app.log
//!   warden compose base.json mode.json
//!   warden preset --presets presets.json --modes final_prompts.json --session 42
//!   warden run --policy policy.json -- make test
//!
//! Logs go to stderr; set `RUST_LOG=warden=debug` to see every decision.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use warden::config::{EffectivePolicy, ModesFile, PolicyConfig, PresetsFile, load_json};
use warden::fs::AsyncGuardedFs;
use warden::{Canonicalizer, Interceptor, Operation, Policy, SecurityScope, compose};

const EXIT_OK: u8 = 0;
const EXIT_DENIED_CHECK: u8 = 1;
/// Exit code for a command refused by the policy, as a shell reports a
/// command it cannot execute.
const EXIT_DENIED: u8 = 126;

/// Warden - path-scoped capability policies for untrusted code
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Inspect and exercise path-scoped access policies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective flags for each path
    Resolve {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Paths to resolve
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Check one operation; exit 1 if it is denied
    Check {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Operation to check
        #[arg(long, value_enum)]
        op: OpArg,
        /// Target path
        path: PathBuf,
    },
    /// Print the conservative composition of several policy files
    Compose {
        /// Policy files to compose
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Include an absent source (collapses to deny-all)
        #[arg(long)]
        absent: bool,
        /// Project root used to normalize absolute keys
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the effective policy for a preset and its active modes
    Preset {
        /// presets.json
        #[arg(long)]
        presets: PathBuf,
        /// Modes file (final_prompts.json)
        #[arg(long)]
        modes: Option<PathBuf>,
        /// Preset id (defaults to the file's default preset)
        #[arg(long)]
        preset: Option<String>,
        /// Grant full access to this session's files
        #[arg(long)]
        session: Option<String>,
        /// Project root used to normalize absolute keys
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Run a program inside a scope holding the policy
    Run {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Working directory, relative to the root
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Program and arguments
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct PolicyArgs {
    /// Policy file: {"global": "...", "paths": {...}}
    #[arg(long)]
    policy: PathBuf,
    /// Project root (defaults to the current directory)
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OpArg {
    Read,
    Write,
    List,
    Delete,
    Execute,
}

impl From<OpArg> for Operation {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Read => Operation::Read,
            OpArg::Write => Operation::Write,
            OpArg::List => Operation::List,
            OpArg::Delete => Operation::Delete,
            OpArg::Execute => Operation::Execute,
        }
    }
}

fn canonicalizer(root: Option<&Path>) -> anyhow::Result<Canonicalizer> {
    let canon = match root {
        Some(root) => Canonicalizer::new(root),
        None => Canonicalizer::current_dir(),
    };
    canon.context("failed to resolve project root")
}

impl PolicyArgs {
    fn load(&self) -> anyhow::Result<(Canonicalizer, Policy)> {
        let canon = canonicalizer(self.root.as_deref())?;
        let config: PolicyConfig = load_json(&self.policy)?;
        let policy = config.into_policy(&canon);
        Ok((canon, policy))
    }
}

fn resolve(out: &mut impl Write, args: &PolicyArgs, paths: &[PathBuf]) -> anyhow::Result<u8> {
    let (canon, policy) = args.load()?;
    for path in paths {
        let flags = policy.resolve_path(&canon, path);
        let shown = if flags.is_empty() {
            "-".to_string()
        } else {
            flags.to_string()
        };
        writeln!(out, "{shown:<5} {}", path.display())?;
    }
    Ok(EXIT_OK)
}

fn check(out: &mut impl Write, args: &PolicyArgs, op: OpArg, path: &Path) -> anyhow::Result<u8> {
    let (canon, policy) = args.load()?;
    let interceptor = Interceptor::new(canon);
    match interceptor.check_with(&policy, op.into(), path) {
        Ok(()) => {
            writeln!(out, "allowed")?;
            Ok(EXIT_OK)
        }
        Err(violation) => {
            writeln!(out, "{violation}")?;
            Ok(EXIT_DENIED_CHECK)
        }
    }
}

fn compose_files(
    out: &mut impl Write,
    files: &[PathBuf],
    absent: bool,
    root: Option<&Path>,
) -> anyhow::Result<u8> {
    let canon = canonicalizer(root)?;
    let policies = files
        .iter()
        .map(|file| load_json::<PolicyConfig>(file).map(|config| config.into_policy(&canon)))
        .collect::<Result<Vec<_>, _>>()?;

    let sources = policies
        .iter()
        .map(Some)
        .chain(absent.then_some(None));
    let composed = compose(sources);

    serde_json::to_writer_pretty(&mut *out, &composed)?;
    writeln!(out)?;
    Ok(EXIT_OK)
}

struct PresetRequest<'a> {
    presets: &'a Path,
    modes: Option<&'a Path>,
    preset: Option<&'a str>,
    session: Option<&'a str>,
    root: Option<&'a Path>,
}

fn preset(out: &mut impl Write, request: &PresetRequest<'_>) -> anyhow::Result<u8> {
    let canon = canonicalizer(request.root)?;
    let presets: PresetsFile = load_json(request.presets)?;
    let modes: ModesFile = match request.modes {
        Some(path) => load_json(path)?,
        None => ModesFile::default(),
    };

    let mut builder = EffectivePolicy::for_preset(&presets, request.preset, &modes, &canon)?;
    if let Some(session) = request.session {
        builder = builder.session(session)?;
    }

    match builder.build() {
        Some(policy) => serde_json::to_writer_pretty(&mut *out, &policy)?,
        None => write!(out, "null")?,
    }
    writeln!(out)?;
    Ok(EXIT_OK)
}

async fn run(args: &PolicyArgs, cwd: Option<&Path>, command: &[String]) -> anyhow::Result<u8> {
    let (canon, policy) = args.load()?;
    let Some((program, rest)) = command.split_first() else {
        anyhow::bail!("no program given");
    };

    let fs = AsyncGuardedFs::new(canon);
    let mut cmd = fs.command(program);
    cmd.args(rest);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let status = SecurityScope::scope(Some(Arc::new(policy)), cmd.status()).await;
    match status {
        Ok(status) => {
            tracing::debug!(?status, "command finished");
            let code = status.code().unwrap_or(1);
            Ok(u8::try_from(code).unwrap_or(1))
        }
        Err(err) if err.is_denied() => {
            eprintln!("warden: {err}");
            Ok(EXIT_DENIED)
        }
        Err(err) => Err(err).with_context(|| format!("failed to run {program}")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Output to stderr so it never mixes with command results on stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    let mut stdout = io::stdout().lock();

    let code = match cli.command {
        Command::Resolve { policy, paths } => resolve(&mut stdout, &policy, &paths),
        Command::Check { policy, op, path } => check(&mut stdout, &policy, op, &path),
        Command::Compose {
            files,
            absent,
            root,
        } => compose_files(&mut stdout, &files, absent, root.as_deref()),
        Command::Preset {
            presets,
            modes,
            preset: preset_id,
            session,
            root,
        } => preset(
            &mut stdout,
            &PresetRequest {
                presets: &presets,
                modes: modes.as_deref(),
                preset: preset_id.as_deref(),
                session: session.as_deref(),
                root: root.as_deref(),
            },
        ),
        Command::Run {
            policy,
            cwd,
            command,
        } => run(&policy, cwd.as_deref(), &command).await,
    }?;
    Ok(ExitCode::from(code))
}
