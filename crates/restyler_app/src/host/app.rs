use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use pipeline_logging::pipeline_error;
use restyler_engine::{EngineHandle, EngineSettings, RequestConfig};

use super::logging::{self, LogDestination};
use super::persistence::{self, API_KEY_ENV};
use super::runner::{self, GenerateJob, RunResult};

const DEFAULT_CONFIG: &str = "restyler.ron";
const STATE_DIR: &str = ".restyler";

#[derive(Debug, Parser)]
#[command(name = "restyler", version, about = "Restyle page text into a sanitized HTML card")]
struct Cli {
    /// Mirror debug logs to stderr (they always go to ./restyler.log).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a restyled page from a text file.
    Generate(GenerateArgs),
    /// Send a tiny request to verify endpoint, model and key.
    Check {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write the default configuration file.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print today's diagnostics as JSON.
    Logs {
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Page text to restyle.
    #[arg(long)]
    input: PathBuf,
    /// Charset of the input when it has no byte-order mark.
    #[arg(long)]
    charset: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Prompt template with {{content}}, {{title}} and {{url}} placeholders.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Address the text came from; sensitive sites are refused.
    #[arg(long)]
    source_url: Option<String>,
    /// Restyle even when the source looks sensitive.
    #[arg(long)]
    force: bool,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long, default_value = "restyled")]
    output_dir: PathBuf,
    /// Abort the generation after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Echo every diagnostics entry to the log.
    #[arg(long)]
    debug: bool,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (destination, level) = if cli.verbose {
        (LogDestination::Both, LevelFilter::Debug)
    } else {
        (LogDestination::File, LevelFilter::Info)
    };
    logging::initialize(destination, level);

    let result = match cli.command {
        Command::Generate(args) => generate(args),
        Command::Check { config } => check(&config),
        Command::InitConfig { config, force } => init_config(&config, force),
        Command::Logs { clear } => logs(clear),
    };
    if let Err(err) = &result {
        pipeline_error!("{:#}", err);
    }
    result
}

fn load_config(path: &Path) -> anyhow::Result<RequestConfig> {
    persistence::load_config(path, std::env::var(API_KEY_ENV).ok())
}

fn open_engine() -> anyhow::Result<EngineHandle> {
    let engine = EngineHandle::new(EngineSettings::default())?;
    let today = Utc::now().date_naive();
    engine
        .diagnostics()
        .restore(persistence::load_diagnostics(Path::new(STATE_DIR), today));
    Ok(engine)
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let mut engine = open_engine()?;
    engine.diagnostics().set_debug(args.debug);

    let job = GenerateJob {
        input: args.input,
        charset: args.charset,
        title: args.title,
        template: args.template,
        source_url: args.source_url,
        force: args.force,
        max_tokens: args.max_tokens,
        output_dir: args.output_dir,
        timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let result = runner::run_generation(&mut engine, config, &job);
    persistence::save_diagnostics(Path::new(STATE_DIR), engine.diagnostics())?;

    match result? {
        RunResult::Written(path) => println!("{}", path.display()),
        RunResult::Aborted => eprintln!("generation aborted"),
    }
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    let engine = open_engine()?;
    let result = engine.check_connection(config)?;
    persistence::save_diagnostics(Path::new(STATE_DIR), engine.diagnostics())?;

    if !result.success {
        bail!(result.message);
    }
    println!("{}", result.message);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    persistence::save_config(path, &RequestConfig::default())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "wrote {}; set the credential there or via {}",
        path.display(),
        API_KEY_ENV
    );
    Ok(())
}

fn logs(clear: bool) -> anyhow::Result<()> {
    let dir = Path::new(STATE_DIR);
    let entries = persistence::load_diagnostics(dir, Utc::now().date_naive());
    if clear {
        let log = restyler_engine::DiagnosticsLog::default();
        persistence::save_diagnostics(dir, &log)?;
        eprintln!("cleared {} entries", entries.len());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
