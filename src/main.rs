//! v86lab - run one coding-challenge submission and print the verdict
//!
//! Boots the machine described by the configuration behind a serial-console
//! process, runs the submitted file and prints the test result as JSON.

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info};

use v86lab::editor::{FileSource, SourceEditor, StaticSource};
use v86lab::{handle_startup_error, load_config, LabRunner, Language, PtyMachineFactory, RunMode, Session};

/// Command line options
#[derive(Debug, Default)]
struct AppArgs {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Submission language
    language: Option<String>,
    /// Submission file; stdin when absent
    file: Option<PathBuf>,
    /// Built-in machine profile
    profile: Option<String>,
    /// Run the image's test entry script instead of the toolchain
    entry_script: bool,
    /// Enable debug logging
    debug: bool,
}

impl AppArgs {
    /// Parse command line arguments
    fn parse() -> anyhow::Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut app_args = AppArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().context("Missing config file path")?;
                    app_args.config_path = Some(PathBuf::from(path));
                }
                "--language" | "-l" => {
                    app_args.language = Some(args.next().context("Missing language")?);
                }
                "--file" | "-f" => {
                    let path = args.next().context("Missing source file path")?;
                    app_args.file = Some(PathBuf::from(path));
                }
                "--profile" | "-p" => {
                    app_args.profile = Some(args.next().context("Missing profile name")?);
                }
                "--entry-script" | "-e" => {
                    app_args.entry_script = true;
                }
                "--debug" | "-d" => {
                    app_args.debug = true;
                }
                "--help" | "-?" | "-h" => {
                    print_help();
                    process::exit(0);
                }
                "--version" | "-v" => {
                    println!("{} v{}", v86lab::NAME, v86lab::VERSION);
                    process::exit(0);
                }
                other if other.starts_with('-') => {
                    anyhow::bail!("Unknown option: {}", other);
                }
                other => {
                    if app_args.file.is_some() {
                        anyhow::bail!("Unexpected argument: {}", other);
                    }
                    app_args.file = Some(PathBuf::from(other));
                }
            }
        }

        Ok(app_args)
    }

    /// Language from the flag, else from the file extension
    fn resolve_language(&self) -> Option<String> {
        self.language.clone().or_else(|| {
            let ext = self.file.as_ref()?.extension()?.to_str()?;
            Language::ALL
                .iter()
                .find(|language| language.extension() == ext)
                .map(|language| language.to_string())
        })
    }
}

/// Print help information
fn print_help() {
    println!("{} - {}", v86lab::NAME, v86lab::DESCRIPTION);
    println!();
    println!("USAGE:");
    println!("    v86lab [OPTIONS] [FILE]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>      Path to configuration file");
    println!("    -l, --language <LANG>    Submission language (python, c, lua)");
    println!("    -f, --file <PATH>        Submission file (default: stdin)");
    println!("    -p, --profile <NAME>     Machine profile (alpine, minimal)");
    println!("    -e, --entry-script       Run the image's test entry script");
    println!("    -d, --debug              Enable debug logging");
    println!("    -?, --help               Print this help message");
    println!("    -v, --version            Print version information");
    println!();
    println!("CONFIGURATION:");
    println!("    v86lab looks for configuration files in the following order:");
    println!("    1. Path specified with --config");
    println!("    2. <config dir>/v86lab/config.toml");
    println!("    3. $XDG_CONFIG_HOME/v86lab/config.toml");
    println!("    4. ~/.v86lab.toml");
    println!("    5. ./v86lab.toml");
    println!("    6. Built-in defaults");
    println!();
    println!("ENVIRONMENT:");
    println!("    V86LAB_CONFIG    Path to configuration file");
    println!("    V86LAB_DEBUG     Enable debug mode (1 or true)");
    println!("    RUST_LOG         Set logging level (error, warn, info, debug, trace)");
}

fn init_logging(debug: bool) {
    let debug = debug || env::var("V86LAB_DEBUG").map_or(false, |v| v == "1" || v.to_lowercase() == "true");
    let log_level = if debug { "debug" } else { "warn" };

    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match AppArgs::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            print_help();
            process::exit(2);
        }
    };

    init_logging(args.debug);
    info!("Starting {} v{}", v86lab::NAME, v86lab::VERSION);
    debug!("Arguments: {:?}", args);

    let config_path = args
        .config_path
        .clone()
        .or_else(|| env::var("V86LAB_CONFIG").ok().map(PathBuf::from));
    let mut config = match load_config(config_path.as_deref(), args.profile.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", handle_startup_error(&e));
            process::exit(2);
        }
    };
    if args.entry_script {
        config.runner.mode = RunMode::EntryScript;
    }

    let language = args
        .resolve_language()
        .context("No language given and none implied by the file extension")?;

    let source: Box<dyn SourceEditor> = match &args.file {
        Some(path) => {
            anyhow::ensure!(path.exists(), "Source file {} does not exist", path.display());
            Box::new(FileSource::new(path.clone()))
        }
        None => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read code from stdin")?;
            Box::new(StaticSource::new(code))
        }
    };

    let factory = Arc::new(PtyMachineFactory::new(config.pty.clone()));
    let session = Session::from_config(factory, &config);
    let runner = LabRunner::new(session.clone(), config.runner.clone());

    let result = runner.run_editor_test(source.as_ref(), &language).await;
    session.destroy().await;

    if !result.passed {
        error!("{}", result.message);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    process::exit(if result.passed { 0 } else { 1 });
}
