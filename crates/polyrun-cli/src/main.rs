use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use polyrun_core::config::{ConfigLoader, PolyrunConfig};
use polyrun_core::{
    ExecutionError, ExecutionResult, GuestLanguage, Playground, SourceFile, StatusEvent,
    StatusUpdate,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "polyrun.yaml";
const CHECK_TIMEOUT: Duration = Duration::from_secs(180);

const EXIT_GUEST_ERROR: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;
const EXIT_OTHER: u8 = 3;

#[derive(Parser, Debug)]
#[clap(
    name = "polyrun",
    author,
    version,
    about = "Run Python, Go, JavaScript, TypeScript and SQL in isolated, time-bounded runtimes"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        global = true,
        help = "Configuration file (defaults to ./polyrun.yaml when present)"
    )]
    config: Option<PathBuf>,

    #[clap(long, short, global = true, help = "Log level (overrides logging.level)")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a source file and print its output
    Run {
        file: PathBuf,

        #[clap(long, help = "Guest language (inferred from the file extension by default)")]
        lang: Option<GuestLanguage>,

        #[clap(long = "with", value_name = "FILE", help = "Auxiliary project file")]
        with: Vec<PathBuf>,

        #[clap(long, help = "Print status and result as JSON")]
        json: bool,
    },
    /// Boot runtimes and report whether they load
    Check {
        #[clap(long, help = "Language to check (repeatable, all by default)")]
        lang: Vec<GuestLanguage>,
    },
    /// List supported languages
    Languages,
}

async fn load_config(path: Option<&Path>) -> Result<PolyrunConfig> {
    let config = match path {
        Some(path) => ConfigLoader::from_file(path).await?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ConfigLoader::from_file(DEFAULT_CONFIG_FILE).await?
        }
        None => ConfigLoader::from_environment()?,
    };
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = level.parse().unwrap_or(LevelFilter::Warn);
    env_logger::Builder::new()
        .filter_level(filter)
        .target(env_logger::Target::Stderr)
        .init();
}

fn print_status(update: &StatusUpdate, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(update) {
            eprintln!("{}", line);
        }
        return;
    }
    let text = match &update.event {
        StatusEvent::Loading { message } => message.clone(),
        StatusEvent::Ready => "ready".to_string(),
        StatusEvent::LoadError { error } => format!("load error: {}", error),
        StatusEvent::PackageLoading { packages } => {
            format!("installing packages: {}", packages.join(", "))
        }
        StatusEvent::PackagesLoaded => "packages installed".to_string(),
    };
    eprintln!("[{}] {}", update.language, text);
}

fn read_aux_files(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    paths
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("Invalid file name: {}", path.display()))?;
            let code = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(SourceFile::new(name, code))
        })
        .collect()
}

fn exit_code_for(err: &ExecutionError) -> u8 {
    match err {
        ExecutionError::Guest { .. } => EXIT_GUEST_ERROR,
        ExecutionError::Timeout { .. } => EXIT_TIMEOUT,
        _ => EXIT_OTHER,
    }
}

fn error_kind(err: &ExecutionError) -> &'static str {
    match err {
        ExecutionError::Load { .. } => "load",
        ExecutionError::Timeout { .. } => "timeout",
        ExecutionError::Guest { .. } => "guest",
        ExecutionError::Cancelled => "cancelled",
        ExecutionError::Transport(_) => "transport",
        ExecutionError::NotInitialized => "not-initialized",
        ExecutionError::Busy => "busy",
    }
}

fn report(
    language: GuestLanguage,
    outcome: &Result<ExecutionResult, ExecutionError>,
    json: bool,
) -> u8 {
    if json {
        let value = match outcome {
            Ok(result) => json!({
                "language": language,
                "ok": true,
                "output": result.output,
                "duration_seconds": result.duration_seconds,
            }),
            Err(err) => json!({
                "language": language,
                "ok": false,
                "error": error_kind(err),
                "message": err.to_string(),
                "partial_output": err.partial_stdout(),
            }),
        };
        println!("{}", value);
        return outcome.as_ref().map_or_else(exit_code_for, |_| 0);
    }

    match outcome {
        Ok(result) => {
            print!("{}", result.output);
            if !result.output.is_empty() && !result.output.ends_with('\n') {
                println!();
            }
            eprintln!("Completed in {:.2}s", result.duration_seconds);
            0
        }
        Err(err) => {
            let partial = err.partial_stdout();
            if !partial.is_empty() {
                print!("{}", partial);
                if !partial.ends_with('\n') {
                    println!();
                }
            }
            eprintln!("{}", err);
            exit_code_for(err)
        }
    }
}

async fn run_file(
    playground: &Playground,
    file: &Path,
    lang: Option<GuestLanguage>,
    with: &[PathBuf],
    json: bool,
) -> Result<u8> {
    let language = match lang {
        Some(language) => language,
        None => GuestLanguage::from_path(file).with_context(|| {
            format!(
                "Cannot infer the language of {}; pass --lang",
                file.display()
            )
        })?,
    };
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let files = read_aux_files(with)?;

    let mut status = playground.subscribe(language)?;
    let printer = tokio::spawn(async move {
        while let Some(update) = status.recv().await {
            print_status(&update, json);
        }
    });

    let outcome = tokio::select! {
        outcome = playground.submit(language, code, files) => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping {} execution", language);
            playground.stop(language).await;
            Err(ExecutionError::Cancelled)
        }
    };
    printer.abort();

    Ok(report(language, &outcome, json))
}

async fn wait_for_load(playground: &Playground, language: GuestLanguage) -> Result<(), String> {
    let mut status = playground
        .subscribe(language)
        .map_err(|e| e.to_string())?;
    playground
        .warm_up(&[language])
        .await
        .map_err(|e| e.to_string())?;

    let verdict = async {
        while let Some(update) = status.recv().await {
            match update.event {
                StatusEvent::Ready => return Ok(()),
                StatusEvent::LoadError { error } => return Err(error),
                _ => continue,
            }
        }
        Err("status channel closed".to_string())
    };
    tokio::time::timeout(CHECK_TIMEOUT, verdict)
        .await
        .unwrap_or_else(|_| Err(format!("no response after {:?}", CHECK_TIMEOUT)))
}

async fn check(playground: &Playground, languages: &[GuestLanguage]) -> Result<u8> {
    let languages = if languages.is_empty() {
        GuestLanguage::ALL.to_vec()
    } else {
        languages.to_vec()
    };

    let mut failures = 0;
    for language in languages {
        match wait_for_load(playground, language).await {
            Ok(()) => println!("{:<12} ready", language.display_name()),
            Err(error) => {
                failures += 1;
                println!("{:<12} failed: {}", language.display_name(), error);
            }
        }
    }
    Ok(if failures == 0 { 0 } else { EXIT_OTHER })
}

fn list_languages() {
    for language in GuestLanguage::ALL {
        println!(
            "{:<12} {:<12} .{}",
            language.to_string(),
            language.display_name(),
            language.file_extension()
        );
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref()).await?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level);
    log::debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Commands::Languages => {
            list_languages();
            Ok(0)
        }
        Commands::Run {
            file,
            lang,
            with,
            json,
        } => {
            let playground = Playground::new(config);
            run_file(&playground, &file, lang, &with, json).await
        }
        Commands::Check { lang } => {
            let playground = Playground::new(config);
            check(&playground, &lang).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_OTHER)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_with_aux_files() {
        let cli = Cli::try_parse_from([
            "polyrun", "run", "main.py", "--with", "util.py", "--with", "pkg.py", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                file, lang, with, json,
            } => {
                assert_eq!(file, PathBuf::from("main.py"));
                assert!(lang.is_none());
                assert_eq!(with.len(), 2);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_language_aliases() {
        let cli = Cli::try_parse_from(["polyrun", "check", "--lang", "py", "--lang", "sqlite"]).unwrap();
        match cli.command {
            Commands::Check { lang } => {
                assert_eq!(lang, vec![GuestLanguage::Python, GuestLanguage::Sql])
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["polyrun", "run", "x", "--lang", "cobol"]).is_err());
    }

    #[test]
    fn test_exit_codes_follow_error_class() {
        let guest = ExecutionError::Guest {
            message: "boom".to_string(),
            partial_stdout: String::new(),
        };
        assert_eq!(exit_code_for(&guest), EXIT_GUEST_ERROR);
        assert_eq!(
            exit_code_for(&ExecutionError::Timeout {
                timeout: Duration::from_secs(10)
            }),
            EXIT_TIMEOUT
        );
        assert_eq!(exit_code_for(&ExecutionError::Cancelled), EXIT_OTHER);
    }
}
