//! Coderun CLI
//!
//! A command-line front end for running programs with the coderun engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderun::{
    CancellationToken, Config, EXAMPLE_CONFIG, ExecutionRequest, Outcome, ProgramStatus,
    ResourceLimits, Runner,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "Run untrusted programs in throwaway workspaces")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: coderun.toml)
        #[arg(short, long, default_value = "coderun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID or alias (e.g., python, cpp, js)
        #[arg(short, long)]
        language: String,

        /// File whose contents are sent to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Time limit in seconds, for both CPU time and the wall clock
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in KB
        #[arg(short, long)]
        memory_limit: Option<u64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available languages
    Languages,

    /// Check that every language's toolchain can be found
    Check,

    /// Show the effective engine settings
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    match cli.config {
        Some(ref path) => info!(?path, "loading configuration"),
        None => debug!("using default configuration"),
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            source,
            language,
            input,
            time_limit,
            memory_limit,
            json,
        } => {
            let limits = ResourceLimits {
                time_limit,
                wall_time_limit: time_limit,
                memory_limit,
                ..ResourceLimits::unset()
            };
            let code =
                run_program(config, &source, &language, input.as_deref(), limits, json).await?;
            std::process::exit(code);
        }
        Commands::Languages => {
            let runner = Runner::new(config).context("failed to start engine")?;
            list_languages(&runner);
            Ok(())
        }
        Commands::Check => {
            let runner = Runner::new(config).context("failed to start engine")?;
            check_toolchains(&runner)
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Run one program and return the process exit code to use
async fn run_program(
    config: Config,
    source: &Path,
    language: &str,
    input: Option<&Path>,
    limits: ResourceLimits,
    json: bool,
) -> Result<i32> {
    let source_text = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read source file '{}'", source.display()))?;

    let mut request = ExecutionRequest::new(language, source_text);
    if let Some(input_path) = input {
        let stdin = tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?;
        request = request.with_stdin(stdin);
    }
    if limits != ResourceLimits::unset() {
        request = request.with_limits(limits);
    }

    let runner = Runner::new(config).context("failed to start engine")?;
    info!(language, "running program");

    // Ctrl-C cancels the execution so its workspace is still cleaned up
    let cancel = CancellationToken::new();
    let execution = runner.execute_with_cancel(request, cancel.clone());
    tokio::pin!(execution);
    let outcome = tokio::select! {
        outcome = &mut execution => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            execution.await
        }
    };

    if json {
        let rendered =
            serde_json::to_string_pretty(&outcome).context("failed to serialize outcome")?;
        println!("{rendered}");
    } else {
        print_outcome(&outcome);
    }

    Ok(exit_code(&outcome))
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Ok {
            output,
            exit_code,
            signal,
            truncated,
            elapsed_ms,
        } => {
            print!("{output}");
            if *truncated {
                eprintln!("[output truncated]");
            }
            // Log execution info via tracing (stderr), keeping stdout clean for piping
            info!(
                exit_code,
                signal,
                elapsed = format_args!("{elapsed_ms}ms"),
                "execution result"
            );
        }
        Outcome::CompileError { output } => {
            eprintln!("Compilation failed:");
            eprintln!("{output}");
        }
        Outcome::Timeout {
            phase,
            output,
            elapsed_ms,
        } => {
            print!("{output}");
            eprintln!("Time limit exceeded during {phase:?} after {elapsed_ms}ms");
        }
        Outcome::UnsupportedLanguage { language } => {
            eprintln!("Unsupported language '{language}'");
        }
        Outcome::ToolchainUnavailable { language, program } => {
            eprintln!("Toolchain for '{language}' is unavailable: '{program}' not found");
        }
        Outcome::Overloaded => eprintln!("Engine overloaded, try again later"),
        Outcome::InvalidRequest { message } => eprintln!("Invalid request: {message}"),
        Outcome::Cancelled => eprintln!("Cancelled"),
        Outcome::InternalError { message } => eprintln!("Internal error: {message}"),
    }
}

/// Mirror the program's own exit status; any other outcome is a failure
fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Ok {
            exit_code: Some(code),
            ..
        } => *code,
        Outcome::Ok {
            signal: Some(signal),
            ..
        } => 128 + signal,
        Outcome::Ok { .. } => 1,
        Outcome::Timeout { .. } => 124,
        _ if outcome.is_infrastructure_failure() => 2,
        _ => 1,
    }
}

fn list_languages(runner: &Runner) {
    println!("Available languages:\n");

    for adapter in runner.registry().adapters() {
        let lang_type = if adapter.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        let status = if adapter.is_available() {
            ""
        } else {
            " [unavailable]"
        };
        let aliases = &adapter.language().aliases;
        let aliases = if aliases.is_empty() {
            String::new()
        } else {
            format!(" aliases: {}", aliases.join(", "))
        };
        println!(
            "  {:<15} {} ({}){}{}",
            adapter.id(),
            adapter.name(),
            lang_type,
            aliases,
            status
        );
    }
}

fn check_toolchains(runner: &Runner) -> Result<()> {
    let mut missing = 0;
    for (id, programs) in runner.registry().report() {
        println!("{id}:");
        for status in programs {
            match status {
                ProgramStatus::Found { program, path } => {
                    println!("  {:<12} {}", program, path.display());
                }
                ProgramStatus::Missing { program } => {
                    missing += 1;
                    println!("  {program:<12} NOT FOUND");
                }
                ProgramStatus::Workspace { program } => {
                    println!("  {program:<12} (built in workspace)");
                }
            }
        }
    }

    if missing > 0 {
        anyhow::bail!("{missing} toolchain program(s) could not be found");
    }
    println!("\nAll toolchains found");
    Ok(())
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Time limit: {:?}", limits.time_limit);
    println!("  Wall time limit: {:?}", limits.wall_time_limit);
    println!("  Memory limit: {:?} KB", limits.memory_limit);
    println!("  Stack limit: {:?} KB", limits.stack_limit);
    println!("  Max processes: {:?}", limits.max_processes);
    println!("  Max output: {:?} KB", limits.max_output);
    println!("  Max file size: {:?} KB", limits.max_file_size);
    println!("  Max open files: {:?}", limits.max_open_files);
    println!();
    println!("Compile limits:");
    println!("  Time limit: {:?}", config.compile_limits.time_limit);
    println!(
        "  Wall time limit: {:?}",
        config.compile_limits.wall_time_limit
    );
    println!("  Max output: {:?} KB", config.compile_limits.max_output);
    println!();
    println!("Workspace root: {}", config.workspace_root().display());
    println!("Max concurrent: {}", config.max_concurrent);
    println!("Admission wait: {}s", config.admission_wait);
    println!("Confinement: {:?}", config.confinement);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
