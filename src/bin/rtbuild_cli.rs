//! rtbuild CLI - Theme Compiler front end
//!
//! Commands: build, check
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on compile failure, 1 on usage or I/O failure

use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rtbuild_core::{BuildOptions, CompilationPipeline, CompileError, ErrorKind};

#[derive(Parser)]
#[command(name = "rtbuild-cli")]
#[command(version, about = "rtbuild CLI - Theme Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a theme into an archive
    Build {
        /// Entry file, usually rtconfig.txt
        input: PathBuf,

        /// Archive to write, usually <name>.ReaperThemeZip
        output: PathBuf,

        /// Replace an existing archive
        #[arg(long)]
        overwrite: bool,

        /// Deflate level for archive entries
        #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(i64).range(0..=9))]
        compression_level: i64,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Compile without writing anything and print the manifest
    Check {
        /// Entry file, usually rtconfig.txt
        input: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Theme name, defaults to the output file stem
    #[arg(long)]
    name: Option<String>,

    /// Bind a string global before compiling (NAME=VALUE)
    #[arg(long = "define", short = 'D', value_parser = parse_define)]
    defines: Vec<(String, String)>,
}

impl CommonArgs {
    fn apply(self, options: BuildOptions) -> BuildOptions {
        BuildOptions {
            defines: self.defines.into_iter().collect::<BTreeMap<_, _>>(),
            theme_name: self.name,
            ..options
        }
    }
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{}`", raw)),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let pipeline = CompilationPipeline::new();

    let result = match cli.command {
        Commands::Build {
            input,
            output,
            overwrite,
            compression_level,
            common,
        } => {
            let options = common.apply(
                BuildOptions::default()
                    .with_overwrite(overwrite)
                    .with_compression_level(compression_level),
            );
            pipeline.build_archive(&input, &output, &options)
        }
        Commands::Check { input, common } => {
            let options = common.apply(BuildOptions::default());
            pipeline.check(&input, &options)
        }
    };

    match result {
        Ok(manifest) => {
            print_json(&serde_json::json!({
                "success": true,
                "manifest": manifest,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_json(&serde_json::json!({
                "success": false,
                "error": e.to_string(),
                "kind": e.kind(),
            }));
            failure_code(&e)
        }
    }
}

fn failure_code(e: &CompileError) -> ExitCode {
    match e.kind() {
        ErrorKind::Io | ErrorKind::Output => ExitCode::FAILURE,
        _ => ExitCode::from(2), // Compile failure
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"success": false, "error": "{}"}}"#, e),
    }
}
