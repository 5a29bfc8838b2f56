//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use filingprep_anchoring::Highlighter;
use filingprep_artifacts::read_bundle;
use filingprep_core::{
    BatchReport, DocumentJob, DocumentOutcome, DocumentResult, ProgressReporter, run_batch,
};
use filingprep_shared::{
    AnchorConfig, PrepConfig, TextIndex, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// File extensions picked up when a directory is passed to `prepare`.
const INPUT_EXTENSIONS: &[&str] = &["htm", "html", "txt", "xml"];

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// filingprep: canonical text and stable anchors for regulatory filings.
#[derive(Parser)]
#[command(
    name = "filingprep",
    version,
    about = "Canonicalize filings, resolve their tables and build addressable anchors.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.filingprep/filingprep.toml).
    #[arg(long, global = true, env = "FILINGPREP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Prepare documents and write one artifact bundle per document.
    Prepare {
        /// Input files, or directories of .htm/.html/.txt/.xml files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output root; each document gets `<out>/<source-id>/`.
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Treat inputs as plain text instead of markup.
        #[arg(long)]
        plain: bool,

        /// Characters per chunk anchor inside long paragraphs.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Documents processed concurrently.
        #[arg(long)]
        workers: Option<usize>,

        /// Gzip the canonical text.
        #[arg(long)]
        compress: bool,
    },

    /// Map an excerpt back onto a prepared bundle's canonical text (JSON output).
    Locate {
        /// Bundle directory written by `prepare`.
        #[arg(long)]
        bundle: PathBuf,

        /// Excerpt to locate; may contain prompt-view anchor markers.
        excerpt: String,

        /// Maximum number of results.
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "filingprep=info",
        1 => "filingprep=debug",
        _ => "filingprep=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `locate` output stays machine-readable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Prepare {
            inputs,
            out,
            plain,
            chunk_size,
            workers,
            compress,
        } => {
            let mut config = resolve_config(config_path)?;
            if plain {
                config.canonical.treat_as_markup = false;
            }
            if let Some(size) = chunk_size {
                config.anchors.chunk_size = size;
            }
            if let Some(n) = workers {
                config.batch.workers = n;
            }
            if compress {
                config.output.compress_canonical = true;
            }
            config.validate()?;
            cmd_prepare(&inputs, &out, config).await
        }
        Command::Locate {
            bundle,
            excerpt,
            max_results,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(n) = max_results {
                config.highlight.max_results = n;
            }
            cmd_locate(&bundle, &excerpt, &config)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<PrepConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// prepare
// ---------------------------------------------------------------------------

/// Expand directories into their matching files, sorted for a stable order.
fn collect_jobs(inputs: &[PathBuf]) -> Result<Vec<DocumentJob>> {
    let mut jobs = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(input)
                .wrap_err_with(|| format!("cannot read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|e| INPUT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                })
                .collect();
            files.sort();
            jobs.extend(files.into_iter().map(DocumentJob::from_path));
        } else {
            jobs.push(DocumentJob::from_path(input.clone()));
        }
    }
    if jobs.is_empty() {
        return Err(eyre!("no input documents found"));
    }
    Ok(jobs)
}

async fn cmd_prepare(inputs: &[PathBuf], out: &Path, config: PrepConfig) -> Result<()> {
    let jobs = collect_jobs(inputs)?;
    info!(
        documents = jobs.len(),
        out = %out.display(),
        markup = config.canonical.treat_as_markup,
        workers = config.batch.workers,
        "preparing documents"
    );

    let reporter = CliProgress::new();
    let report = run_batch(jobs, out, Arc::new(config), &reporter).await;

    println!();
    for result in &report.results {
        match &result.outcome {
            DocumentOutcome::Succeeded {
                bundle_dir,
                anchors,
                fallback_tables,
            } => {
                let fallback = if *fallback_tables > 0 {
                    format!(", {fallback_tables} table(s) kept verbatim")
                } else {
                    String::new()
                };
                println!(
                    "  ok     {}  {anchors} anchors{fallback}  -> {}",
                    result.source_id,
                    bundle_dir.display()
                );
            }
            DocumentOutcome::Failed { retryable, reason } => {
                let tag = if *retryable { "retry" } else { "failed" };
                println!("  {tag:<6} {}  {reason}", result.source_id);
            }
        }
    }
    println!();
    println!(
        "  {} prepared, {} failed in {:.1}s",
        report.succeeded(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    println!();

    if report.failed() > 0 {
        return Err(eyre!("{} document(s) failed", report.failed()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// locate
// ---------------------------------------------------------------------------

fn cmd_locate(bundle_dir: &Path, excerpt: &str, config: &PrepConfig) -> Result<()> {
    let bundle = read_bundle(bundle_dir)
        .wrap_err_with(|| format!("cannot load bundle {}", bundle_dir.display()))?;

    // Hash windows must match the ones the bundle was built with.
    let anchor_config = AnchorConfig {
        context_window: bundle.index.context_window,
        ..config.anchors.clone()
    };
    let highlighter = Highlighter::new(&bundle.text, &bundle.anchors, &anchor_config, &config.highlight);
    let found = highlighter.locate(excerpt);

    let index = TextIndex::new(&bundle.text);
    let results: Vec<serde_json::Value> = found
        .iter()
        .map(|l| {
            serde_json::json!({
                "from": l.range.from,
                "to": l.range.to,
                "confidence": l.confidence,
                "anchor_id": l.anchor_id,
                "text": index.slice(&bundle.text, l.range.range()),
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "source_id": bundle.index.source.source_id,
            "results": results,
        }))?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("Preparing documents");
    }

    fn document_done(&self, result: &DocumentResult, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar.set_message(result.source_id.clone());
    }

    fn finished(&self, _report: &BatchReport) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_prepare_flags() {
        let cli = Cli::try_parse_from([
            "filingprep",
            "prepare",
            "a.htm",
            "b.txt",
            "--out",
            "bundles",
            "--plain",
            "--chunk-size",
            "500",
            "--workers",
            "2",
        ])
        .expect("parse");
        let Command::Prepare {
            inputs,
            out,
            plain,
            chunk_size,
            workers,
            compress,
        } = cli.command
        else {
            panic!("expected prepare");
        };
        assert_eq!(inputs.len(), 2);
        assert_eq!(out, PathBuf::from("bundles"));
        assert!(plain);
        assert!(!compress);
        assert_eq!(chunk_size, Some(500));
        assert_eq!(workers, Some(2));
    }

    #[test]
    fn cli_parses_locate() {
        let cli = Cli::try_parse_from([
            "filingprep",
            "-vv",
            "locate",
            "--bundle",
            "out/doc",
            "net sales",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Locate { ref excerpt, .. } if excerpt == "net sales"));
    }

    #[test]
    fn directories_expand_to_matching_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("b.htm"), "<p>b</p>").expect("write");
        std::fs::write(tmp.path().join("a.TXT"), "a").expect("write");
        std::fs::write(tmp.path().join("notes.md"), "skip").expect("write");
        let jobs = collect_jobs(&[tmp.path().to_path_buf()]).expect("jobs");
        let ids: Vec<&str> = jobs.iter().map(|j| j.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_input_set_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(collect_jobs(&[tmp.path().to_path_buf()]).is_err());
    }
}
