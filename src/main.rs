use clap::{Parser, Subcommand};
use hivetree::{BaseBlock, CellReader, FileSource, Hive, HiveSource, ParseOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hivetree", about = "Reconstruct the key tree of a Windows registry hive")]
struct Cli {
    /// Log decoding progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WalkArgs {
    input: PathBuf,
    /// Skip keys nested deeper than this below the root
    #[arg(long, default_value_t = hivetree::hive::DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// Abandon the walk after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Walk root subtrees concurrently (needs the `parallel` feature)
    #[arg(long)]
    parallel: bool,
}

impl WalkArgs {
    fn options(&self) -> ParseOptions {
        ParseOptions {
            max_depth: self.max_depth,
            timeout:   self.timeout_ms.map(Duration::from_millis),
            cancel:    None,
            parallel:  self.parallel,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the hive and its key tree as JSON
    Parse {
        #[command(flatten)]
        walk: WalkArgs,
        /// Single-line JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,
    },
    /// Print key names as an indented tree
    Tree {
        #[command(flatten)]
        walk: WalkArgs,
    },
    /// Show base block fields and a tree summary
    Info {
        #[command(flatten)]
        walk: WalkArgs,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let hive = match cli.command {

        // ── Parse ────────────────────────────────────────────────────────────
        Commands::Parse { walk, compact } => {
            let hive = Hive::parse_file(&walk.input, &walk.options());
            let out = if compact {
                serde_json::to_string(&hive)?
            } else {
                serde_json::to_string_pretty(&hive)?
            };
            println!("{out}");
            hive
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { walk } => {
            let hive = Hive::parse_file(&walk.input, &walk.options());
            if let Some(root) = hive.root() {
                for (depth, key) in root.iter() {
                    println!("{:indent$}{}  [{} subkeys, {} values]",
                        "", key.name_lossy(), key.children.len(), key.values_count,
                        indent = depth * 2);
                }
            }
            report_errors(&hive);
            hive
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { walk } => {
            let hive = Hive::parse_file(&walk.input, &walk.options());
            for line in info_lines(&hive) {
                println!("{line}");
            }
            report_errors(&hive);
            hive
        }
    };

    Ok(if hive.is_parsed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Summary printed by `info`. Base block fields only appear once the magic
/// checked out; otherwise the hive's own errors explain what went wrong.
fn info_lines(hive: &Hive) -> Vec<String> {
    let mut lines = vec![
        "── regf hive ────────────────────────────────────────────".to_string(),
        format!("  Path           {}", hive.path().display()),
    ];
    if hive.header_valid() {
        match read_base_block(hive.path()) {
            Ok(bb) => {
                lines.push(format!("  Embedded name  {}", bb.file_name));
                lines.push(format!("  Version        {}.{}", bb.major_version, bb.minor_version));
                lines.push(format!("  Sequence       {} / {}{}", bb.primary_sequence,
                    bb.secondary_sequence, if bb.is_dirty() { " (dirty)" } else { "" }));
                lines.push(format!("  Last written   {}", bb.last_written
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "n/a".into())));
                lines.push(format!("  Root cell      {:#x}", bb.root_cell_offset));
                lines.push(format!("  Bins size      {} B", bb.hive_bins_size));
                if bb.root_cell_offset != hivetree::header::EXPECTED_ROOT_CELL {
                    tracing::warn!(declared = bb.root_cell_offset,
                        "base block declares a non-standard root cell; walk started at the fixed root");
                }
            }
            Err(e) => tracing::warn!("base block unreadable: {e}"),
        }
    }
    lines.push(format!("  Keys           {}", hive.key_count()));
    lines.push(format!("  Errors         {}", hive.errors().len()));
    lines.push(format!("  Parsed         {}", hive.is_parsed()));
    lines.push(format!("  Tree digest    {}", hive.digest_hex().unwrap_or_else(|| "n/a".into())));
    lines
}

fn read_base_block(path: &Path) -> hivetree::Result<BaseBlock> {
    let source = FileSource::open(path)?;
    let mut reader = CellReader::new(source.open_reader()?)?;
    BaseBlock::read(&mut reader)
}

fn report_errors(hive: &Hive) {
    for err in hive.errors() {
        eprintln!("error: {err}");
    }
}

#[cfg(test)]
#[path = "testutil.rs"]
mod testutil;
