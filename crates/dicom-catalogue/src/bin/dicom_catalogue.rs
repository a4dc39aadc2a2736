//! # dicom-catalogue CLI
//!
//! Builds catalogue stores from imaging trees and queries them.
//!
//! ## Commands
//!
//! - `dicom-catalogue new -i <DIR> -o <STORE>` - Index a directory tree
//! - `dicom-catalogue keys` - List selectable fields
//! - `dicom-catalogue load -i <STORE> [--all | -s Key=v1,v2 | --saved NAME]` - Query a store
//!
//! ## Examples
//!
//! ```bash
//! dicom-catalogue new -i /data/mri -o mri.catalogue
//! dicom-catalogue load -i mri.catalogue -s SeriesDescription=naald,nld -s Modality=MR
//! dicom-catalogue load -i mri.catalogue --all --format json
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dicom_catalogue::indexer::PROGRESS_CHANNEL_CAPACITY;
use dicom_catalogue::types::SYNTHETIC_COLUMNS;
use dicom_catalogue::{
    load_config, CatalogueConfig, CatalogueTree, Indexer, ProgressEvent, ProgressSender,
    ProvenanceRecord, QueryEngine, SelectOptions, Selection, SelectionResult,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dicom-catalogue")]
#[command(about = "Index imaging series trees and query the catalogue")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new catalogue store, replacing any existing one
    New {
        /// Root directory of the imaging tree
        #[arg(short, long)]
        input: PathBuf,

        /// Store file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the fields a selection may use
    Keys,

    /// Query a catalogue store
    Load {
        /// Store file to read
        #[arg(short, long)]
        input: PathBuf,

        /// Return every series
        #[arg(long, conflicts_with_all = ["selection", "saved"])]
        all: bool,

        /// Selection as Key=v1,v2 (repeatable; keys are AND-ed, values OR-ed)
        #[arg(short = 's', long = "select", value_name = "KEY=VALUES")]
        selection: Vec<String>,

        /// Use a selection saved in the config file
        #[arg(long, conflicts_with = "selection")]
        saved: Option<String>,

        /// Return only direct hits, without their sibling series
        #[arg(long)]
        no_siblings: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CatalogueConfig::default(),
    };

    match cli.command {
        Commands::New { input, output } => run_new(config, &input, &output),
        Commands::Keys => run_keys(&config),
        Commands::Load {
            input,
            all,
            selection,
            saved,
            no_siblings,
            format,
        } => {
            let engine = QueryEngine::new(config.load_tag_table()?);
            let selection = if all {
                Selection::all()
            } else if let Some(name) = saved {
                engine.selection(config.saved_selection(&name)?)?
            } else {
                Selection::from_assignments(&selection, engine.tags())?
            };
            let options = SelectOptions {
                include_siblings: !no_siblings,
            };
            run_load(&engine, &input, &selection, options, format)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run_new(config: CatalogueConfig, input: &Path, output: &Path) -> Result<()> {
    info!("Indexing {} into {}", input.display(), output.display());

    let (sender, mut rx) = ProgressSender::channel(PROGRESS_CHANNEL_CAPACITY);
    let indexer = Indexer::from_config(config)?.with_progress_sender(sender);

    let bar = ProgressBar::new_spinner();
    bar.set_message("discovering series");
    bar.enable_steady_tick(Duration::from_millis(100));

    let (build_input, build_output) = (input.to_path_buf(), output.to_path_buf());
    let handle = thread::spawn(move || indexer.build(&build_input, &build_output));

    // The channel closes when the build thread drops the indexer.
    while let Some(event) = rx.blocking_recv() {
        match event {
            ProgressEvent::Discovered { series } => {
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )?
                    .progress_chars("=> "),
                );
                bar.set_length(series as u64);
                bar.set_message("extracting");
            }
            ProgressEvent::Extracted { done, .. } => bar.set_position(done as u64),
            ProgressEvent::Finished { .. } => bar.set_message("written"),
        }
    }

    let report = handle
        .join()
        .map_err(|_| anyhow!("Build thread panicked"))?;
    bar.finish_and_clear();
    let report = report.with_context(|| format!("Failed to index {}", input.display()))?;

    println!(
        "Indexed {} series into {} ({} skipped)",
        report.rows,
        report.store_path.display(),
        report.skipped.len()
    );
    for path in &report.skipped {
        println!("  skipped {path}");
    }
    Ok(())
}

fn run_keys(config: &CatalogueConfig) -> Result<()> {
    let tags = config.load_tag_table()?;
    let mut stdout = io::stdout().lock();
    for field in tags.field_names().into_iter().chain(SYNTHETIC_COLUMNS) {
        writeln!(stdout, "{field}")?;
    }
    Ok(())
}

fn run_load(
    engine: &QueryEngine,
    store: &Path,
    selection: &Selection,
    options: SelectOptions,
    format: OutputFormat,
) -> Result<()> {
    let (provenance, result) = engine
        .load_with(store, selection, options)
        .with_context(|| format!("Failed to query {}", store.display()))?;

    let mut stdout = io::stdout().lock();
    match format {
        OutputFormat::Text => print_tree(&mut stdout, &provenance, &result)?,
        OutputFormat::Json => print_rows(&mut stdout, &provenance, &result)?,
    }
    Ok(())
}

fn print_tree(
    out: &mut impl Write,
    provenance: &ProvenanceRecord,
    result: &SelectionResult,
) -> Result<()> {
    let tree = CatalogueTree::from_result(result);
    writeln!(out, "Input: {}", provenance.input_path.display())?;

    for patient in &tree.patients {
        writeln!(
            out,
            "{} ({} studies)",
            patient.patient_id.as_deref().unwrap_or("<no patient id>"),
            patient.studies.len()
        )?;
        for (index, study) in patient.studies.iter().enumerate() {
            let uid = study.study_uid.as_deref().unwrap_or("<no study uid>");
            if study.hits > 0 {
                writeln!(out, "  study {index} [{uid}] ({} matches)", study.hits)?;
            } else {
                writeln!(out, "  study {index} [{uid}]")?;
            }
            for series in &study.series {
                let row = &series.row;
                writeln!(
                    out,
                    "    {} {}  {}  ({} files)",
                    if series.direct_hit { "*" } else { " " },
                    row.text_field("SeriesDescription").unwrap_or("-"),
                    row.path,
                    row.series_length.unwrap_or(0)
                )?;
            }
        }
    }

    writeln!(
        out,
        "{} patients, {} studies, {} series, {} matches",
        tree.patients.len(),
        tree.study_count(),
        tree.series_count(),
        tree.hits()
    )?;
    Ok(())
}

fn print_rows(
    out: &mut impl Write,
    provenance: &ProvenanceRecord,
    result: &SelectionResult,
) -> Result<()> {
    for row in &result.rows {
        let mut object = Map::new();
        object.insert("Path".to_string(), Value::from(row.path.clone()));
        object.insert("Sample".to_string(), row.sample.clone().map_or(Value::Null, Value::from));
        object.insert(
            "SeriesLength".to_string(),
            row.series_length.map_or(Value::Null, Value::from),
        );
        for (field, value) in &row.fields {
            object.insert(field.clone(), Value::from(value.as_text().into_owned()));
        }
        if let Some(sample) = provenance.sample_path(row) {
            object.insert(
                "SamplePath".to_string(),
                Value::from(sample.to_string_lossy().into_owned()),
            );
        }
        object.insert("DirectHit".to_string(), Value::from(result.is_direct_hit(row)));
        writeln!(out, "{}", serde_json::to_string(&Value::Object(object))?)?;
    }
    Ok(())
}
