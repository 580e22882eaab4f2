pub mod commands;
pub mod errors;
pub mod output;

use crate::patch::model::{Backend, OnConflict};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum BackendArg {
    #[default]
    Auto,
    File,
    Live,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Backend::Auto,
            BackendArg::File => Backend::File,
            BackendArg::Live => Backend::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ConflictArg {
    #[default]
    Overwrite,
    Skip,
    Rename,
}

impl From<ConflictArg> for OnConflict {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Overwrite => OnConflict::Overwrite,
            ConflictArg::Skip => OnConflict::Skip,
            ConflictArg::Rename => OnConflict::Rename,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sheetpatch-cli",
    version,
    about = "Workbook patch command line interface"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    #[arg(long, global = true)]
    pub compact: bool,

    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply a batch of ops to an existing workbook.
    Patch {
        file: PathBuf,
        /// JSON array of ops, or @path to a file containing one.
        ops: String,
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        want_inverse_ops: bool,
        #[arg(long)]
        preflight_formula_check: bool,
        #[arg(long)]
        default_sheet: Option<String>,
        #[arg(long, value_enum, default_value_t = ConflictArg::Overwrite)]
        on_conflict: ConflictArg,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        out_name: Option<String>,
        /// Allow the output path to replace the input workbook.
        #[arg(long)]
        allow_overwrite: bool,
    },
    /// Create a new workbook, optionally applying ops to it.
    Make {
        file: PathBuf,
        #[arg(long)]
        sheet_name: Option<String>,
        /// JSON array of ops, or @path to a file containing one.
        #[arg(long)]
        ops: Option<String>,
        #[arg(long)]
        default_sheet: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// List all supported op kinds.
    Ops,
    /// Show the field contract for one op kind.
    Describe { kind: String },
}

pub async fn run_command(command: Commands) -> Result<Value> {
    match command {
        Commands::Patch {
            file,
            ops,
            backend,
            dry_run,
            want_inverse_ops,
            preflight_formula_check,
            default_sheet,
            on_conflict,
            out_dir,
            out_name,
            allow_overwrite,
        } => {
            commands::patch::patch(commands::patch::PatchArgs {
                file,
                ops,
                backend: backend.into(),
                dry_run,
                want_inverse_ops,
                preflight_formula_check,
                default_sheet,
                on_conflict: on_conflict.into(),
                out_dir,
                out_name,
                allow_overwrite,
            })
            .await
        }
        Commands::Make {
            file,
            sheet_name,
            ops,
            default_sheet,
            overwrite,
        } => commands::patch::make(file, sheet_name, ops, default_sheet, overwrite).await,
        Commands::Ops => commands::ops::list().await,
        Commands::Describe { kind } => commands::ops::describe(kind).await,
    }
}
