// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_composer::outline::OutlineTree;
use pdf_composer::page_labels::{LabelPatch, PageLabelRegistry};
use pdf_composer::vault::{FsStorage, VaultIndex};
use pdf_composer::{pages, ComposeOutcome, Config, DocumentComposer};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Insert, remove, merge and extract PDF pages while keeping page labels,
/// bookmarks and links from your notes pointing at the right pages.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration File
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// Notes folder whose links are updated, overrides the configuration file
    #[arg(long)]
    vault: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a blank page
    AddPage { file: PathBuf },
    /// Insert a blank page so that it becomes page PAGE
    Insert {
        file: PathBuf,
        page: u32,
        /// Let page labels shift with the pages instead of keeping them
        #[arg(long)]
        discard_labels: bool,
        /// Give the inserted page a bare number without style or prefix
        #[arg(long)]
        plain_label: bool,
    },
    /// Remove page PAGE
    Remove {
        file: PathBuf,
        page: u32,
        #[arg(long)]
        discard_labels: bool,
    },
    /// Append FILE2 to FILE1 and delete FILE2
    Merge {
        file1: PathBuf,
        file2: PathBuf,
        #[arg(long)]
        discard_labels: bool,
    },
    /// Move pages such as "1-3, 5" into a new file
    Extract {
        file: PathBuf,
        pages: String,
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Replace OUTPUT if it exists
        #[arg(long)]
        force: bool,
        #[arg(long)]
        discard_labels: bool,
    },
    /// Print the label of every page
    Labels {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the outline
    Outline {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Remove outline items whose page is gone
    Prune { file: PathBuf },
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn report(what: String, outcome: &ComposeOutcome) -> ExitCode {
    println!("{what} ({} pages)", outcome.page_count);
    let links = &outcome.links;
    if links.links_rewritten() > 0 {
        println!(
            "Updated {} links in {} notes.",
            links.links_rewritten(),
            links.rewritten.len()
        );
    }
    if links.is_complete() {
        return ExitCode::SUCCESS;
    }
    println!(
        "Unable to update links in these notes.\n{}",
        links
            .failed
            .iter()
            .map(|(path, e)| format!("  * {}: {e}", path.display()))
            .collect::<Vec<String>>()
            .join("\n")
    );
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(vault) = &args.vault {
        config.vault = vault.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let storage = FsStorage;
    let index = VaultIndex::new(absolute(&config.vault)?, config.link_extensions.clone());
    let composer = DocumentComposer::new(&storage, &index).with_leaf_size(config.label_leaf_size);
    let keep = |discard: bool| config.keep_labels && !discard;

    let code = match args.command {
        Command::AddPage { file } => {
            let file = absolute(&file)?;
            let outcome = composer.add_page(&file).await?;
            report(format!("Added a page to {}", file.display()), &outcome)
        }
        Command::Insert {
            file,
            page,
            discard_labels,
            plain_label,
        } => {
            let file = absolute(&file)?;
            let patch = plain_label.then(LabelPatch::plain);
            let outcome = composer
                .insert_page(&file, page, keep(discard_labels), patch.as_ref())
                .await?;
            report(format!("Inserted page {page} into {}", file.display()), &outcome)
        }
        Command::Remove {
            file,
            page,
            discard_labels,
        } => {
            let file = absolute(&file)?;
            let outcome = composer.remove_page(&file, page, keep(discard_labels)).await?;
            report(format!("Removed page {page} from {}", file.display()), &outcome)
        }
        Command::Merge {
            file1,
            file2,
            discard_labels,
        } => {
            let (file1, file2) = (absolute(&file1)?, absolute(&file2)?);
            let outcome = composer
                .merge_files(&file1, &file2, keep(discard_labels))
                .await?;
            report(
                format!("Merged {} into {}", file2.display(), file1.display()),
                &outcome,
            )
        }
        Command::Extract {
            file,
            pages: selection,
            output,
            force,
            discard_labels,
        } => {
            let (file, output) = (absolute(&file)?, absolute(&output)?);
            let page_count = pages::page_count(&composer.load(&file).await?);
            let selected = pages::parse_ranges(&selection, page_count)?;
            let outcome = composer
                .extract_pages(&file, &selected, &output, force, keep(discard_labels))
                .await?;
            report(
                format!("Moved {} pages to {}", selected.len(), output.display()),
                &outcome,
            )
        }
        Command::Labels { file, json } => {
            let doc = composer.load(&file).await?;
            let labels = PageLabelRegistry::from_document(&doc)?
                .unwrap_or_else(|| PageLabelRegistry::decimal(pages::page_count(&doc)));
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ranges": labels.ranges(),
                        "labels": labels.labels(),
                    }))?
                );
            } else {
                for (page, label) in labels.labels().iter().enumerate() {
                    println!("{}\t{label}", page + 1);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Outline { file, json } => {
            let doc = composer.load(&file).await?;
            let entries = OutlineTree::entries(&doc)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    let page = entry.page.map_or("-".to_string(), |p| p.to_string());
                    println!("{}{}  [{page}]", "  ".repeat(entry.level), entry.title);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Prune { file } => {
            let pruned = composer.prune_outline(&file).await?;
            println!("Removed {pruned} outline items from {}", file.display());
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
