use crate::OutputFormat;
use itemsync::config::{self, ItemsyncConfig};
use itemsync::item::dump::{DumpDocument, DumpRelated};
use itemsync::ui::{self, Icons};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run_inspect(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)?;
    let document = DumpDocument::from_slice(&bytes)?;
    let summaries = document.class_summaries();
    tracing::debug!("Loaded dump {} with {} items", path.display(), document.items.len());

    if format == OutputFormat::Json {
        let data = serde_json::json!({
            "path": path.display().to_string(),
            "version": document.version,
            "root": document.root,
            "items": document.items.len(),
            "bulks": document.bulks.len(),
            "classes": summaries,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    ui::header(&format!("Dump {}", path.display()));
    let root = match document.root {
        DumpRelated::Item(index) => match document.items.get(index) {
            Some(item) => format!("item {} ({})", index, item.class.style(ui::theme().tag.clone())),
            None => format!("item {} (missing)", index),
        },
        DumpRelated::Bulk(index) => match document.bulks.get(index) {
            Some(bulk) => format!(
                "bulk {} of {} items ({})",
                index,
                bulk.items.len(),
                bulk.class.style(ui::theme().tag.clone())
            ),
            None => format!("bulk {} (missing)", index),
        },
    };
    ui::info("Root", &root);

    let owned = document.bulks.iter().filter(|b| b.owner.is_some()).count();
    let defaults: usize = document.bulks.iter().map(|b| b.defaults.len()).sum();
    println!(
        "{}",
        ui::stats_table(&[
            ("Version", document.version.to_string()),
            ("Items", document.items.len().to_string()),
            ("Bulks", document.bulks.len().to_string()),
            ("Relation bulks", owned.to_string()),
            ("Bulk defaults", defaults.to_string()),
        ])
    );

    if summaries.is_empty() {
        ui::warn("Dump holds no items");
    } else {
        ui::section(&format!("{} Classes", Icons::STATS));
        println!("{}", ui::class_table(&summaries));
    }
    Ok(())
}

pub fn run_init(path: &Path, force: bool) -> anyhow::Result<()> {
    config::write_config(path, &ItemsyncConfig::default(), force)?;
    ui::success(&format!("Wrote {}", path.display()));
    ui::summary_row(&format!("{} Edit", Icons::GEAR), "[persist] batch_size and [log] filter");
    Ok(())
}
