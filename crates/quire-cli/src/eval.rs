//! Eval command: evaluate a file of cells and print their results.
//!
//! Cells are separated by blank lines. A cell whose first line is `%md` is a
//! markdown cell.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use quire_core::{CellKind, Scheduler, UNTITLED};

use crate::colors;
use crate::output::print_result;

const MARKDOWN_MARKER: &str = "%md";

/// Execute the eval command.
pub fn execute(
    mut scheduler: Scheduler,
    file: &Path,
    document: Option<&str>,
    timeout: u64,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let source = fs::read_to_string(file)?;
    let name = match document {
        Some(name) => name.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| UNTITLED.to_string()),
    };

    let start = Instant::now();
    let doc = scheduler.create_document(&name)?;
    println!(
        "\n{}Evaluating{} {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        name,
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    let chunks = split_cells(&source);
    if chunks.is_empty() {
        println!("{}No cells found.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    let mut cells = Vec::with_capacity(chunks.len());
    for (kind, text) in &chunks {
        cells.push(scheduler.push_cell(doc, *kind, text)?);
    }
    for cell in &cells {
        scheduler.evaluate(doc, *cell)?;
    }

    if !scheduler.wait_idle(doc, Duration::from_secs(timeout)) {
        scheduler.stop_document_evaluation(doc)?;
        anyhow::bail!("Evaluation did not finish within {} s", timeout);
    }

    let document = scheduler.document(doc)?;
    for (index, cell) in cells.iter().enumerate() {
        let result = document.cell(*cell).and_then(|c| c.result());
        print_result(&format!("[{}]", index + 1), result);
    }

    println!("{}", "─".repeat(50));
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        cells.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Split source into cells at blank lines.
fn split_cells(source: &str) -> Vec<(CellKind, String)> {
    let mut cells = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in source.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            current.push(line);
            continue;
        }
        if current.is_empty() {
            continue;
        }
        let cell = if current[0].trim() == MARKDOWN_MARKER {
            (CellKind::Markdown, current[1..].join("\n"))
        } else {
            (CellKind::Code, current.join("\n"))
        };
        cells.push(cell);
        current.clear();
    }
    cells
}
