//! Result formatting for terminal display.

use quire_core::{CellResult, KernelState};

use crate::colors;

/// Plain text shown for a result.
pub fn format_result(result: &CellResult) -> String {
    match result {
        CellResult::Text(text) | CellResult::Markup(text) => text.clone(),
        CellResult::ImageAsset(path) => format!("[image: {}]", path.display()),
    }
}

/// Print the result of the cell with the given label.
pub fn print_result(label: &str, result: Option<&CellResult>) {
    match result {
        Some(result) => {
            println!("{}{}:{}", colors::CYAN, label, colors::RESET);
            println!("{}", format_result(result));
        }
        None => println!(
            "{}{}: (no output){}",
            colors::DIM,
            label,
            colors::RESET
        ),
    }
}

pub fn print_kernel_state(state: KernelState) {
    let text = match state {
        KernelState::None => "engine stopped",
        KernelState::Starting => "engine starting...",
        KernelState::Running => "engine ready",
    };
    println!("{}{}{}", colors::DIM, text, colors::RESET);
}
