//! List command: show the documents of the notebook directory.

use quire_core::Scheduler;

use crate::colors;

pub fn execute(mut scheduler: Scheduler) -> anyhow::Result<()> {
    let ids = scheduler.populate_from_path()?;
    let root = scheduler.notebook().dirs().root.clone();

    if ids.is_empty() {
        println!(
            "{}No documents in {}{}",
            colors::YELLOW,
            root.display(),
            colors::RESET
        );
        return Ok(());
    }

    println!("{}Documents in {}{}", colors::BOLD, root.display(), colors::RESET);
    for id in ids {
        let document = scheduler.document(id)?;
        println!(
            "  {}{}{} {}",
            colors::DIM,
            id.as_usize(),
            colors::RESET,
            document.name()
        );
    }
    Ok(())
}
