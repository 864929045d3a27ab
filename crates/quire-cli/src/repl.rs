//! Repl command: an interactive session on one document.
//!
//! Every input line becomes a code cell that is evaluated right away.
//! Results are printed as they arrive, so several lines can be queued while
//! an earlier one is still running.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use quire_core::{
    CellId, CellKind, Change, DocumentId, Notification, Scheduler, Source, UNTITLED,
};

use crate::colors;
use crate::output::{print_kernel_state, print_result};

/// How long queued cells may keep running after input ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

const HELP: &str = "\
:md <text>   add and render a markdown cell
:stop        stop the last evaluated cell
:restart     restart the engine
:quit        leave the session";

type Labels = Rc<RefCell<HashMap<CellId, usize>>>;

enum LoopControl {
    Continue,
    Quit,
}

struct Session {
    document: DocumentId,
    labels: Labels,
    last: Option<CellId>,
    count: usize,
}

/// Execute the repl command.
pub async fn execute(mut scheduler: Scheduler, document: Option<&str>) -> anyhow::Result<()> {
    scheduler.populate_from_path()?;
    let document = open_document(&mut scheduler, document)?;

    let labels: Labels = Rc::new(RefCell::new(HashMap::new()));
    let sink = labels.clone();
    scheduler.subscribe(move |n| on_notification(n, &sink.borrow()));

    let name = scheduler.document(document)?.name().to_string();
    println!(
        "\n{}quire{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        name,
        colors::RESET
    );
    println!("{}Type :help for commands.{}", colors::DIM, colors::RESET);
    scheduler.set_active_document(document)?;

    let mut session = Session {
        document,
        labels,
        last: None,
        count: 0,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let period = scheduler.config().poll_interval().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    let mut drain = true;

    prompt(session.count + 1);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_line(&mut scheduler, &mut session, &line)? {
                    LoopControl::Continue => prompt(session.count + 1),
                    LoopControl::Quit => {
                        drain = false;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(cell) = session.last {
                    scheduler.stop_evaluation(document, cell)?;
                    println!("\n{}Interrupted{}", colors::YELLOW, colors::RESET);
                    prompt(session.count + 1);
                }
            }
            _ = ticker.tick() => {
                scheduler.poll();
            }
        }
    }

    if drain {
        println!();
        if !scheduler.wait_idle(document, DRAIN_TIMEOUT) {
            tracing::warn!("Leaving with cells still running");
        }
    } else {
        scheduler.stop_document_evaluation(document)?;
    }
    Ok(())
}

/// Find the named document, creating it when missing.
fn open_document(scheduler: &mut Scheduler, name: Option<&str>) -> anyhow::Result<DocumentId> {
    let name = match name {
        Some(name) => name.to_string(),
        None => format!("{}{}", UNTITLED, scheduler.notebook().untitled_postfix()),
    };
    let existing = scheduler
        .notebook()
        .get_by_name(&name)
        .first()
        .map(|d| d.id());
    match existing {
        Some(id) => Ok(id),
        None => Ok(scheduler.create_document(&name)?),
    }
}

fn handle_line(
    scheduler: &mut Scheduler,
    session: &mut Session,
    line: &str,
) -> anyhow::Result<LoopControl> {
    let trimmed = line.trim();
    match trimmed {
        "" => {}
        ":quit" | ":q" => return Ok(LoopControl::Quit),
        ":help" => println!("{}", HELP),
        ":stop" => match session.last {
            Some(cell) => scheduler.stop_evaluation(session.document, cell)?,
            None => println!("{}Nothing to stop{}", colors::DIM, colors::RESET),
        },
        ":restart" => scheduler.restart_kernel(session.document)?,
        _ => {
            if let Some(text) = trimmed.strip_prefix(":md") {
                evaluate(scheduler, session, CellKind::Markdown, text.trim())?;
            } else if trimmed.starts_with(':') {
                println!(
                    "{}Unknown command {}{} (try :help)",
                    colors::YELLOW,
                    trimmed,
                    colors::RESET
                );
            } else {
                evaluate(scheduler, session, CellKind::Code, line)?;
            }
        }
    }
    Ok(LoopControl::Continue)
}

fn evaluate(
    scheduler: &mut Scheduler,
    session: &mut Session,
    kind: CellKind,
    text: &str,
) -> anyhow::Result<()> {
    let cell = scheduler.push_cell(session.document, kind, text)?;
    session.count += 1;
    session.labels.borrow_mut().insert(cell, session.count);
    scheduler.evaluate(session.document, cell)?;
    session.last = Some(cell);
    Ok(())
}

fn on_notification(notification: &Notification, labels: &HashMap<CellId, usize>) {
    match (&notification.source, &notification.change) {
        (
            Source::Cell { cell, .. },
            Change::NewResult {
                result: Some(result),
                ..
            },
        ) => {
            let label = labels
                .get(cell)
                .map_or_else(|| cell.to_string(), |n| format!("Out[{}]", n));
            print_result(&label, Some(result));
        }
        (Source::Document { .. }, Change::KernelStateChanged { state }) => {
            print_kernel_state(*state);
        }
        _ => {}
    }
}

fn prompt(next: usize) {
    print!("{}In[{}]:{} ", colors::GREEN, next, colors::RESET);
    colors::flush_stdout();
}
