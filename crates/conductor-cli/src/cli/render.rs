//! Table rendering shared by the commands.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use conductor_types::execution::{NodeExecution, Status};

pub fn format_status(status: Status) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        Status::Succeeded => cell.fg(Color::Green),
        Status::IgnoreFailed | Status::Skipped => cell.fg(Color::DarkGreen),
        Status::Failed | Status::Errored | Status::Expired => cell.fg(Color::Red),
        Status::Aborted => cell.fg(Color::DarkYellow),
        Status::InterventionWaiting => cell.fg(Color::Magenta),
        Status::Queued | Status::Running => cell.fg(Color::Blue),
        Status::AsyncWaiting | Status::TaskWaiting | Status::Paused | Status::Discontinuing => {
            cell.fg(Color::Yellow)
        }
    }
}

/// Check mark for positive statuses, cross otherwise.
pub fn status_mark(status: Status) -> console::StyledObject<&'static str> {
    if status.is_positive() {
        console::style("✓").green().bold()
    } else {
        console::style("✗").red().bold()
    }
}

/// Depth of `ne` below the plan root, from its ambiance.
fn depth(ne: &NodeExecution) -> usize {
    ne.ambiance.levels.len().saturating_sub(1)
}

pub fn execution_table(executions: &[NodeExecution]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Mode"),
            Cell::new("Failure"),
        ]);

    for ne in executions {
        let mode = ne
            .mode
            .map(|m| format!("{m:?}"))
            .unwrap_or_else(|| "-".to_string());
        let failure = ne
            .failure_info
            .as_ref()
            .map(|f| f.error_message.clone())
            .unwrap_or_else(|| "-".to_string());
        let mut attempt = (ne.ambiance.current_retry_index() + 1).to_string();
        if ne.old_retry {
            attempt.push_str(" (replaced)");
        }

        table.add_row(vec![
            Cell::new(format!("{}{}", "  ".repeat(depth(ne)), ne.identifier)),
            Cell::new(&ne.step_type.type_name),
            format_status(ne.status),
            Cell::new(attempt),
            Cell::new(mode),
            Cell::new(failure),
        ]);
    }
    table
}
