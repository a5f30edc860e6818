//! Terminal rendering

use chrono::{DateTime, Local};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use legion_client::{ConnectionStatus, SlotKind, ToolCall, ToolStatus};
use legion_protocol::{Message, MessageType, SessionInfo, SessionState};

const PREVIEW_CHARS: usize = 160;

pub fn dim(text: &str) -> StyledObject<&str> {
    style(text).dim()
}

pub fn warn(text: &str) -> StyledObject<&str> {
    style(text).yellow().bold()
}

fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Active => Color::Green,
        SessionState::Starting | SessionState::Paused => Color::Yellow,
        SessionState::Error => Color::Red,
        SessionState::Created | SessionState::Terminated => Color::Grey,
    }
}

pub fn sessions_table(sessions: &[SessionInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Name", "State", "Mode", "Project"]);
    for session in sessions {
        table.add_row(vec![
            Cell::new(&session.session_id),
            Cell::new(&session.name),
            Cell::new(session.state.as_str()).fg(state_color(session.state)),
            Cell::new(session.current_permission_mode.as_str()),
            Cell::new(session.project_id.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

fn clock(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn one_line(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

pub fn message(message: &Message) -> String {
    let label = match message.message_type {
        MessageType::User => style("user").cyan(),
        MessageType::Assistant => style("agent").green(),
        MessageType::System => style("system").dim(),
        MessageType::PermissionRequest => style("permission?").yellow(),
        MessageType::PermissionResponse => style("permission").yellow(),
        MessageType::ToolCall => style("tool").magenta(),
        MessageType::Unknown => style("?").dim(),
    };
    let body = if message.content.trim().is_empty() {
        let tools: Vec<&str> = message.metadata.tool_uses().map(|t| t.name.as_str()).collect();
        if tools.is_empty() {
            String::new()
        } else {
            format!("[{}]", tools.join(", "))
        }
    } else {
        one_line(&message.content)
    };
    format!("{} {:>11} {}", dim(&clock(message.millis())), label, body)
}

pub fn tool_call(call: &ToolCall) -> String {
    let status = call.effective_status();
    let marker = match status {
        ToolStatus::Pending => style("○").dim(),
        ToolStatus::PermissionRequired => style("?").yellow().bold(),
        ToolStatus::Executing => style("◐").blue(),
        ToolStatus::Completed => style("●").green(),
        ToolStatus::Error => style("✗").red(),
    };
    let mut line = format!(
        "  {marker} {} {} {}",
        style(&call.tool_name).bold(),
        dim(&call.tool_use_id),
        status.as_str()
    );
    if let Some(caveat) = call.caveat() {
        line.push_str(&format!(" {}", warn(&format!("({caveat})"))));
    } else if let Some(result) = call.result.as_ref().filter(|r| r.is_error) {
        let text = result
            .content
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| result.content.to_string());
        line.push_str(&format!(" {}", style(one_line(&text)).red()));
    }
    line
}

pub fn permission_hint(session_id: &str, request_id: &str, tool_use_id: Option<&str>) -> String {
    let tool = tool_use_id.unwrap_or("unknown tool");
    format!(
        "  {} {request_id} for {tool}\n    answer with: legion respond {session_id} {request_id} --allow | --deny",
        warn("permission requested:")
    )
}

pub fn connection(channel: SlotKind, status: ConnectionStatus) -> String {
    let text = match status {
        ConnectionStatus::Disconnected => style("disconnected".to_string()).dim(),
        ConnectionStatus::Connecting => style("connecting".to_string()).dim(),
        ConnectionStatus::Connected => style("connected".to_string()).green(),
        ConnectionStatus::Reconnecting { attempt } => {
            style(format!("reconnecting (attempt {attempt})")).yellow()
        }
        ConnectionStatus::Failed => style("failed".to_string()).red().bold(),
    };
    format!("{} {}", dim(channel.as_str()), text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_content_is_flattened_and_cut() {
        let text = format!("first line\nsecond {}", "x".repeat(400));
        let line = one_line(&text);
        assert!(line.starts_with("first line second"));
        assert!(line.ends_with('…'));
        assert_eq!(line.chars().count(), PREVIEW_CHARS + 1);
    }

    #[test]
    fn short_content_is_kept() {
        assert_eq!(one_line("  ls -la  "), "ls -la");
    }
}
