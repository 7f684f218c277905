//! Plain-text rendering of a transcript for a fresh engine process.

use crate::conversation::{Role, Turn, TurnContent};

const HEADER: &str = "Conversation so far (continue from here):";
const TRUNCATED: &str = "…";

/// Render `turns` as a compact replay of at most `max_chars` characters.
///
/// Metadata and diagnostics are skipped. When the budget runs out the
/// oldest turns are dropped first. A newest turn that is too long on its own
/// keeps only its end, behind a `…` marker.
pub fn render_replay(turns: &[Turn], max_chars: usize) -> Option<String> {
    let mut entries: Vec<String> = Vec::new();
    let mut used = HEADER.chars().count();

    for turn in turns.iter().rev() {
        let Some(entry) = render_turn(turn) else {
            continue;
        };
        // +2 for the blank line separating entries.
        let cost = entry.chars().count() + 2;
        if used + cost > max_chars {
            if entries.is_empty() {
                let room = max_chars.saturating_sub(used + 2 + TRUNCATED.chars().count());
                if room > 0 {
                    entries.push(format!("{}{}", TRUNCATED, tail_chars(&entry, room)));
                }
            }
            break;
        }
        used += cost;
        entries.push(entry);
    }

    if entries.is_empty() {
        return None;
    }
    entries.reverse();
    Some(format!("{}\n\n{}", HEADER, entries.join("\n\n")))
}

/// The last `count` characters of `text`.
fn tail_chars(text: &str, count: usize) -> &str {
    let skip = text.chars().count().saturating_sub(count);
    match text.char_indices().nth(skip) {
        Some((at, _)) => &text[at..],
        None => "",
    }
}

fn render_turn(turn: &Turn) -> Option<String> {
    match &turn.content {
        TurnContent::Text(text) => {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System | Role::ToolResult => return None,
            };
            Some(format!("{}: {}", speaker, text.trim()))
        }
        TurnContent::ToolInvocation(invocation) => Some(format!(
            "[tool call {} {}({})]",
            invocation.invocation_id,
            invocation.tool_name,
            serde_json::Value::Object(invocation.arguments.clone())
        )),
        TurnContent::ToolResult(result) => {
            let marker = if result.is_error { "tool error" } else { "tool result" };
            Some(format!(
                "[{} {}] {}",
                marker,
                result.invocation_id,
                result.output.trim()
            ))
        }
        TurnContent::Metadata(_) => None,
    }
}
