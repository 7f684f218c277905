use serde::Deserialize;
use serde_json::Value;

use super::types::{ClaudeContentBlock, ClaudeRecord, ClaudeUsage, MessageContent};
use crate::conversation::record::{flatten_result_content, into_arguments};
use crate::conversation::{ContentBlock, DecodeError, StreamRecord, TokenUsage};

/// Decode one line of Claude `stream-json` output.
pub fn decode_line(line: &str) -> Result<Option<StreamRecord>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::new(format!("invalid JSON: {e}")))?;
    let record_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::new("record has no type discriminator"))?
        .to_string();
    let record = ClaudeRecord::deserialize(value)
        .map_err(|e| DecodeError::new(format!("bad {record_type} record: {e}")))?;

    Ok(Some(match record {
        ClaudeRecord::System {
            subtype,
            session_id,
            model,
        } => StreamRecord::System {
            subtype,
            engine_session_id: session_id,
            model,
        },
        ClaudeRecord::Assistant { message, .. } => StreamRecord::Assistant {
            message_id: message.id,
            blocks: convert_blocks(message.content),
            end_of_message: message.stop_reason.is_some(),
            usage: message.usage.map(convert_usage),
        },
        ClaudeRecord::User { message } => StreamRecord::User {
            blocks: convert_blocks(message.content),
        },
        ClaudeRecord::Result {
            subtype,
            is_error,
            result,
            total_cost_usd,
            usage,
        } => StreamRecord::Result {
            is_error: is_error || subtype.as_deref().is_some_and(|s| s.starts_with("error")),
            summary: result,
            usage: usage.map(convert_usage).unwrap_or_default(),
            cost_usd: total_cost_usd,
        },
        ClaudeRecord::Unknown => StreamRecord::Ignored { record_type },
    }))
}

fn convert_blocks(content: MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(text) => vec![ContentBlock::Text(text)],
        MessageContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                ClaudeContentBlock::Text { text } => Some(ContentBlock::Text(text)),
                ClaudeContentBlock::Thinking { thinking } => Some(ContentBlock::Thinking(thinking)),
                ClaudeContentBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    id,
                    name,
                    input: into_arguments(input),
                }),
                ClaudeContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(ContentBlock::ToolResult {
                    tool_use_id,
                    content: flatten_result_content(&content),
                    is_error,
                }),
                ClaudeContentBlock::Other => None,
            })
            .collect(),
    }
}

fn convert_usage(usage: ClaudeUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens,
        cache_creation_tokens: usage.cache_creation_input_tokens,
    }
}
