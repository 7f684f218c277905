use serde_json::Value;

use super::types::GeminiStreamEvent;
use crate::conversation::record::into_arguments;
use crate::conversation::{ContentBlock, DecodeError, StreamRecord, TokenUsage};

/// Decode one line of Gemini `stream-json` output.
pub fn decode_line(line: &str) -> Result<Option<StreamRecord>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event: GeminiStreamEvent = serde_json::from_str(line)
        .map_err(|e| DecodeError::new(format!("invalid gemini record: {e}")))?;

    let record = match event.event_type.as_str() {
        "init" => StreamRecord::System {
            subtype: Some("init".to_string()),
            engine_session_id: event.session_id,
            model: event.model,
        },
        "message" => {
            if event.role.as_deref() == Some("user") {
                return Ok(Some(StreamRecord::Ignored {
                    record_type: "message/user".to_string(),
                }));
            }
            StreamRecord::Assistant {
                message_id: None,
                blocks: event.content.map(ContentBlock::Text).into_iter().collect(),
                end_of_message: event.delta != Some(true),
                usage: None,
            }
        }
        "tool_use" => {
            let id = event
                .tool_id
                .ok_or_else(|| DecodeError::new("tool_use record without tool_id"))?;
            StreamRecord::Assistant {
                message_id: None,
                blocks: vec![ContentBlock::ToolUse {
                    id,
                    name: event.tool_name.unwrap_or_default(),
                    input: into_arguments(event.parameters.unwrap_or(Value::Null)),
                }],
                end_of_message: false,
                usage: None,
            }
        }
        "tool_result" => {
            let tool_use_id = event
                .tool_id
                .ok_or_else(|| DecodeError::new("tool_result record without tool_id"))?;
            let is_error = event.status.as_deref() == Some("error");
            let content = if is_error {
                error_text(event.error.as_ref()).or(event.output)
            } else {
                event.output
            };
            StreamRecord::User {
                blocks: vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content: content.unwrap_or_default(),
                    is_error,
                }],
            }
        }
        "error" => StreamRecord::EngineError {
            message: event
                .message
                .or_else(|| error_text(event.error.as_ref()))
                .unwrap_or_else(|| "unknown error".to_string()),
        },
        "result" => {
            let stats = event.stats.unwrap_or_default();
            StreamRecord::Result {
                is_error: event.status.as_deref() == Some("error"),
                summary: None,
                usage: TokenUsage {
                    input_tokens: stats.input_tokens,
                    output_tokens: stats.output_tokens,
                    ..Default::default()
                },
                cost_usd: None,
            }
        }
        other => StreamRecord::Ignored {
            record_type: other.to_string(),
        },
    };
    Ok(Some(record))
}

fn error_text(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_messages_do_not_end_the_message() {
        let rec = decode_line(r#"{"type":"message","role":"assistant","content":"a","delta":true}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(rec, StreamRecord::Assistant { end_of_message: false, .. }));

        let rec = decode_line(r#"{"type":"message","role":"assistant","content":"all"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(rec, StreamRecord::Assistant { end_of_message: true, .. }));
    }

    #[test]
    fn user_echo_is_ignored() {
        let rec = decode_line(r#"{"type":"message","role":"user","content":"hi"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(rec, StreamRecord::Ignored { .. }));
    }

    #[test]
    fn tool_use_and_result_map_to_blocks() {
        let rec = decode_line(
            r#"{"type":"tool_use","tool_name":"read_file","tool_id":"g1","parameters":{"path":"a.rs"}}"#,
        )
        .unwrap()
        .unwrap();
        match rec {
            StreamRecord::Assistant { blocks, .. } => {
                assert!(matches!(&blocks[0], ContentBlock::ToolUse { id, .. } if id == "g1"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let rec = decode_line(
            r#"{"type":"tool_result","tool_id":"g1","status":"error","error":{"message":"denied"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            rec,
            StreamRecord::User {
                blocks: vec![ContentBlock::ToolResult {
                    tool_use_id: "g1".to_string(),
                    content: "denied".to_string(),
                    is_error: true,
                }]
            }
        );
    }

    #[test]
    fn tool_use_without_id_is_malformed() {
        assert!(decode_line(r#"{"type":"tool_use","tool_name":"x"}"#).is_err());
    }

    #[test]
    fn result_carries_stats() {
        let rec = decode_line(
            r#"{"type":"result","status":"success","stats":{"input_tokens":4,"output_tokens":6}}"#,
        )
        .unwrap()
        .unwrap();
        match rec {
            StreamRecord::Result { usage, is_error, .. } => {
                assert!(!is_error);
                assert_eq!(usage.total(), 10);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
