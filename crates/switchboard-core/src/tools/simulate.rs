//! Prompt rewriting and reply scanning for engines without native tools.
//!
//! Every prompt lists the available tools. The engine asks for one with a
//! request block:
//!
//! ```text
//! <<<TOOL_REQUEST name=lint>>>
//! {"path": "src/lib.rs"}
//! <<<END_TOOL_REQUEST>>>
//! ```
//!
//! and is told to wrap what it takes from the output in a result block:
//!
//! ```text
//! <<<TOOL_RESULT id=call_abc>>>
//! ...
//! <<<END_TOOL_RESULT>>>
//! ```

use log::warn;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::call::ToolCall;
use super::{ToolDescriptor, ToolOutput};

static TOOL_RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<TOOL_RESULT id=([A-Za-z0-9_\-]+)>>>(.*?)<<<END_TOOL_RESULT>>>").unwrap()
});

static TOOL_REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<TOOL_REQUEST name=([A-Za-z0-9_:.\-]+)>>>(.*?)<<<END_TOOL_REQUEST>>>")
        .unwrap()
});

/// A tool call asked for in a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

/// Preamble that tells the engine which tools exist and how to ask for one.
/// `None` when there is nothing to offer.
pub fn advertise_tools(tools: &[ToolDescriptor]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let listing = tools
        .iter()
        .map(|descriptor| {
            let schema = serde_json::to_string(&descriptor.schema).unwrap_or_default();
            if descriptor.description.is_empty() {
                format!("- {} (arguments: {})", descriptor.name, schema)
            } else {
                format!(
                    "- {}: {} (arguments: {})",
                    descriptor.name, descriptor.description, schema
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    Some(format!(
        "You can use these tools:\n\
         {listing}\n\
         \n\
         To use one, end your reply with a request block and wait for the result:\n\
         <<<TOOL_REQUEST name=TOOL>>>\n\
         {{\"argument\": \"value\"}}\n\
         <<<END_TOOL_REQUEST>>>\n\
         The output comes back in a later message. Repeat what you take from it \
         between <<<TOOL_RESULT id=...>>> and <<<END_TOOL_RESULT>>> as that message asks."
    ))
}

/// Tool requests in `reply`, in order. Requests whose body is not a JSON
/// object are skipped.
pub fn parse_tool_requests(reply: &str) -> Vec<ToolRequest> {
    TOOL_REQUEST_RE
        .captures_iter(reply)
        .filter_map(|caps| {
            let body = caps[2].trim();
            let arguments = if body.is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(body) {
                    Ok(Value::Object(arguments)) => arguments,
                    _ => {
                        warn!("Skipping {} request: arguments are not a JSON object", &caps[1]);
                        return None;
                    }
                }
            };
            Some(ToolRequest {
                tool_name: caps[1].to_string(),
                arguments,
            })
        })
        .collect()
}

/// Build the prompt that asks the engine to report the tool's result.
pub fn rewrite_prompt(descriptor: &ToolDescriptor, call: &ToolCall, output: &ToolOutput) -> String {
    let schema = serde_json::to_string_pretty(&descriptor.schema).unwrap_or_default();
    let arguments = serde_json::Value::Object(call.arguments.clone());
    let status = if output.is_error {
        "The tool reported an error:"
    } else {
        "The tool returned:"
    };
    let description = if descriptor.description.is_empty() {
        String::new()
    } else {
        format!(" {}", descriptor.description)
    };

    format!(
        "You invoked the tool `{name}`.{description}\n\
         \n\
         Argument schema:\n\
         {schema}\n\
         \n\
         Invocation {id} with arguments:\n\
         {arguments}\n\
         \n\
         {status}\n\
         {text}\n\
         \n\
         Reply with the result you take from this tool, wrapped exactly as follows, then continue:\n\
         <<<TOOL_RESULT id={id}>>>\n\
         (result)\n\
         <<<END_TOOL_RESULT>>>",
        name = descriptor.name,
        id = call.invocation_id,
        text = output.text.trim_end(),
    )
}

/// Text of the last delimited block for `invocation_id`, trimmed.
pub fn extract_result(reply: &str, invocation_id: &str) -> Option<String> {
    TOOL_RESULT_RE
        .captures_iter(reply)
        .filter(|caps| &caps[1] == invocation_id)
        .last()
        .map(|caps| caps[2].trim().to_string())
}
