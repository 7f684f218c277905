//! Per-session stream state machine.
//!
//! The parser owns the pieces of state that span records: buffered assistant
//! text waiting for its end-of-message marker, the pending-invocation index
//! used to pair tool results, and whether the current run already closed.

use std::collections::HashMap;

use log::{debug, warn};

use super::record::{ContentBlock, DecodeError, StreamRecord};
use super::transcript::Transcript;
use super::turn::{
    DiagnosticKind, Role, TokenUsage, ToolInvocation, ToolResult, Turn, TurnContent, TurnMetadata,
};
use crate::engines::EngineKind;

/// What a single line (or a flush) produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    TurnAppended(Turn),
    ToolPaired {
        invocation_id: String,
        invocation_index: u64,
        result_index: u64,
    },
    OrphanToolResult {
        invocation_id: String,
    },
    EngineSessionId(String),
    StreamClosed {
        is_error: bool,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
}

#[derive(Debug, Clone)]
struct PendingInvocation {
    tool_name: String,
    turn_index: u64,
    /// Answered by the tool bridge, not by the engine's stream.
    claimed: bool,
}

#[derive(Debug)]
pub struct StreamParser {
    engine: EngineKind,
    pending: HashMap<String, PendingInvocation>,
    text: String,
    text_usage: Option<TokenUsage>,
    message_id: Option<String>,
    closed: bool,
}

impl StreamParser {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            pending: HashMap::new(),
            text: String::new(),
            text_usage: None,
            message_id: None,
            closed: false,
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Decode and apply one raw stdout line.
    ///
    /// Never fails: undecodable lines become diagnostic system turns that keep
    /// the raw text.
    pub fn consume_line(
        &mut self,
        transcript: &mut Transcript,
        raw_line: &str,
    ) -> Vec<ParsedEvent> {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Vec::new();
        }
        match self.engine.decode_line(line) {
            Ok(Some(record)) => self.apply(transcript, record),
            Ok(None) => Vec::new(),
            Err(err) => self.malformed(transcript, line, err),
        }
    }

    pub fn apply(&mut self, transcript: &mut Transcript, record: StreamRecord) -> Vec<ParsedEvent> {
        let mut events = Vec::new();

        match record {
            StreamRecord::System {
                subtype,
                engine_session_id,
                model,
            } => {
                if let Some(id) = &engine_session_id {
                    events.push(ParsedEvent::EngineSessionId(id.clone()));
                }
                if subtype.as_deref().map_or(true, |s| s == "init") {
                    push_turn(
                        transcript,
                        Role::System,
                        TurnContent::Metadata(TurnMetadata::SessionStarted {
                            engine_session_id,
                            model,
                        }),
                        None,
                        &mut events,
                    );
                } else {
                    debug!("Skipping system record subtype {:?}", subtype);
                }
            }

            StreamRecord::Assistant {
                message_id,
                blocks,
                end_of_message,
                usage,
            } => {
                self.closed = false;
                if message_id.is_some() && message_id != self.message_id {
                    // A new message id means the previous message is over.
                    self.flush_text(transcript, &mut events);
                    self.message_id = message_id;
                }
                if usage.is_some() {
                    self.text_usage = usage;
                }

                for block in blocks {
                    match block {
                        ContentBlock::Text(text) => self.text.push_str(&text),
                        ContentBlock::Thinking(text) => {
                            self.flush_text(transcript, &mut events);
                            if !text.is_empty() {
                                push_turn(
                                    transcript,
                                    Role::Assistant,
                                    TurnContent::Metadata(TurnMetadata::Reasoning { text }),
                                    None,
                                    &mut events,
                                );
                            }
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            self.flush_text(transcript, &mut events);
                            self.invoke(transcript, id, name, input, &mut events);
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => self.pair_streamed(
                            transcript,
                            tool_use_id,
                            content,
                            is_error,
                            &mut events,
                        ),
                    }
                }

                if end_of_message {
                    self.flush_text(transcript, &mut events);
                    self.message_id = None;
                }
            }

            StreamRecord::User { blocks } => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => self.pair_streamed(
                            transcript,
                            tool_use_id,
                            content,
                            is_error,
                            &mut events,
                        ),
                        // User text is recorded when the prompt is submitted, not from the echo.
                        ContentBlock::Text(_) | ContentBlock::Thinking(_) => {}
                        ContentBlock::ToolUse { id, .. } => {
                            debug!("Ignoring tool_use {} in user record", id);
                        }
                    }
                }
            }

            StreamRecord::Result {
                is_error,
                summary,
                usage,
                cost_usd,
            } => {
                if self.closed {
                    debug!("Ignoring repeated result record for closed run");
                    return events;
                }
                self.flush_text(transcript, &mut events);
                self.message_id = None;
                self.closed = true;
                push_turn(
                    transcript,
                    Role::System,
                    TurnContent::Metadata(TurnMetadata::StreamClosed {
                        is_error,
                        summary,
                        usage,
                        cost_usd,
                    }),
                    None,
                    &mut events,
                );
                events.push(ParsedEvent::StreamClosed {
                    is_error,
                    usage,
                    cost_usd,
                });
            }

            StreamRecord::EngineError { message } => {
                self.flush_text(transcript, &mut events);
                warn!("{} reported an error: {}", self.engine, message);
                push_turn(
                    transcript,
                    Role::System,
                    TurnContent::diagnostic(DiagnosticKind::EngineError, message, None),
                    None,
                    &mut events,
                );
            }

            StreamRecord::Ignored { record_type } => {
                debug!("Ignoring {} record of type {}", self.engine, record_type);
            }
        }

        events
    }

    /// Flush buffered text at end of stream (process exit).
    pub fn finish(&mut self, transcript: &mut Transcript) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        self.flush_text(transcript, &mut events);
        self.message_id = None;
        events
    }

    /// Drop every unclaimed pending invocation. Results that arrive later
    /// become orphans.
    pub fn abandon_pending(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.claimed);
        let count = before - self.pending.len();
        if count > 0 {
            debug!("Abandoning {} pending tool invocation(s)", count);
        }
        count
    }

    /// Hand a pending invocation to the tool bridge.
    ///
    /// A claimed invocation outlives `abandon_pending` and is answered through
    /// `resolve`; results for it in the engine's own stream are ignored.
    pub fn claim(&mut self, invocation_id: &str) -> bool {
        match self.pending.get_mut(invocation_id) {
            Some(pending) => {
                pending.claimed = true;
                true
            }
            None => false,
        }
    }

    /// Record an invocation the bridge started itself. It begins claimed.
    pub fn record_invocation(
        &mut self,
        transcript: &mut Transcript,
        invocation: ToolInvocation,
    ) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        let id = invocation.invocation_id.clone();
        self.invoke(
            transcript,
            invocation.invocation_id,
            invocation.tool_name,
            invocation.arguments,
            &mut events,
        );
        self.claim(&id);
        events
    }

    /// Pair a result produced outside the engine's stream.
    pub fn resolve(&mut self, transcript: &mut Transcript, result: ToolResult) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        self.pair(
            transcript,
            result.invocation_id,
            result.output,
            result.is_error,
            &mut events,
        );
        events
    }

    pub fn pending_invocations(&self) -> usize {
        self.pending.len()
    }

    /// Start of a new run: a fresh process may close again.
    pub fn begin_run(&mut self) {
        self.closed = false;
    }

    fn invoke(
        &mut self,
        transcript: &mut Transcript,
        id: String,
        name: String,
        input: serde_json::Map<String, serde_json::Value>,
        events: &mut Vec<ParsedEvent>,
    ) {
        let turn_index = push_turn(
            transcript,
            Role::Assistant,
            TurnContent::ToolInvocation(ToolInvocation {
                tool_name: name.clone(),
                arguments: input,
                invocation_id: id.clone(),
            }),
            None,
            events,
        );
        if self
            .pending
            .insert(
                id.clone(),
                PendingInvocation {
                    tool_name: name,
                    turn_index,
                    claimed: false,
                },
            )
            .is_some()
        {
            warn!("Tool invocation id {} reused before its result arrived", id);
        }
    }

    fn pair_streamed(
        &mut self,
        transcript: &mut Transcript,
        invocation_id: String,
        output: String,
        is_error: bool,
        events: &mut Vec<ParsedEvent>,
    ) {
        if self.pending.get(&invocation_id).is_some_and(|p| p.claimed) {
            debug!("Ignoring engine result for {}, the bridge answers it", invocation_id);
            return;
        }
        self.pair(transcript, invocation_id, output, is_error, events);
    }

    fn pair(
        &mut self,
        transcript: &mut Transcript,
        invocation_id: String,
        output: String,
        is_error: bool,
        events: &mut Vec<ParsedEvent>,
    ) {
        let Some(pending) = self.pending.remove(&invocation_id) else {
            warn!("Discarding tool result for unknown invocation {}", invocation_id);
            push_turn(
                transcript,
                Role::System,
                TurnContent::diagnostic(
                    DiagnosticKind::OrphanToolResult,
                    format!("tool result for unknown invocation {invocation_id} was discarded"),
                    None,
                ),
                None,
                events,
            );
            events.push(ParsedEvent::OrphanToolResult { invocation_id });
            return;
        };

        debug!("Paired {} result for {}", pending.tool_name, invocation_id);
        let result_index = push_turn(
            transcript,
            Role::ToolResult,
            TurnContent::ToolResult(ToolResult {
                invocation_id: invocation_id.clone(),
                output,
                is_error,
            }),
            None,
            events,
        );
        events.push(ParsedEvent::ToolPaired {
            invocation_id,
            invocation_index: pending.turn_index,
            result_index,
        });
    }

    fn flush_text(&mut self, transcript: &mut Transcript, events: &mut Vec<ParsedEvent>) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let usage = self.text_usage.take();
        push_turn(transcript, Role::Assistant, TurnContent::Text(text), usage, events);
    }

    fn malformed(
        &mut self,
        transcript: &mut Transcript,
        line: &str,
        err: DecodeError,
    ) -> Vec<ParsedEvent> {
        warn!("Malformed {} stream record: {}", self.engine, err);
        let mut events = Vec::new();
        push_turn(
            transcript,
            Role::System,
            TurnContent::diagnostic(
                DiagnosticKind::MalformedStreamRecord,
                err.reason,
                Some(line.to_string()),
            ),
            None,
            &mut events,
        );
        events
    }
}

fn push_turn(
    transcript: &mut Transcript,
    role: Role,
    content: TurnContent,
    usage: Option<TokenUsage>,
    events: &mut Vec<ParsedEvent>,
) -> u64 {
    let turn = transcript.append(role, content, usage).clone();
    let index = turn.index;
    events.push(ParsedEvent::TurnAppended(turn));
    index
}
