//! Tool-call/response pairing analysis
//!
//! Every assistant message that requests tool calls opens a response window:
//! the run of `tool` messages directly after it. A window is closed by the
//! first non-tool message. Each requested id must be answered exactly once
//! inside its window before the window closes.
//!
//! The tail of a conversation is everything after its last user message.
//! A user message may only be added when every window in the tail is
//! complete.

use crate::db::Message;
use std::collections::HashMap;

/// Unanswered tool calls after the last user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteTail {
    /// Index of the earliest assistant message in the tail whose calls are
    /// not all answered
    pub assistant_index: usize,
    /// Requested ids not answered exactly once
    pub unmatched: Vec<String>,
}

/// A pairing problem found anywhere in a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingIssue {
    /// The window closed without an answer for this call
    Unanswered {
        assistant_index: usize,
        tool_call_id: String,
    },
    /// The call was answered more than once
    Duplicated {
        assistant_index: usize,
        tool_call_id: String,
    },
    /// A tool message that answers no request of its window
    Orphaned {
        message_index: usize,
        tool_call_id: String,
    },
}

/// Response window of the assistant message at `assistant_index`
struct Window<'a> {
    requested: Vec<&'a str>,
    /// Answers per tool call id, including ids nobody asked for
    answers: HashMap<&'a str, Vec<usize>>,
    /// Index of the first message after the window
    end: usize,
}

fn window(messages: &[Message], assistant_index: usize) -> Window<'_> {
    let requested = messages[assistant_index]
        .tool_calls()
        .iter()
        .map(|call| call.id.as_str())
        .collect();

    let mut answers: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut end = assistant_index + 1;
    while let Some(Message::Tool { tool_call_id, .. }) = messages.get(end) {
        answers.entry(tool_call_id.as_str()).or_default().push(end);
        end += 1;
    }

    Window {
        requested,
        answers,
        end,
    }
}

impl Window<'_> {
    fn unmatched(&self) -> Vec<String> {
        self.requested
            .iter()
            .filter(|id| self.answers.get(*id).map_or(0, Vec::len) != 1)
            .map(|id| (*id).to_string())
            .collect()
    }
}

/// Find the first tool-calling assistant message after the last user
/// message whose calls are not all answered exactly once.
///
/// Truncating the conversation to `assistant_index` leaves a tail with no
/// incomplete windows.
pub fn incomplete_tail(messages: &[Message]) -> Option<IncompleteTail> {
    let start = messages
        .iter()
        .rposition(|m| matches!(m, Message::User { .. }))
        .map_or(0, |i| i + 1);

    (start..messages.len())
        .filter(|&i| !messages[i].tool_calls().is_empty())
        .find_map(|assistant_index| {
            let unmatched = window(messages, assistant_index).unmatched();
            (!unmatched.is_empty()).then_some(IncompleteTail {
                assistant_index,
                unmatched,
            })
        })
}

/// Scan the whole conversation for pairing problems.
///
/// An open window at the end of the log is not reported as unanswered; that
/// state is what [`incomplete_tail`] is for.
pub fn check_pairing(messages: &[Message]) -> Vec<PairingIssue> {
    let mut issues = Vec::new();
    let mut index = 0;

    while index < messages.len() {
        match &messages[index] {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                let window = window(messages, index);
                let closed = window.end < messages.len();

                for id in &window.requested {
                    match window.answers.get(id).map_or(0, Vec::len) {
                        0 if closed => issues.push(PairingIssue::Unanswered {
                            assistant_index: index,
                            tool_call_id: (*id).to_string(),
                        }),
                        0 | 1 => {}
                        _ => issues.push(PairingIssue::Duplicated {
                            assistant_index: index,
                            tool_call_id: (*id).to_string(),
                        }),
                    }
                }

                let mut orphans: Vec<(usize, &str)> = window
                    .answers
                    .iter()
                    .filter(|(id, _)| !window.requested.contains(id))
                    .flat_map(|(id, at)| at.iter().map(move |i| (*i, *id)))
                    .collect();
                orphans.sort_unstable();
                issues.extend(orphans.into_iter().map(|(message_index, id)| {
                    PairingIssue::Orphaned {
                        message_index,
                        tool_call_id: id.to_string(),
                    }
                }));

                index = window.end;
            }
            Message::Tool { tool_call_id, .. } => {
                issues.push(PairingIssue::Orphaned {
                    message_index: index,
                    tool_call_id: tool_call_id.clone(),
                });
                index += 1;
            }
            _ => index += 1,
        }
    }

    issues
}
