//! Property tests for the conversation log pairing rules

use super::{check_pairing, incomplete_tail, ConversationError, ConversationLog};
use crate::db::{Database, Message, ToolCallRequest, ToolResult};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    User(String),
    Reply(String),
    Request(usize),
    /// Answer one of the currently unanswered calls
    Answer { pick: usize, success: bool },
    Repair,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z ]{1,12}".prop_map(Op::User),
        "[a-z ]{1,12}".prop_map(Op::Reply),
        (1usize..4).prop_map(Op::Request),
        (any::<usize>(), any::<bool>()).prop_map(|(pick, success)| Op::Answer { pick, success }),
        Just(Op::Repair),
    ]
}

fn apply(log: &ConversationLog, id: &str, op: Op, next_call: &mut usize) {
    match op {
        Op::User(text) => match log.append(id, Message::user(text)) {
            Ok(_) | Err(ConversationError::PairingViolation { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        },
        Op::Reply(text) => {
            log.append(id, Message::assistant(text)).unwrap();
        }
        Op::Request(n) => {
            let calls = (0..n)
                .map(|_| {
                    *next_call += 1;
                    ToolCallRequest::new(
                        format!("call_{next_call}"),
                        "example_function",
                        serde_json::json!({}),
                    )
                })
                .collect();
            log.append(id, Message::assistant_with_tool_calls("", calls))
                .unwrap();
        }
        Op::Answer { pick, success } => {
            let messages = log.list(id, true).unwrap();
            if let Some(tail) = incomplete_tail(&messages) {
                let call_id = &tail.unmatched[pick % tail.unmatched.len()];
                let call = ToolCallRequest::new(call_id.clone(), "example_function", serde_json::json!({}));
                let result = if success {
                    ToolResult::success("ok")
                } else {
                    ToolResult::failure("Error in example_function: boom")
                };
                log.append(id, Message::tool(&call, &result)).unwrap();
            }
        }
        Op::Repair => {
            log.repair_incomplete_tail(id).unwrap();
        }
    }
}

fn setup() -> (ConversationLog, String) {
    let log = ConversationLog::new(Database::open_in_memory().unwrap());
    let id = log.create().unwrap();
    (log, id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// No stored user message ever follows unanswered tool calls
    #[test]
    fn prop_user_never_follows_unanswered_calls(ops in proptest::collection::vec(arb_op(), 0..30)) {
        let (log, id) = setup();
        let mut next_call = 0;
        for op in ops {
            apply(&log, &id, op, &mut next_call);
        }

        let messages = log.list(&id, true).unwrap();
        for (index, message) in messages.iter().enumerate() {
            if matches!(message, Message::User { .. }) {
                prop_assert_eq!(incomplete_tail(&messages[..index]), None);
                prop_assert!(check_pairing(&messages[..index]).is_empty());
            }
        }
    }

    /// After repair the tail is complete, and repairing again changes nothing
    #[test]
    fn prop_repair_is_idempotent(ops in proptest::collection::vec(arb_op(), 0..30)) {
        let (log, id) = setup();
        let mut next_call = 0;
        for op in ops {
            apply(&log, &id, op, &mut next_call);
        }

        log.repair_incomplete_tail(&id).unwrap();
        let repaired = log.list(&id, true).unwrap();
        prop_assert_eq!(incomplete_tail(&repaired), None);
        prop_assert!(log.append(&id, Message::user("after repair")).is_ok());
        log.delete(&id, repaired.len()).unwrap();

        prop_assert!(!log.repair_incomplete_tail(&id).unwrap());
        prop_assert_eq!(log.list(&id, true).unwrap(), repaired);
    }

    /// Turns built the way the controller builds them always pair up,
    /// whatever mix of failed and successful results they carry
    #[test]
    fn prop_complete_turns_have_no_issues(
        turns in proptest::collection::vec(proptest::collection::vec(any::<bool>(), 0..4), 0..8)
    ) {
        let mut messages = Vec::new();
        for (turn, outcomes) in turns.iter().enumerate() {
            messages.push(Message::user(format!("turn {turn}")));
            let calls: Vec<_> = (0..outcomes.len())
                .map(|i| ToolCallRequest::new(format!("t{turn}_{i}"), "example_function", serde_json::json!({})))
                .collect();
            if calls.is_empty() {
                messages.push(Message::assistant("reply"));
                continue;
            }
            messages.push(Message::assistant_with_tool_calls("", calls.clone()));
            for (call, ok) in calls.iter().zip(outcomes).rev() {
                let result = if *ok { ToolResult::success("ok") } else { ToolResult::failure("Error: x") };
                messages.push(Message::tool(call, &result));
            }
        }

        prop_assert!(check_pairing(&messages).is_empty());
        prop_assert_eq!(incomplete_tail(&messages), None);
    }
}
