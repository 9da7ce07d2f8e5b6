//! Conversation log
//!
//! Ordered message history per conversation. User input is only accepted
//! once every tool call made since the previous user message has been
//! answered.

mod pairing;
#[cfg(test)]
mod proptests;

pub use pairing::{check_pairing, incomplete_tail, PairingIssue};

use crate::db::{Conversation, ConversationId, Database, DbError, Message};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error(
        "Tool calls {unmatched:?} of message {assistant_index} are not answered; repair the tail before adding user input"
    )]
    PairingViolation {
        assistant_index: usize,
        unmatched: Vec<String>,
    },
    #[error(transparent)]
    Db(#[from] DbError),
}

impl ConversationError {
    #[allow(dead_code)] // Used in tests
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConversationError::Db(
                DbError::ConversationNotFound(_) | DbError::MessageNotFound { .. }
            )
        )
    }
}

pub type ConversationResult<T> = Result<T, ConversationError>;

/// Transactional access to conversation messages
#[derive(Clone)]
pub struct ConversationLog {
    db: Database,
}

impl ConversationLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Allocate a new, empty conversation
    pub fn create(&self) -> ConversationResult<ConversationId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db.create_conversation(&id)?;
        tracing::info!(conv_id = %id, "Created conversation");
        Ok(id)
    }

    /// Append a message, returning its index.
    ///
    /// User messages are rejected with [`ConversationError::PairingViolation`]
    /// while any tool call since the previous user message is unanswered.
    pub fn append(&self, conversation_id: &str, message: Message) -> ConversationResult<usize> {
        let role = message.role();
        let length = message.content().len();
        let index = self.db.update_messages(conversation_id, |messages| {
            if matches!(message, Message::User { .. }) {
                if let Some(tail) = incomplete_tail(messages) {
                    tracing::warn!(
                        conv_id = %conversation_id,
                        unmatched = ?tail.unmatched,
                        "Rejected user message over unanswered tool calls"
                    );
                    return Err(ConversationError::PairingViolation {
                        assistant_index: tail.assistant_index,
                        unmatched: tail.unmatched,
                    });
                }
            }
            messages.push(message);
            Ok(messages.len() - 1)
        })?;
        tracing::debug!(conv_id = %conversation_id, index, ?role, length, "Appended message");
        Ok(index)
    }

    #[allow(dead_code)] // Used in tests
    pub fn get(&self, conversation_id: &str, index: usize) -> ConversationResult<Message> {
        let messages = self.db.get_messages(conversation_id)?;
        messages
            .into_iter()
            .nth(index)
            .ok_or_else(|| message_not_found(conversation_id, index))
    }

    /// Overwrite the message at `index`, returning the previous one.
    /// Pairing is not re-validated.
    #[allow(dead_code)] // Used in tests
    pub fn replace(
        &self,
        conversation_id: &str,
        index: usize,
        message: Message,
    ) -> ConversationResult<Message> {
        self.db.update_messages(conversation_id, |messages| {
            let slot = messages
                .get_mut(index)
                .ok_or_else(|| message_not_found(conversation_id, index))?;
            Ok(std::mem::replace(slot, message))
        })
    }

    /// Remove the message at `index`, returning it. Pairing is not re-validated.
    #[allow(dead_code)] // Used in tests
    pub fn delete(&self, conversation_id: &str, index: usize) -> ConversationResult<Message> {
        self.db.update_messages(conversation_id, |messages| {
            if index >= messages.len() {
                return Err(message_not_found(conversation_id, index));
            }
            Ok(messages.remove(index))
        })
    }

    /// Messages in order as of the call. Tool responses are dropped when
    /// `include_tool_messages` is false.
    pub fn list(
        &self,
        conversation_id: &str,
        include_tool_messages: bool,
    ) -> ConversationResult<Vec<Message>> {
        let mut messages = self.db.get_messages(conversation_id)?;
        if !include_tool_messages {
            messages.retain(|m| !matches!(m, Message::Tool { .. }));
        }
        Ok(messages)
    }

    /// Drop the earliest assistant turn since the last user message whose
    /// tool calls were not all answered, along with everything after it.
    /// Afterwards a user message can always be appended. Returns whether
    /// anything was removed.
    pub fn repair_incomplete_tail(&self, conversation_id: &str) -> ConversationResult<bool> {
        self.db.update_messages(conversation_id, |messages| {
            let Some(tail) = incomplete_tail(messages) else {
                return Ok(false);
            };
            let removed = messages.len() - tail.assistant_index;
            messages.truncate(tail.assistant_index);
            tracing::info!(
                conv_id = %conversation_id,
                removed,
                unmatched = ?tail.unmatched,
                "Repaired incomplete tool call tail"
            );
            Ok::<_, ConversationError>(true)
        })
    }

    pub fn conversation(&self, conversation_id: &str) -> ConversationResult<Conversation> {
        Ok(self.db.get_conversation(conversation_id)?)
    }

    /// All conversations, most recently updated first
    pub fn conversations(&self) -> ConversationResult<Vec<Conversation>> {
        Ok(self.db.list_conversations()?)
    }

    /// Every pairing problem in the stored history
    pub fn check_pairing(&self, conversation_id: &str) -> ConversationResult<Vec<PairingIssue>> {
        let messages = self.db.get_messages(conversation_id)?;
        Ok(check_pairing(&messages))
    }
}

fn message_not_found(conversation_id: &str, index: usize) -> ConversationError {
    ConversationError::Db(DbError::MessageNotFound {
        conversation_id: conversation_id.to_string(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ToolCallRequest, ToolResult};
    use serde_json::json;

    fn setup() -> (ConversationLog, String) {
        let log = ConversationLog::new(Database::open_in_memory().unwrap());
        let id = log.create().unwrap();
        (log, id)
    }

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "example_function", json!({"input_text": id}))
    }

    #[test]
    fn test_create_returns_uuid() {
        let (log, id) = setup();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert!(log.list(&id, true).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_list() {
        let (log, id) = setup();
        assert_eq!(log.append(&id, Message::user("Hi")).unwrap(), 0);
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("a")]))
            .unwrap();
        log.append(&id, Message::tool(&call("a"), &ToolResult::success("A")))
            .unwrap();
        log.append(&id, Message::assistant("done")).unwrap();

        assert_eq!(log.list(&id, true).unwrap().len(), 4);
        let visible = log.list(&id, false).unwrap();
        assert_eq!(visible.len(), 3);
        assert!(visible.iter().all(|m| !matches!(m, Message::Tool { .. })));
    }

    #[test]
    fn test_user_append_rejected_over_unanswered_calls() {
        let (log, id) = setup();
        log.append(&id, Message::user("go")).unwrap();
        log.append(
            &id,
            Message::assistant_with_tool_calls("", vec![call("a"), call("b")]),
        )
        .unwrap();
        log.append(&id, Message::tool(&call("a"), &ToolResult::success("A")))
            .unwrap();

        let err = log.append(&id, Message::user("next")).unwrap_err();
        assert!(matches!(
            err,
            ConversationError::PairingViolation { assistant_index: 1, ref unmatched }
                if *unmatched == vec!["b".to_string()]
        ));
        // Nothing was written
        assert_eq!(log.list(&id, true).unwrap().len(), 3);

        log.append(&id, Message::tool(&call("b"), &ToolResult::failure("Error in example_function: boom")))
            .unwrap();
        assert_eq!(log.append(&id, Message::user("next")).unwrap(), 4);
    }

    #[test]
    fn test_repair_truncates_and_is_idempotent() {
        let (log, id) = setup();
        log.append(&id, Message::user("go")).unwrap();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("a"), call("b")]))
            .unwrap();
        log.append(&id, Message::tool(&call("a"), &ToolResult::success("A")))
            .unwrap();

        assert!(log.repair_incomplete_tail(&id).unwrap());
        assert_eq!(log.list(&id, true).unwrap(), vec![Message::user("go")]);

        let before = log.conversation(&id).unwrap();
        assert!(!log.repair_incomplete_tail(&id).unwrap());
        let after = log.conversation(&id).unwrap();
        assert_eq!(before.messages, after.messages);
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[test]
    fn test_repair_stacked_unanswered_turns() {
        let (log, id) = setup();
        log.append(&id, Message::user("go")).unwrap();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("a")]))
            .unwrap();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("b")]))
            .unwrap();

        assert!(log.repair_incomplete_tail(&id).unwrap());
        assert_eq!(log.list(&id, true).unwrap(), vec![Message::user("go")]);
        assert!(!log.repair_incomplete_tail(&id).unwrap());
        assert_eq!(log.append(&id, Message::user("again")).unwrap(), 1);
    }

    #[test]
    fn test_user_append_rejected_over_closed_unanswered_window() {
        let (log, id) = setup();
        log.append(&id, Message::user("go")).unwrap();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("a")]))
            .unwrap();
        log.append(&id, Message::assistant("moving on")).unwrap();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("b")]))
            .unwrap();
        log.append(&id, Message::tool(&call("b"), &ToolResult::success("B")))
            .unwrap();

        let err = log.append(&id, Message::user("next")).unwrap_err();
        assert!(matches!(
            err,
            ConversationError::PairingViolation { assistant_index: 1, ref unmatched }
                if *unmatched == vec!["a".to_string()]
        ));

        assert!(log.repair_incomplete_tail(&id).unwrap());
        assert_eq!(log.list(&id, true).unwrap(), vec![Message::user("go")]);
        log.append(&id, Message::user("next")).unwrap();
        assert!(log.check_pairing(&id).unwrap().is_empty());
    }

    #[test]
    fn test_point_operations() {
        let (log, id) = setup();
        log.append(&id, Message::user("one")).unwrap();
        log.append(&id, Message::assistant("two")).unwrap();

        assert_eq!(log.get(&id, 1).unwrap(), Message::assistant("two"));
        let previous = log.replace(&id, 1, Message::assistant("2")).unwrap();
        assert_eq!(previous, Message::assistant("two"));
        assert_eq!(log.get(&id, 1).unwrap(), Message::assistant("2"));

        assert_eq!(log.delete(&id, 0).unwrap(), Message::user("one"));
        assert_eq!(log.list(&id, true).unwrap(), vec![Message::assistant("2")]);
    }

    #[test]
    fn test_out_of_range_index_is_not_found() {
        let (log, id) = setup();
        log.append(&id, Message::user("one")).unwrap();

        assert!(log.get(&id, 5).unwrap_err().is_not_found());
        assert!(log.replace(&id, 1, Message::user("x")).unwrap_err().is_not_found());
        assert!(log.delete(&id, 1).unwrap_err().is_not_found());
        assert_eq!(log.list(&id, true).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_conversation_is_not_found() {
        let (log, _) = setup();
        assert!(log.append("missing", Message::user("x")).unwrap_err().is_not_found());
        assert!(log.list("missing", true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_conversations_listing() {
        let (log, first) = setup();
        let second = log.create().unwrap();
        log.append(&first, Message::user("bump")).unwrap();

        let ids: Vec<_> = log.conversations().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[test]
    fn test_check_pairing_on_stored_log() {
        let (log, id) = setup();
        log.append(&id, Message::assistant_with_tool_calls("", vec![call("a")]))
            .unwrap();
        // Assistant messages are not checked on append
        log.append(&id, Message::assistant("skipped the tool")).unwrap();

        assert_eq!(
            log.check_pairing(&id).unwrap(),
            vec![PairingIssue::Unanswered {
                assistant_index: 0,
                tool_call_id: "a".to_string(),
            }]
        );
    }
}
