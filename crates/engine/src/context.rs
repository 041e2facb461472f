//! Prompt assembly from checkpoint state
//!
//! Rebuilds the oracle conversation from the active history alone, which is
//! what makes a resumed task indistinguishable from one that never stopped:
//! summaries render as condensed user turns, raw records replay verbatim.

use chrono::Local;

use relay_oracle::Message;
use relay_store::{CheckpointSnapshot, HistoryItem, IterationOutcome, IterationRecord, Task};

/// Builds the message list for each completion request
pub struct ContextBuilder {
    description: String,
    working_dir: String,
}

impl ContextBuilder {
    pub fn new(task: &Task) -> Self {
        Self {
            description: task.description.clone(),
            working_dir: task.working_dir.display().to_string(),
        }
    }

    fn system_prompt(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            r#"You are relay, an autonomous task execution agent. You work on one task
until it is done, using the tools provided: reading, writing and editing files,
running shell commands, maintaining a todo list, and delegating focused sub-tasks.

## Current time
{}

## Working directory
All file operations are confined to: {}

## How to work
- Break the task into todo entries early and keep their status current.
- Call tools to make progress; reply without tool calls only when the task is done.
- Your final reply should summarize what was accomplished.
- Tool errors are information. Read them, adjust, and try a different approach
rather than repeating a failing call.
- Conversation history may contain progress summaries of earlier iterations;
treat them as accurate."#,
            now, self.working_dir
        )
    }

    /// Full message list: system prompt, task description, then the active
    /// history in order, then any pending note for this round.
    pub fn build_messages(
        &self,
        snapshot: &CheckpointSnapshot,
        pending: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = vec![
            Message::system(self.system_prompt()),
            Message::user(&self.description),
        ];

        for item in &snapshot.active_history {
            match item {
                HistoryItem::Summary(summary) => {
                    messages.push(Message::user(format!(
                        "[Progress summary, iterations {}-{}]\n{}",
                        summary.from_seq, summary.to_seq, summary.narrative
                    )));
                }
                HistoryItem::Record(record) => {
                    self.push_record(&mut messages, record);
                }
            }
        }

        if let Some(note) = pending {
            if !note.is_empty() {
                messages.push(Message::user(note));
            }
        }

        messages
    }

    fn push_record(&self, messages: &mut Vec<Message>, record: &IterationRecord) {
        if !record.request.is_empty() {
            messages.push(Message::user(&record.request));
        }

        if record.tool_exchanges.is_empty() {
            if let Some(reply) = &record.reply {
                messages.push(Message::assistant(reply));
            }
            return;
        }

        let calls = record
            .tool_exchanges
            .iter()
            .map(|exchange| exchange.call.clone())
            .collect();
        messages.push(Message::assistant_with_calls(record.reply.as_deref(), calls));

        for exchange in &record.tool_exchanges {
            messages.push(Message::tool(
                &exchange.call.id,
                &exchange.call.name,
                &exchange.result.output,
            ));
        }

        if record.outcome == IterationOutcome::UserAbort {
            messages.push(Message::user(
                "The previous iteration was interrupted by a pause request. Continue from here.",
            ));
        }
    }
}
