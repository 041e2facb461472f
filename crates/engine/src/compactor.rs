//! Active-history compaction
//!
//! Replaces the oldest contiguous run of raw iteration records with a single
//! summary once the active history grows past the iteration threshold or the
//! size bound. The trailing window of recent iterations always stays raw,
//! replaced records move to the archive, and error events are referenced by
//! the summary rather than rewritten. Compaction is mechanical bookkeeping
//! over the records themselves, so it never fails and never calls the
//! oracle.

use chrono::Local;
use tracing::info;

use relay_store::{
    CheckpointSnapshot, HistoryItem, IterationRecord, Summary, TodoStatus, ToolExchange,
};

const EXCERPT_LEN: usize = 100;

/// Compaction policy and execution
#[derive(Debug, Clone)]
pub struct Compactor {
    threshold: u64,
    keep_recent: u64,
    max_active_bytes: usize,
}

impl Compactor {
    pub fn new(threshold: u64, keep_recent: u64, max_active_bytes: usize) -> Self {
        Self {
            threshold,
            keep_recent,
            max_active_bytes,
        }
    }

    /// Serialized size of the active history, the same representation the
    /// checkpoint writes
    pub fn estimated_size(snapshot: &CheckpointSnapshot) -> usize {
        serde_json::to_string(&snapshot.active_history)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn raw_count(snapshot: &CheckpointSnapshot) -> u64 {
        snapshot
            .active_history
            .iter()
            .filter(|item| matches!(item, HistoryItem::Record(_)))
            .count() as u64
    }

    /// Whether the active history is due for compaction.
    ///
    /// False immediately after a compaction pass, which is what makes
    /// repeated calls at the same iteration boundary no-ops.
    pub fn should_compact(&self, snapshot: &CheckpointSnapshot) -> bool {
        let raw = Self::raw_count(snapshot);
        if raw <= self.keep_recent {
            return false;
        }
        raw >= self.threshold || Self::estimated_size(snapshot) > self.max_active_bytes
    }

    /// Compact once if due. Returns true when a summary was produced.
    pub fn compact(&self, snapshot: &mut CheckpointSnapshot) -> bool {
        if !self.should_compact(snapshot) {
            return false;
        }

        // Records keep their original order; everything before the trailing
        // window gets folded into one summary.
        let cutoff = snapshot.iteration_count - self.keep_recent;

        let first_record_idx = snapshot
            .active_history
            .iter()
            .position(|item| matches!(item, HistoryItem::Record(_)));
        let first_record_idx = match first_record_idx {
            Some(idx) => idx,
            None => return false,
        };

        let mut compacted: Vec<IterationRecord> = Vec::new();
        let mut idx = first_record_idx;
        while idx < snapshot.active_history.len() {
            let seq = match &snapshot.active_history[idx] {
                HistoryItem::Record(r) => r.seq,
                HistoryItem::Summary(_) => break,
            };
            if seq > cutoff {
                break;
            }
            if let HistoryItem::Record(record) = snapshot.active_history.remove(idx) {
                compacted.push(record);
            }
        }

        if compacted.is_empty() {
            return false;
        }

        let from_seq = compacted[0].seq;
        let to_seq = compacted[compacted.len() - 1].seq;
        let narrative = self.narrative(snapshot, &compacted, from_seq, to_seq);

        info!(
            "compacted iterations {}-{} ({} records) for {}",
            from_seq,
            to_seq,
            compacted.len(),
            snapshot.task.task_id
        );

        snapshot.active_history.insert(
            first_record_idx,
            HistoryItem::Summary(Summary {
                from_seq,
                to_seq,
                narrative,
                created_at: Local::now(),
            }),
        );
        snapshot.archive.extend(compacted);
        true
    }

    fn narrative(
        &self,
        snapshot: &CheckpointSnapshot,
        records: &[IterationRecord],
        from_seq: u64,
        to_seq: u64,
    ) -> String {
        let mut lines = vec![format!("Progress over iterations {}-{}.", from_seq, to_seq)];

        let mut actions = Vec::new();
        let mut files = Vec::new();
        for record in records {
            for exchange in &record.tool_exchanges {
                actions.push(describe_exchange(record.seq, exchange));
                if let Some(path) = touched_path(exchange) {
                    if !files.contains(&path) {
                        files.push(path);
                    }
                }
            }
        }
        if !actions.is_empty() {
            lines.push("Actions:".to_string());
            lines.extend(actions);
        }
        if !files.is_empty() {
            lines.push(format!("Files touched: {}", files.join(", ")));
        }

        let decisions: Vec<String> = records
            .iter()
            .filter_map(|r| r.reply.as_deref())
            .filter(|reply| !reply.is_empty())
            .map(|reply| format!("- {}", excerpt(reply)))
            .collect();
        if !decisions.is_empty() {
            lines.push("Notes from the assistant:".to_string());
            lines.extend(decisions);
        }

        let error_seqs: Vec<String> = snapshot
            .error_history
            .iter()
            .filter(|event| event.seq >= from_seq && event.seq <= to_seq)
            .map(|event| format!("{} ({})", event.seq, excerpt(&event.detail)))
            .collect();
        if !error_seqs.is_empty() {
            lines.push(format!(
                "Errors in this range, kept in the error history: {}",
                error_seqs.join("; ")
            ));
        }

        let open: Vec<String> = snapshot
            .todos
            .iter()
            .filter(|t| t.status != TodoStatus::Done)
            .map(|t| format!("- {}", excerpt(&t.description)))
            .collect();
        if !open.is_empty() {
            lines.push("Remaining work:".to_string());
            lines.extend(open);
        }

        lines.join("\n")
    }
}

fn describe_exchange(seq: u64, exchange: &ToolExchange) -> String {
    let call = &exchange.call;
    let detail = call
        .arguments
        .get("path")
        .or_else(|| call.arguments.get("command"))
        .and_then(|v| v.as_str())
        .map(|s| format!(" {}", excerpt(s)))
        .unwrap_or_default();
    let status = if exchange.result.success { "ok" } else { "failed" };
    format!("- seq {}: {}{} ({})", seq, call.name, detail, status)
}

/// Path of a successful mutating call, for the file roll-up
fn touched_path(exchange: &ToolExchange) -> Option<String> {
    if !exchange.result.success {
        return None;
    }
    if !matches!(
        exchange.call.name.as_str(),
        "write_file" | "edit_file" | "remove_file"
    ) {
        return None;
    }
    exchange
        .call
        .arguments
        .get("path")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn excerpt(s: &str) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.len() <= EXCERPT_LEN {
        return line.to_string();
    }
    let mut cut = EXCERPT_LEN;
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &line[..cut])
}
