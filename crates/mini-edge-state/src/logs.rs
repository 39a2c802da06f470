//! Process-wide buffer of worker log lines.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::now_millis;
use crate::observers::{Observers, Subscription};

/// Whether a line came from a normal log call or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Error,
}

/// A single guest log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub level: String,
    pub message: String,
    pub time: i64,
    pub worker: String,
    pub request_id: String,
}

impl LogLine {
    /// A line stamped with the current time. `error` level lines are
    /// [`LogKind::Error`].
    pub fn new(
        level: impl Into<String>,
        message: impl Into<String>,
        worker: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        let level = level.into();
        let kind = if level == "error" {
            LogKind::Error
        } else {
            LogKind::Log
        };
        Self {
            kind,
            level,
            message: message.into(),
            time: now_millis(),
            worker: worker.into(),
            request_id: request_id.into(),
        }
    }
}

/// Bounded log buffer with live observers.
pub struct LogBuffer {
    lines: RwLock<VecDeque<LogLine>>,
    capacity: usize,
    observers: Arc<Observers<LogLine>>,
}

impl LogBuffer {
    pub fn new(capacity: usize, observer_queue: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            observers: Observers::new(observer_queue),
        }
    }

    /// Append a line, dropping the oldest past capacity, and publish it.
    pub fn push(&self, line: LogLine) {
        {
            let mut lines = self.lines.write();
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        self.observers.publish(&line);
    }

    /// Buffered lines, oldest first.
    pub fn list(&self) -> Vec<LogLine> {
        self.lines.read().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> Subscription<LogLine> {
        self.observers.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_first_and_bounded() {
        let logs = LogBuffer::new(2, 4);
        for i in 0..3 {
            logs.push(LogLine::new("info", format!("line {i}"), "w", "req"));
        }

        let messages: Vec<String> = logs.list().into_iter().map(|l| l.message).collect();
        assert_eq!(messages, ["line 1", "line 2"]);
    }

    #[test]
    fn test_error_level_kind() {
        assert_eq!(LogLine::new("error", "x", "w", "r").kind, LogKind::Error);
        assert_eq!(LogLine::new("warn", "x", "w", "r").kind, LogKind::Log);

        let json = serde_json::to_value(LogLine::new("error", "x", "w", "r")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["request_id"], "r");
    }

    #[tokio::test]
    async fn test_observers_receive_lines() {
        let logs = LogBuffer::new(10, 4);
        let mut sub = logs.subscribe();

        logs.push(LogLine::new("info", "hello", "w", "r"));
        assert_eq!(sub.recv().await.unwrap().message, "hello");
    }
}
