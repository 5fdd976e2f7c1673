//! Progress events for a run, fanned out over a broadcast channel.
use crate::directive::RegenerationKind;
use crate::review::ReviewVerdict;
use crate::stage::{StageSlot, TokenUsage};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: String,
    },
    StageStarted {
        run_id: String,
        slot: StageSlot,
        round: u32,
    },
    StageFinished {
        run_id: String,
        slot: StageSlot,
        round: u32,
        latency_ms: u64,
        usage: TokenUsage,
    },
    ReviewVerdict {
        run_id: String,
        round: u32,
        verdict: ReviewVerdict,
    },
    SyntaxChecked {
        run_id: String,
        round: u32,
        valid: bool,
        errors: Vec<String>,
    },
    RoundAdvanced {
        run_id: String,
        round: u32,
        reason: RegenerationKind,
    },
    BudgetExhausted {
        run_id: String,
        kind: RegenerationKind,
        attempts: u32,
    },
    RunFinished {
        run_id: String,
        rounds: u32,
    },
}

/// Cloneable sender side. Emitting with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressHandle {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events() {
        let handle = ProgressHandle::default();
        handle.emit(ProgressEvent::RunStarted { run_id: "lost".into() });

        let mut rx = handle.subscribe();
        handle.emit(ProgressEvent::RunFinished {
            run_id: "r".into(),
            rounds: 2,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::RunFinished {
                run_id: "r".into(),
                rounds: 2
            }
        );
    }

    #[test]
    fn test_event_tag() {
        let json = serde_json::to_value(ProgressEvent::RoundAdvanced {
            run_id: "r".into(),
            round: 2,
            reason: RegenerationKind::Syntax,
        })
        .unwrap();
        assert_eq!(json["event"], "round_advanced");
        assert_eq!(json["reason"], "syntax");
    }
}
