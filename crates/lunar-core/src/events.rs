//! Notifications from the engine to its controller.
//!
//! Every notification travels through one unbounded queue, so the controller
//! observes them one at a time and in the order they were emitted. The
//! worker never waits for the controller to consume anything.
//!
//! Each run sends through its own [`RunEvents`], which tags every message
//! with the run's `RunSlot`. A run the engine abandoned is marked on its
//! slot, and the receiver discards whatever that run queued or still
//! queues, so a leaked worker can never speak into a later run's stream.
//!
//! Line reports are coalesced: at most one undelivered report per run sits
//! in the queue. When the controller takes it, it reads whatever line is
//! current at that moment. A tight loop therefore costs one queue entry, not
//! one per executed line. The price is that a line report may overtake
//! output written after the line it was queued for: line and output events
//! are each in execution order, but not relative to each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The script ran to completion.
    Finished,
    /// The script failed to parse or raised an error; the message was
    /// written to the output.
    Failed,
    /// The script was stopped on request.
    Cancelled,
    /// The output channel could not be opened; the script never ran.
    ChannelFailure,
    /// The worker thread could not be spawned; the script never ran.
    SpawnFailure,
}

/// A notification delivered to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The worker began executing.
    Started,
    /// The worker finished. Nothing from this run follows.
    Stopped { outcome: RunOutcome },
    /// A contiguous run of decoded output.
    Output(String),
    /// Most recently executed source line.
    CurrentLine(u32),
}

#[derive(Debug)]
enum Message {
    Event(Arc<RunSlot>, EngineEvent),
    Line(Arc<RunSlot>),
}

/// Per-run state shared by a run's senders and the receiver.
#[derive(Debug, Default)]
struct RunSlot {
    line: AtomicU32,
    queued: AtomicBool,
    abandoned: AtomicBool,
}

impl RunSlot {
    fn take_line(&self) -> u32 {
        self.queued.store(false, Ordering::SeqCst);
        self.line.load(Ordering::SeqCst)
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Engine-side handle on the queue; opens one [`RunEvents`] per run.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl EventSender {
    pub(crate) fn for_run(&self) -> RunEvents {
        RunEvents {
            tx: self.tx.clone(),
            slot: Arc::default(),
        }
    }
}

/// Sending half of the queue for a single run.
#[derive(Debug, Clone)]
pub(crate) struct RunEvents {
    tx: mpsc::UnboundedSender<Message>,
    slot: Arc<RunSlot>,
}

impl RunEvents {
    pub(crate) fn send(&self, event: EngineEvent) {
        // The controller dropping its receiver is not an error for the worker.
        let _ = self.tx.send(Message::Event(Arc::clone(&self.slot), event));
    }

    /// Publish `line` as the current line of this run.
    pub(crate) fn line(&self, line: u32) {
        self.slot.line.store(line, Ordering::SeqCst);
        if !self.slot.queued.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Message::Line(Arc::clone(&self.slot)));
        }
    }

    /// Disown the run. Messages it queued and has not had delivered, and
    /// any it sends later, are dropped by the receiver.
    pub(crate) fn abandon(&self) {
        self.slot.abandoned.store(true, Ordering::SeqCst);
    }
}

/// Receiving half of the notification queue, owned by the controller.
#[derive(Debug)]
pub struct EngineEvents {
    rx: mpsc::UnboundedReceiver<Message>,
    last_line: Option<u32>,
}

pub(crate) fn channel() -> (EventSender, EngineEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        EngineEvents {
            rx,
            last_line: None,
        },
    )
}

impl EngineEvents {
    /// Wait for the next notification.
    ///
    /// Returns `None` once the engine and every worker are gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            let message = self.rx.recv().await?;
            if let Some(event) = self.resolve(message) {
                return Some(event);
            }
        }
    }

    /// Take the next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            let message = self.rx.try_recv().ok()?;
            if let Some(event) = self.resolve(message) {
                return Some(event);
            }
        }
    }

    fn resolve(&mut self, message: Message) -> Option<EngineEvent> {
        match message {
            Message::Event(slot, _) | Message::Line(slot) if slot.is_abandoned() => None,
            Message::Event(_, event) => {
                if matches!(event, EngineEvent::Started) {
                    self.last_line = None;
                }
                Some(event)
            }
            Message::Line(slot) => {
                let line = slot.take_line();
                if self.last_line == Some(line) {
                    return None;
                }
                self.last_line = Some(line);
                Some(EngineEvent::CurrentLine(line))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_keep_order() {
        let (tx, mut rx) = channel();
        let run = tx.for_run();
        run.send(EngineEvent::Started);
        run.send(EngineEvent::Output("a".to_string()));
        run.send(EngineEvent::Stopped {
            outcome: RunOutcome::Finished,
        });

        assert_eq!(rx.try_recv(), Some(EngineEvent::Started));
        assert_eq!(rx.try_recv(), Some(EngineEvent::Output("a".to_string())));
        assert_eq!(
            rx.try_recv(),
            Some(EngineEvent::Stopped {
                outcome: RunOutcome::Finished
            })
        );
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_line_reports_coalesce() {
        let (tx, mut rx) = channel();
        let run = tx.for_run();
        for line in 1..=1000 {
            run.line(line);
        }

        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(1000)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_line_requeued_after_take() {
        let (tx, mut rx) = channel();
        let run = tx.for_run();

        run.line(3);
        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(3)));

        run.line(4);
        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(4)));
    }

    #[test]
    fn test_coalesced_line_may_overtake_output() {
        let (tx, mut rx) = channel();
        let run = tx.for_run();

        run.line(1);
        run.send(EngineEvent::Output("x\n".to_string()));
        run.line(2);

        // The single queued report sits where line 1 was queued but reads line 2.
        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(2)));
        assert_eq!(rx.try_recv(), Some(EngineEvent::Output("x\n".to_string())));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_abandoned_run_is_silenced() {
        let (tx, mut rx) = channel();
        let old = tx.for_run();
        old.send(EngineEvent::Output("queued before".to_string()));
        old.line(7);
        old.abandon();

        let new = tx.for_run();
        new.send(EngineEvent::Started);
        old.send(EngineEvent::Stopped {
            outcome: RunOutcome::Failed,
        });
        old.line(8);
        new.line(1);

        assert_eq!(rx.try_recv(), Some(EngineEvent::Started));
        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(1)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_runs_coalesce_lines_separately() {
        let (tx, mut rx) = channel();
        let first = tx.for_run();
        let second = tx.for_run();

        first.line(5);
        second.line(9);

        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(5)));
        assert_eq!(rx.try_recv(), Some(EngineEvent::CurrentLine(9)));
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&EngineEvent::Stopped {
            outcome: RunOutcome::Cancelled,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"stopped","data":{"outcome":"cancelled"}}"#);
    }
}
