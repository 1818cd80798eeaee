//! # Block-stream UI contract
//!
//! The agent never draws. It appends typed blocks to a [`Document`] and
//! mutates them through the document; renderers subscribe and receive a
//! callback for every addition or mutation, in mutation order. Blocks are
//! addressed by id, so nothing holds an owning reference back to the
//! document.

pub mod terminal;

pub use terminal::TerminalRenderer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

pub type BlockId = u64;
pub type SubscriptionId = u64;

/// Foreground hint for agent text; renderers may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
}

/// One labelled choice in an [`BlockPayload::InputOption`] block.
#[derive(Debug, Clone, PartialEq)]
pub struct InputOptionChoice {
    pub key: String,
    pub message: String,
    pub aliases: Vec<String>,
}

/// The typed content of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    AgentText {
        text: String,
        /// True while more text is still coming for this block.
        streaming: bool,
        markdown: bool,
        color: Option<Color>,
    },
    FunctionCallRequest {
        description: String,
        /// Attached once the call has executed.
        result: Option<Value>,
    },
    Error {
        text: String,
    },
    InputText {
        prompt: String,
        value: Option<String>,
    },
    InputOption {
        prompt: String,
        options: Vec<InputOptionChoice>,
        selection: Option<String>,
    },
}

impl BlockPayload {
    pub fn agent_text(text: impl Into<String>) -> Self {
        BlockPayload::AgentText {
            text: text.into(),
            streaming: false,
            markdown: true,
            color: None,
        }
    }

    pub fn streaming_text() -> Self {
        BlockPayload::AgentText {
            text: String::new(),
            streaming: true,
            markdown: true,
            color: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        BlockPayload::Error { text: text.into() }
    }

    pub fn function_call(description: impl Into<String>) -> Self {
        BlockPayload::FunctionCallRequest {
            description: description.into(),
            result: None,
        }
    }
}

type SubscriberFn = dyn Fn(BlockId, &BlockPayload) + Send + Sync;

#[derive(Default)]
struct DocumentState {
    order: Vec<BlockId>,
    blocks: HashMap<BlockId, BlockPayload>,
    subscribers: Vec<(SubscriptionId, Arc<SubscriberFn>)>,
    next_block_id: BlockId,
    next_subscription_id: SubscriptionId,
}

/// Ordered collection of typed blocks with change notification.
#[derive(Default)]
pub struct Document {
    state: Mutex<DocumentState>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block; subscribers observe the addition.
    pub fn add_block(&self, payload: BlockPayload) -> BlockId {
        let (id, payload, subscribers) = {
            let mut state = self.state.lock().expect("document poisoned");
            state.next_block_id += 1;
            let id = state.next_block_id;
            state.order.push(id);
            state.blocks.insert(id, payload.clone());
            (id, payload, state.subscribers.clone())
        };
        notify(&subscribers, id, &payload);
        id
    }

    /// Register a change callback. Delivery order matches mutation order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(BlockId, &BlockPayload) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().expect("document poisoned");
        state.next_subscription_id += 1;
        let id = state.next_subscription_id;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock().expect("document poisoned");
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Snapshot of all blocks in append order.
    pub fn blocks(&self) -> Vec<(BlockId, BlockPayload)> {
        let state = self.state.lock().expect("document poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.blocks.get(id).map(|p| (*id, p.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("document poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append text to an AgentText block.
    pub fn append_text(&self, id: BlockId, text: &str) {
        self.mutate(id, |payload| {
            if let BlockPayload::AgentText { text: existing, .. } = payload {
                existing.push_str(text);
                true
            } else {
                false
            }
        });
    }

    /// Flip the streaming flag on an AgentText block.
    pub fn set_streaming(&self, id: BlockId, streaming: bool) {
        self.mutate(id, |payload| {
            if let BlockPayload::AgentText { streaming: flag, .. } = payload {
                *flag = streaming;
                true
            } else {
                false
            }
        });
    }

    /// Attach a result to a FunctionCallRequest block.
    pub fn set_result(&self, id: BlockId, result: Value) {
        self.mutate(id, |payload| {
            if let BlockPayload::FunctionCallRequest { result: slot, .. } = payload {
                *slot = Some(result.clone());
                true
            } else {
                false
            }
        });
    }

    /// Record the user's answer on an InputText block.
    pub fn set_input_value(&self, id: BlockId, value: impl Into<String>) {
        let value = value.into();
        self.mutate(id, move |payload| {
            if let BlockPayload::InputText { value: slot, .. } = payload {
                *slot = Some(value.clone());
                true
            } else {
                false
            }
        });
    }

    /// Record the user's selection on an InputOption block.
    pub fn set_selection(&self, id: BlockId, key: impl Into<String>) {
        let key = key.into();
        self.mutate(id, move |payload| {
            if let BlockPayload::InputOption { selection, .. } = payload {
                *selection = Some(key.clone());
                true
            } else {
                false
            }
        });
    }

    fn mutate<F>(&self, id: BlockId, apply: F)
    where
        F: Fn(&mut BlockPayload) -> bool,
    {
        let notification = {
            let mut state = self.state.lock().expect("document poisoned");
            let Some(payload) = state.blocks.get_mut(&id) else {
                return;
            };
            if !apply(payload) {
                return;
            }
            let snapshot = payload.clone();
            Some((snapshot, state.subscribers.clone()))
        };
        if let Some((payload, subscribers)) = notification {
            notify(&subscribers, id, &payload);
        }
    }
}

fn notify(subscribers: &[(SubscriptionId, Arc<SubscriberFn>)], id: BlockId, payload: &BlockPayload) {
    for (_, subscriber) in subscribers {
        subscriber(id, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additions_and_mutations_notify_in_order() {
        let doc = Document::new();
        let events: Arc<Mutex<Vec<(BlockId, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        doc.subscribe(move |id, payload| {
            let label = match payload {
                BlockPayload::AgentText { text, .. } => format!("text:{text}"),
                BlockPayload::Error { text } => format!("error:{text}"),
                _ => "other".to_string(),
            };
            sink.lock().unwrap().push((id, label));
        });

        let a = doc.add_block(BlockPayload::streaming_text());
        doc.append_text(a, "hel");
        doc.append_text(a, "lo");
        doc.set_streaming(a, false);
        let b = doc.add_block(BlockPayload::error("boom"));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].0, a);
        assert_eq!(events[1].1, "text:hel");
        assert_eq!(events[2].1, "text:hello");
        assert_eq!(events[4], (b, "error:boom".to_string()));
    }

    #[test]
    fn blocks_snapshot_preserves_append_order() {
        let doc = Document::new();
        let a = doc.add_block(BlockPayload::agent_text("one"));
        let b = doc.add_block(BlockPayload::function_call("kubectl get pods"));
        doc.set_result(b, serde_json::json!({"exit_code": 0}));

        let blocks = doc.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, a);
        match &blocks[1].1 {
            BlockPayload::FunctionCallRequest { result, .. } => {
                assert!(result.is_some());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let doc = Document::new();
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let sub = doc.subscribe(move |_, _| {
            *sink.lock().unwrap() += 1;
        });
        doc.add_block(BlockPayload::agent_text("x"));
        doc.unsubscribe(sub);
        doc.add_block(BlockPayload::agent_text("y"));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn mutating_a_missing_block_is_a_no_op() {
        let doc = Document::new();
        doc.append_text(42, "nothing");
        assert!(doc.is_empty());
    }
}
