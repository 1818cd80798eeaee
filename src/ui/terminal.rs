//! Minimal terminal renderer for the block stream.
//!
//! Streamed AgentText deltas print incrementally; everything else prints
//! when the block settles. Richer renderers live outside the core and
//! consume the same subscription.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use super::{BlockId, BlockPayload, Document, SubscriptionId};

pub struct TerminalRenderer {
    subscription: SubscriptionId,
}

impl TerminalRenderer {
    /// Attach to a document; rendering happens from the subscription
    /// callback until `detach` is called.
    pub fn attach(document: &Document) -> Self {
        let printed: Arc<Mutex<HashMap<BlockId, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let subscription = document.subscribe(move |id, payload| {
            let mut printed = printed.lock().expect("render state poisoned");
            match payload {
                BlockPayload::AgentText { text, streaming, .. } => {
                    let already = printed.entry(id).or_insert(0);
                    if text.len() > *already {
                        print!("{}", &text[*already..]);
                        let _ = std::io::stdout().flush();
                        *already = text.len();
                    }
                    if !*streaming && *already > 0 {
                        println!();
                        // Terminal newline printed once; mark by length.
                        *already = text.len();
                    }
                }
                BlockPayload::FunctionCallRequest { description, result } => {
                    if result.is_none() {
                        println!("  Running: {description}");
                    }
                }
                BlockPayload::Error { text } => {
                    eprintln!("Error: {text}");
                }
                BlockPayload::InputText { prompt, value } => {
                    if value.is_none() {
                        print!("{prompt} ");
                        let _ = std::io::stdout().flush();
                    }
                }
                BlockPayload::InputOption { prompt, options, selection } => {
                    if selection.is_none() {
                        println!("{prompt}");
                        for (index, option) in options.iter().enumerate() {
                            println!("  {}. {}", index + 1, option.message);
                        }
                    }
                }
            }
        });
        Self { subscription }
    }

    pub fn detach(self, document: &Document) {
        document.unsubscribe(self.subscription);
    }
}
