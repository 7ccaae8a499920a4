use std::collections::HashMap;

use obsidian_qbft_types::message::ConsensusPayload;
use obsidian_qbft_types::{Address, View};

/// Accumulates messages for one view, at most one per sender. Arrival
/// order is preserved: committed seals are assembled in the order their
/// COMMIT messages were received.
#[derive(Clone, Debug)]
pub struct MessageSet<T> {
    view: View,
    order: Vec<Address>,
    messages: HashMap<Address, T>,
}

impl<T: ConsensusPayload> MessageSet<T> {
    pub fn new(view: View) -> Self {
        Self {
            view,
            order: Vec::new(),
            messages: HashMap::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Inserts a message keyed by its recovered source. A repeat sender
    /// replaces its previous message rather than growing the set.
    pub fn add(&mut self, message: T) {
        let source = message.source();
        if self.messages.insert(source, message).is_none() {
            self.order.push(source);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<&T> {
        self.messages.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.messages.contains_key(address)
    }

    /// Messages in arrival order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|addr| self.messages.get(addr))
    }

    pub fn addresses(&self) -> &[Address] {
        &self.order
    }
}
