//! A batch: the maximal group of messages delivered to one entity in one
//! executor activation.

use crate::message::BatchItem;

#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: BatchItem) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl FromIterator<BatchItem> for Batch {
    fn from_iter<T: IntoIterator<Item = BatchItem>>(iter: T) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}
