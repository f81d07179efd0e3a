//! Chunked item arena
//!
//! Items are appended into fixed-size chunks and addressed by
//! (chunk, slot) handles, so growing the set never moves an existing item
//! and never invalidates a handle. A hash index maps (object, key) to the
//! handle of the single item for that pair.

use rustc_hash::FxHashMap;
use stoa_core::{AbortReason, TxnResult};

use crate::item::{object_id, TransItem};
use crate::object::TObject;

/// Stable handle to an item within one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemIdx {
    chunk: u32,
    slot: u32,
}

impl ItemIdx {
    /// Chunk number
    pub fn chunk(self) -> usize {
        self.chunk as usize
    }

    /// Offset within the chunk
    pub fn slot(self) -> usize {
        self.slot as usize
    }
}

/// Insertion-ordered, append-only set of items
pub struct ItemSet<'a> {
    chunks: Vec<Vec<TransItem<'a>>>,
    index: FxHashMap<(usize, u64), ItemIdx>,
    chunk_size: usize,
    max_items: usize,
    len: usize,
}

impl<'a> ItemSet<'a> {
    /// Empty set
    pub fn new(chunk_size: usize, max_items: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunks: vec![Vec::with_capacity(chunk_size)],
            index: FxHashMap::default(),
            chunk_size,
            max_items,
            len: 0,
        }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handle of the existing item for (obj, key)
    pub fn find(&self, obj: &dyn TObject, key: u64) -> Option<ItemIdx> {
        self.index.get(&(object_id(obj), key)).copied()
    }

    /// Handle of the item for (obj, key), appending a fresh one if needed
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if a new item would exceed the configured maximum.
    pub fn find_or_insert(&mut self, obj: &'a dyn TObject, key: u64) -> TxnResult<ItemIdx> {
        if let Some(idx) = self.find(obj, key) {
            return Ok(idx);
        }
        if self.len >= self.max_items {
            return Err(AbortReason::CapacityExceeded.into());
        }
        let idx = self.push(TransItem::new(obj, key));
        self.index.insert((object_id(obj), key), idx);
        Ok(idx)
    }

    fn push(&mut self, item: TransItem<'a>) -> ItemIdx {
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |c| c.len() == self.chunk_size);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_size));
        }
        let chunk = self.chunks.len() - 1;
        let last = &mut self.chunks[chunk];
        last.push(item);
        self.len += 1;
        ItemIdx {
            chunk: chunk as u32,
            slot: (last.len() - 1) as u32,
        }
    }

    /// Item at `idx`
    pub fn get(&self, idx: ItemIdx) -> &TransItem<'a> {
        &self.chunks[idx.chunk()][idx.slot()]
    }

    /// Mutable item at `idx`
    pub fn get_mut(&mut self, idx: ItemIdx) -> &mut TransItem<'a> {
        &mut self.chunks[idx.chunk()][idx.slot()]
    }

    /// Handles in insertion order
    pub fn indices(&self) -> impl DoubleEndedIterator<Item = ItemIdx> + '_ {
        self.chunks.iter().enumerate().flat_map(|(c, chunk)| {
            (0..chunk.len()).map(move |s| ItemIdx {
                chunk: c as u32,
                slot: s as u32,
            })
        })
    }

    /// Items in insertion order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TransItem<'a>> {
        self.chunks.iter().flat_map(|c| c.iter())
    }

    /// Mutable items in insertion order
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut TransItem<'a>> {
        self.chunks.iter_mut().flat_map(|c| c.iter_mut())
    }
}
