use std::{
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    marker::PhantomData,
    num::NonZeroU32,
};

use crate::{source::SourceFileId, span::Span};

/// ID of an element within a [`SourceArena<T>`].
pub struct SourceId<T> {
    index: NonZeroU32,
    _phantom_data: PhantomData<T>,
}

/// Arena which maps singular elements of source files onto their source file IDs.
///
/// Such elements include syntax tokens and preprocessing tree nodes. Once a file's
/// elements are in the arena they are never mutated or removed; this is what makes
/// sealed trees safe to share between threads.
#[derive(Debug, Clone)]
pub struct SourceArena<T> {
    source_file_id_mapping: Vec<(SourceId<T>, SourceFileId)>,
    elements: Vec<T>,
}

impl<T> SourceArena<T> {
    pub fn new() -> Self {
        Self {
            source_file_id_mapping: vec![],
            elements: vec![],
        }
    }

    fn current_element_id(&self) -> SourceId<T> {
        SourceId {
            // SAFETY: Always adds 1 to the u32, therefore it can never be zero.
            index: unsafe { NonZeroU32::new_unchecked(self.elements.len() as u32 + 1) },
            _phantom_data: PhantomData,
        }
    }

    pub fn build_source_file(&mut self, source_file_id: SourceFileId) -> SourceArenaBuilder<T> {
        let start = self.current_element_id();
        self.source_file_id_mapping.push((start, source_file_id));
        SourceArenaBuilder {
            source_arena: self,
            start,
        }
    }

    pub fn element(&self, id: SourceId<T>) -> &T {
        &self.elements[(u32::from(id.index) - 1) as usize]
    }

    pub fn source_file_id(&self, id: SourceId<T>) -> SourceFileId {
        match self
            .source_file_id_mapping
            .binary_search_by_key(&id, |&(element_id, _)| element_id)
        {
            Ok(i) => self.source_file_id_mapping[i].1,
            Err(i) => self.source_file_id_mapping[i - 1].1,
        }
    }
}

impl<T> Default for SourceArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SourceArenaBuilder<'a, T> {
    source_arena: &'a mut SourceArena<T>,
    start: SourceId<T>,
}

impl<'a, T> SourceArenaBuilder<'a, T> {
    pub fn push(&mut self, element: T) -> SourceId<T> {
        let id = self.source_arena.current_element_id();
        self.source_arena.elements.push(element);
        id
    }

    pub fn arena(&self) -> &SourceArena<T> {
        self.source_arena
    }

    pub fn finish(self) -> Span<T> {
        if self.start == self.source_arena.current_element_id() {
            return Span::Empty;
        }
        let end = SourceId {
            index: self
                .source_arena
                .current_element_id()
                .index
                .get()
                .checked_sub(1)
                .and_then(NonZeroU32::new)
                .unwrap_or(self.start.index),
            _phantom_data: PhantomData,
        };
        Span::Spanning {
            start: self.start,
            end,
        }
    }
}

impl<T> SourceId<T> {
    pub fn successor(self) -> Self {
        Self {
            index: self.index.saturating_add(1),
            _phantom_data: PhantomData,
        }
    }

    pub fn predecessor(self) -> Option<Self> {
        NonZeroU32::new(self.index.get() - 1).map(|index| Self {
            index,
            _phantom_data: PhantomData,
        })
    }

    pub fn successor_in(self, span: Span<T>) -> Option<Self> {
        match span {
            Span::Empty => None,
            Span::Spanning { end, .. } => (self < end).then_some(self.successor()),
        }
    }
}

impl<T> Debug for SourceId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.index, f)
    }
}

impl<T> Clone for SourceId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SourceId<T> {}

impl<T> PartialEq for SourceId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for SourceId<T> {}

impl<T> PartialOrd for SourceId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SourceId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for SourceId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceFile, SourceFileSet};

    #[test]
    fn ids_are_dense_and_ordered() {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new("test".into(), "".into()));
        let mut arena: SourceArena<u32> = SourceArena::new();
        let mut builder = arena.build_source_file(file);
        let first = builder.push(10);
        let second = builder.push(20);
        let span = builder.finish();

        assert_eq!(first.successor(), second);
        assert_eq!(second.predecessor(), Some(first));
        assert_eq!(span.start(), Some(first));
        assert_eq!(span.end(), Some(second));
        assert_eq!(*arena.element(first), 10);
        assert_eq!(*arena.element(second), 20);
        assert_eq!(arena.source_file_id(second), file);
    }

    #[test]
    fn an_empty_build_finishes_with_an_empty_span() {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new("test".into(), "".into()));
        let mut arena: SourceArena<u32> = SourceArena::new();
        let builder = arena.build_source_file(file);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn successor_in_stops_at_the_span_end() {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new("test".into(), "".into()));
        let mut arena: SourceArena<u32> = SourceArena::new();
        let mut builder = arena.build_source_file(file);
        let first = builder.push(10);
        let second = builder.push(20);
        let span = builder.finish();

        assert_eq!(first.successor_in(span), Some(second));
        assert_eq!(second.successor_in(span), None);
    }
}
