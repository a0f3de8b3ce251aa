use std::{fmt, ops::Range};

use codespan_reporting::files::Files;

/// A single translation unit buffer, with a precomputed line index.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(filename: String, source: String) -> Self {
        Self {
            filename,
            line_starts: codespan_reporting::files::line_starts(&source).collect(),
            source,
        }
    }

    fn line_start(&self, line_index: usize) -> Result<usize, codespan_reporting::files::Error> {
        use std::cmp::Ordering;

        match line_index.cmp(&self.line_starts.len()) {
            Ordering::Less => Ok(self
                .line_starts
                .get(line_index)
                .cloned()
                .expect("failed despite previous check")),
            Ordering::Equal => Ok(self.source.len()),
            Ordering::Greater => Err(codespan_reporting::files::Error::LineTooLarge {
                given: line_index,
                max: self.line_starts.len() - 1,
            }),
        }
    }

    fn line_index_at(&self, byte_index: usize) -> usize {
        self.line_starts
            .binary_search(&byte_index)
            .unwrap_or_else(|next_line| next_line - 1)
    }

    /// Translates an absolute byte offset into a 1-based line and column pair.
    ///
    /// Columns are counted in characters, not bytes, so diagnostics line up in
    /// editors even for non-ASCII source.
    pub fn line_and_column(&self, byte_index: usize) -> (u32, u32) {
        let byte_index = byte_index.min(self.source.len());
        let line_index = self.line_index_at(byte_index);
        let line_start = self.line_starts[line_index];
        let column = self.source[line_start..byte_index].chars().count();
        (line_index as u32 + 1, column as u32 + 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceFileSet {
    pub source_files: Vec<SourceFile>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceFileId(usize);

impl fmt::Debug for SourceFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceFileId({})", self.0)
    }
}

impl SourceFileSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, file: SourceFile) -> SourceFileId {
        let id = SourceFileId(self.source_files.len());
        self.source_files.push(file);
        id
    }

    pub fn get(&self, id: SourceFileId) -> &SourceFile {
        &self.source_files[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceFileId, &'_ SourceFile)> {
        self.source_files
            .iter()
            .enumerate()
            .map(|(index, file)| (SourceFileId(index), file))
    }
}

impl<'f> Files<'f> for SourceFileSet {
    type FileId = SourceFileId;
    type Name = &'f str;
    type Source = &'f str;

    fn name(&'f self, id: Self::FileId) -> Result<Self::Name, codespan_reporting::files::Error> {
        Ok(&self.source_files[id.0].filename)
    }

    fn source(
        &'f self,
        id: Self::FileId,
    ) -> Result<Self::Source, codespan_reporting::files::Error> {
        Ok(&self.source_files[id.0].source)
    }

    fn line_index(
        &'f self,
        id: Self::FileId,
        byte_index: usize,
    ) -> Result<usize, codespan_reporting::files::Error> {
        Ok(self.source_files[id.0].line_index_at(byte_index))
    }

    fn line_range(
        &'f self,
        id: Self::FileId,
        line_index: usize,
    ) -> Result<Range<usize>, codespan_reporting::files::Error> {
        let file = &self.source_files[id.0];
        let line_start = file.line_start(line_index)?;
        let next_line_start = file.line_start(line_index + 1)?;
        Ok(line_start..next_line_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_column_are_one_based() {
        let file = SourceFile::new("test.c".into(), "ab\ncde\n".into());
        assert_eq!(file.line_and_column(0), (1, 1));
        assert_eq!(file.line_and_column(1), (1, 2));
        assert_eq!(file.line_and_column(3), (2, 1));
        assert_eq!(file.line_and_column(5), (2, 3));
        // Offsets past the end clamp to the end of the buffer.
        assert_eq!(file.line_and_column(100), (3, 1));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let file = SourceFile::new("test.c".into(), "é_x".into());
        assert_eq!(file.line_and_column(3), (1, 3));
    }
}
