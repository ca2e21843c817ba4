use std::str::SplitInclusive;

/// A line of a document together with its byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine<'a> {
    pub offset: usize,
    /// The line including its terminator, if any
    pub text: &'a str,
}

impl<'a> SourceLine<'a> {
    /// The line without `\n`, `\r\n` or a lone trailing `\r`
    pub fn content(&self) -> &'a str {
        strip_line_ending(self.text)
    }

    pub fn terminator(&self) -> &'a str {
        &self.text[self.content().len()..]
    }
}

pub fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .or_else(|| line.strip_suffix('\r'))
        .unwrap_or(line)
}

/// Iterate the lines of `text`, keeping terminators attached.
///
/// A trailing newline does not start another line, and an empty text has no lines.
pub fn lines_iter(text: &str) -> LinesIter<'_> {
    LinesIter {
        inner: text.split_inclusive('\n'),
        offset: 0,
    }
}

pub struct LinesIter<'a> {
    inner: SplitInclusive<'a, char>,
    offset: usize,
}

impl<'a> Iterator for LinesIter<'a> {
    type Item = SourceLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.inner.next()?;
        let line = SourceLine {
            offset: self.offset,
            text,
        };
        self.offset += text.len();
        Some(line)
    }
}
