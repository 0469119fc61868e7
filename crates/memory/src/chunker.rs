//! Text chunking for indexing.
//!
//! Paragraph-first: blank-line-delimited paragraphs are packed into a buffer
//! until the next one would overflow `max_size`, and each emitted chunk seeds
//! the next with its trailing `overlap` characters, so a paragraph chunk holds
//! at most `overlap + 2 + max_size` characters. Paragraphs longer than
//! `max_size` are cut into sliding windows instead. All sizes and offsets
//! count characters, not bytes.

use storyloom_core::ChunkKind;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const SEPARATOR_LEN: usize = 2;

/// A fragment produced by [`Chunker::chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    /// Character offset of the first character in the source text.
    pub start: usize,
    /// Character offset one past the last character in the source text.
    pub end: usize,
    pub kind: ChunkKind,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Deterministic splitter for turn content.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
    min_size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200, 100)
    }
}

// ── Paragraph buffer ────────────────────────────────────────────────────────

/// Where a run of buffer text came from. `at` counts characters into the
/// buffer, `source` into the original text.
#[derive(Debug, Clone, Copy)]
struct Span {
    at: usize,
    source: usize,
    len: usize,
}

#[derive(Default)]
struct Buffer {
    text: String,
    len: usize,
    start: usize,
    end: usize,
    spans: Vec<Span>,
}

impl Buffer {
    fn paragraph(para: &str, para_len: usize, start: usize, end: usize) -> Self {
        Self {
            text: para.to_string(),
            len: para_len,
            start,
            end,
            spans: vec![Span {
                at: 0,
                source: start,
                len: para_len,
            }],
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push_paragraph(&mut self, para: &str, para_len: usize, start: usize, end: usize) {
        self.text.push_str(PARAGRAPH_SEPARATOR);
        self.text.push_str(para);
        self.spans.push(Span {
            at: self.len + SEPARATOR_LEN,
            source: start,
            len: para_len,
        });
        self.len += SEPARATOR_LEN + para_len;
        self.end = end;
    }

    /// A buffer holding the trailing `overlap` characters, leading whitespace
    /// trimmed. Its start is mapped back through the spans, so it stays exact
    /// when the seed crosses a paragraph join.
    fn seed(&self, overlap: usize) -> Option<Buffer> {
        let seed = tail_chars(&self.text, overlap).trim_start();
        let seed_len = seed.chars().count();
        if seed_len == 0 {
            return None;
        }

        let cut = self.len - seed_len;
        let spans: Vec<Span> = self
            .spans
            .iter()
            .filter(|span| span.at + span.len > cut)
            .map(|span| match cut.checked_sub(span.at) {
                Some(skip) => Span {
                    at: 0,
                    source: span.source + skip,
                    len: span.len - skip,
                },
                None => Span {
                    at: span.at - cut,
                    ..*span
                },
            })
            .collect();

        Some(Buffer {
            text: seed.to_string(),
            len: seed_len,
            start: spans
                .first()
                .map_or(self.end.saturating_sub(seed_len), |span| span.source),
            end: self.end,
            spans,
        })
    }

    fn take(&mut self) -> Buffer {
        std::mem::take(self)
    }
}

// ── Chunker ─────────────────────────────────────────────────────────────────

impl Chunker {
    pub fn new(max_size: usize, overlap: usize, min_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            overlap,
            min_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Split `text` into chunks. Empty for blank input.
    ///
    /// Falls back to fixed-size windows over the whole text when the
    /// paragraph pass keeps nothing.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chunks = self.chunk_by_paragraphs(text);
        if !chunks.is_empty() {
            return chunks;
        }
        self.chunk_by_fixed_size(text, 0)
    }

    fn chunk_by_paragraphs(&self, text: &str) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut buffer = Buffer::default();
        let mut offset = 0usize;

        for segment in text.split(PARAGRAPH_SEPARATOR) {
            let segment_len = segment.chars().count();
            let leading = segment.chars().take_while(|c| c.is_whitespace()).count();
            let para = segment.trim();
            let para_len = para.chars().count();
            let para_start = offset + leading;
            let para_end = para_start + para_len;
            offset += segment_len + SEPARATOR_LEN;

            if para.is_empty() {
                continue;
            }

            if para_len > self.max_size {
                self.emit(&mut chunks, buffer.take());
                chunks.extend(self.chunk_by_fixed_size(para, para_start));
                continue;
            }

            if buffer.is_empty() {
                buffer = Buffer::paragraph(para, para_len, para_start, para_end);
                continue;
            }

            if buffer.len + SEPARATOR_LEN + para_len <= self.max_size {
                buffer.push_paragraph(para, para_len, para_start, para_end);
                continue;
            }

            // Overflow: emit, then start the next buffer from the tail of the
            // emitted chunk. A seeded chunk may reach `max_size + overlap`.
            let emitted = buffer.take();
            buffer = match emitted.seed(self.overlap) {
                Some(mut seeded) => {
                    seeded.push_paragraph(para, para_len, para_start, para_end);
                    seeded
                }
                None => Buffer::paragraph(para, para_len, para_start, para_end),
            };
            self.emit(&mut chunks, emitted);
        }

        self.emit(&mut chunks, buffer);
        chunks
    }

    /// Sliding windows of `max_size` characters advancing by
    /// `max_size - overlap` (at least 1), stopping at the window that
    /// reaches the end of the text.
    fn chunk_by_fixed_size(&self, text: &str, base: usize) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.max_size.saturating_sub(self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut pos = 0usize;

        while pos < chars.len() {
            let end = (pos + self.max_size).min(chars.len());
            if end - pos >= self.min_size {
                chunks.push(TextChunk {
                    content: chars[pos..end].iter().collect(),
                    start: base + pos,
                    end: base + end,
                    kind: ChunkKind::FixedSize,
                });
            }
            if end == chars.len() {
                break;
            }
            pos += step;
        }

        chunks
    }

    fn emit(&self, chunks: &mut Vec<TextChunk>, buffer: Buffer) {
        if buffer.is_empty() || buffer.len < self.min_size {
            return;
        }
        chunks.push(TextChunk {
            content: buffer.text,
            start: buffer.start,
            end: buffer.end,
            kind: ChunkKind::Paragraph,
        });
    }
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
