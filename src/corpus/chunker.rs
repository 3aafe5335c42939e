//! Verse chunking - retrieval-granularity grouping
//!
//! Groups consecutive verses of one chapter into fixed-size chunks. Chunking
//! is a pure function of the corpus: identical input produces byte-identical
//! chunk text and titles, so a re-ingestion rebuilds the exact same store.
//! A chunk never spans a chapter boundary.

use super::{QuranCorpus, VerseRecord};

/// Separator between verse blocks inside a chunk.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

// ============================================================================
// Chunk Configuration
// ============================================================================

/// Chunking settings.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Number of verses per chunk (the last chunk of a chapter may be shorter).
    pub verses_per_chunk: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { verses_per_chunk: 5 }
    }
}

impl ChunkConfig {
    /// Create a config, clamping a zero chunk size up to 1.
    pub fn new(verses_per_chunk: usize) -> Self {
        Self {
            verses_per_chunk: verses_per_chunk.max(1),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// One retrievable unit: consecutive verses of a single chapter merged into
/// a titled text blob.
#[derive(Debug, Clone, PartialEq)]
pub struct VerseChunk {
    pub title: String,
    pub text: String,
    pub labels: Vec<String>,
    pub chapter: u32,
    pub first_verse: u32,
    pub last_verse: u32,
}

// ============================================================================
// VerseChunker
// ============================================================================

/// Splits a corpus into [`VerseChunk`]s, chapter by chapter.
pub struct VerseChunker {
    config: ChunkConfig,
}

impl VerseChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// Lazily produce chunks in (chapter, verse) order.
    pub fn chunk<'a>(
        &'a self,
        corpus: &'a QuranCorpus,
    ) -> impl Iterator<Item = VerseChunk> + 'a {
        corpus.chapters().flat_map(move |(chapter, verses)| {
            verses
                .chunks(self.config.verses_per_chunk)
                .map(move |group| build_chunk(chapter, group))
        })
    }
}

/// Build one chunk from a non-empty verse group of a single chapter.
fn build_chunk(chapter: u32, group: &[VerseRecord]) -> VerseChunk {
    let first_verse = group.first().map(|v| v.verse).unwrap_or(0);
    let last_verse = group.last().map(|v| v.verse).unwrap_or(0);

    let text = group
        .iter()
        .map(format_verse)
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR);

    VerseChunk {
        title: format!(
            "Surah {}, Verses {}-{} (Somali)",
            chapter, first_verse, last_verse
        ),
        text,
        labels: vec![
            "tafsiir".to_string(),
            "quran".to_string(),
            format!("surah-{}", chapter),
        ],
        chapter,
        first_verse,
        last_verse,
    }
}

/// Format one verse block. Footnotes are always present, even when empty,
/// so chunk text stays stable across re-ingestion.
fn format_verse(verse: &VerseRecord) -> String {
    format!(
        "[Surah {}:{}]\nArabic: {}\nSomali: {}\nFootnotes: {}",
        verse.chapter, verse.verse, verse.arabic_text, verse.translation, verse.footnotes
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn verse(chapter: u32, verse: u32) -> VerseRecord {
        VerseRecord {
            chapter,
            verse,
            arabic_text: format!("arabic-{}-{}", chapter, verse),
            translation: format!("somali-{}-{}", chapter, verse),
            footnotes: String::new(),
            source_id: None,
        }
    }

    fn corpus_with(chapters: &[(u32, u32)]) -> QuranCorpus {
        let mut map: BTreeMap<u32, Vec<VerseRecord>> = BTreeMap::new();
        for &(chapter, count) in chapters {
            map.insert(chapter, (1..=count).map(|v| verse(chapter, v)).collect());
        }
        QuranCorpus::from_chapters(map)
    }

    #[test]
    fn test_ten_verses_chunk_size_five_gives_two_chunks() {
        let corpus = corpus_with(&[(2, 10)]);
        let chunker = VerseChunker::new(ChunkConfig::new(5));
        let chunks: Vec<_> = chunker.chunk(&corpus).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title, "Surah 2, Verses 1-5 (Somali)");
        assert_eq!(chunks[1].title, "Surah 2, Verses 6-10 (Somali)");
    }

    #[test]
    fn test_last_chunk_may_be_shorter() {
        let corpus = corpus_with(&[(1, 7)]);
        let chunker = VerseChunker::new(ChunkConfig::new(5));
        let chunks: Vec<_> = chunker.chunk(&corpus).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].first_verse, 6);
        assert_eq!(chunks[1].last_verse, 7);
    }

    #[test]
    fn test_chunks_never_span_chapters() {
        // 3 verses in chapter 1 and 3 in chapter 2 with chunk size 5:
        // flat slicing would mix chapters, per-chapter chunking must not.
        let corpus = corpus_with(&[(1, 3), (2, 3)]);
        let chunker = VerseChunker::new(ChunkConfig::new(5));
        let chunks: Vec<_> = chunker.chunk(&corpus).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chapter, 1);
        assert_eq!(chunks[1].chapter, 2);
    }

    #[test]
    fn test_verses_contiguous_and_increasing_within_chunk() {
        let corpus = corpus_with(&[(3, 12)]);
        let chunker = VerseChunker::with_defaults();

        for chunk in chunker.chunk(&corpus) {
            assert_eq!(
                chunk.last_verse - chunk.first_verse + 1,
                chunk.text.matches("[Surah 3:").count() as u32
            );
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let corpus = corpus_with(&[(1, 7), (2, 4)]);
        let chunker = VerseChunker::with_defaults();

        let first: Vec<_> = chunker.chunk(&corpus).collect();
        let second: Vec<_> = chunker.chunk(&corpus).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_verse_format_includes_empty_footnotes() {
        let text = format_verse(&verse(1, 1));
        assert!(text.starts_with("[Surah 1:1]\n"));
        assert!(text.ends_with("Footnotes: "));
    }

    #[test]
    fn test_labels() {
        let corpus = corpus_with(&[(114, 2)]);
        let chunker = VerseChunker::with_defaults();
        let chunk = chunker.chunk(&corpus).next().unwrap();

        assert_eq!(chunk.labels, vec!["tafsiir", "quran", "surah-114"]);
    }

    #[test]
    fn test_zero_chunk_size_clamped() {
        assert_eq!(ChunkConfig::new(0).verses_per_chunk, 1);
    }
}
