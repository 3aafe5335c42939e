//! Corpus module - Quran verse corpus loading
//!
//! Parses the chapter-keyed Quran JSON produced by the upstream data export
//! into an ordered, validated in-memory corpus. The format is external and
//! must be parsed defensively: `sura`/`aya` arrive as strings or numbers,
//! `footnotes` may be missing or null, and a chapter's `result` may not be
//! an array at all.

mod chunker;

pub use chunker::{ChunkConfig, VerseChunk, VerseChunker, CHUNK_SEPARATOR};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Highest chapter number in the Quran.
pub const CHAPTER_MAX: u32 = 114;

// ============================================================================
// Errors
// ============================================================================

/// Corpus loading failures. All of these are fatal for an ingestion run.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read corpus file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse corpus JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("corpus contains no verses")]
    Empty,
}

// ============================================================================
// Types
// ============================================================================

/// One Quran verse with its Somali translation.
///
/// `(chapter, verse)` uniquely identifies a verse; chapter is 1-114.
#[derive(Debug, Clone, PartialEq)]
pub struct VerseRecord {
    pub chapter: u32,
    /// 1-based verse number within the chapter.
    pub verse: u32,
    pub arabic_text: String,
    /// Somali translation.
    pub translation: String,
    /// Empty string when the source carries no footnotes.
    pub footnotes: String,
    /// Row id from the source export, when present.
    pub source_id: Option<i64>,
}

/// Full verse corpus, grouped by chapter in ascending order.
#[derive(Debug, Clone, Default)]
pub struct QuranCorpus {
    chapters: BTreeMap<u32, Vec<VerseRecord>>,
}

// ============================================================================
// Raw JSON shapes
// ============================================================================

/// `sura`/`aya`/`id` fields arrive as either JSON strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    fn as_i64(&self) -> Option<i64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerse {
    #[serde(default)]
    id: Option<NumberOrString>,
    sura: NumberOrString,
    aya: NumberOrString,
    #[serde(default)]
    arabic_text: String,
    #[serde(default)]
    translation: String,
    #[serde(default)]
    footnotes: Option<String>,
}

// ============================================================================
// QuranCorpus
// ============================================================================

impl QuranCorpus {
    /// Load the corpus from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        if !path.exists() {
            return Err(CorpusError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content)
    }

    /// Parse the corpus from a JSON string.
    ///
    /// Top level: object keyed by chapter number (as string), each value
    /// holding a `result` array of verse objects.
    pub fn from_json(json: &str) -> Result<Self, CorpusError> {
        let root: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;

        let mut chapters: BTreeMap<u32, Vec<VerseRecord>> = BTreeMap::new();

        for (chapter_key, chapter_value) in root {
            let result = match chapter_value.get("result") {
                Some(serde_json::Value::Array(items)) => items.clone(),
                _ => {
                    tracing::warn!("Chapter {} has no result array, skipping", chapter_key);
                    continue;
                }
            };

            for item in result {
                let raw: RawVerse = match serde_json::from_value(item) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("Skipping malformed verse in chapter {}: {}", chapter_key, e);
                        continue;
                    }
                };

                let chapter = match raw.sura.as_i64() {
                    Some(n) if n >= 1 && n <= CHAPTER_MAX as i64 => n as u32,
                    other => {
                        tracing::warn!("Skipping verse with invalid sura {:?}", other);
                        continue;
                    }
                };

                let verse = match raw.aya.as_i64() {
                    Some(n) if n >= 1 => n as u32,
                    other => {
                        tracing::warn!("Skipping verse with invalid aya {:?} in chapter {}", other, chapter);
                        continue;
                    }
                };

                chapters.entry(chapter).or_default().push(VerseRecord {
                    chapter,
                    verse,
                    arabic_text: raw.arabic_text,
                    translation: raw.translation,
                    footnotes: raw.footnotes.unwrap_or_default(),
                    source_id: raw.id.and_then(|id| id.as_i64()),
                });
            }
        }

        // Order verses within each chapter and drop duplicate (chapter, verse) pairs.
        for (chapter, verses) in chapters.iter_mut() {
            verses.sort_by_key(|v| v.verse);
            let before = verses.len();
            verses.dedup_by_key(|v| v.verse);
            if verses.len() < before {
                tracing::warn!(
                    "Chapter {}: dropped {} duplicate verse(s)",
                    chapter,
                    before - verses.len()
                );
            }
        }

        chapters.retain(|_, verses| !verses.is_empty());

        if chapters.is_empty() {
            return Err(CorpusError::Empty);
        }

        Ok(Self { chapters })
    }

    /// Chapters in ascending order with their verse lists.
    pub fn chapters(&self) -> impl Iterator<Item = (u32, &[VerseRecord])> {
        self.chapters.iter().map(|(c, v)| (*c, v.as_slice()))
    }

    /// Number of chapters present.
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// Total number of verses.
    pub fn verse_count(&self) -> usize {
        self.chapters.values().map(|v| v.len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn from_chapters(chapters: BTreeMap<u32, Vec<VerseRecord>>) -> Self {
        Self { chapters }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "1": {
            "result": [
                {"id": 2, "sura": "1", "aya": "2", "arabic_text": "ar2", "translation": "so2"},
                {"id": 1, "sura": 1, "aya": 1, "arabic_text": "ar1", "translation": "so1", "footnotes": "note"}
            ]
        },
        "2": {
            "result": [
                {"id": 8, "sura": "2", "aya": "1", "arabic_text": "ar", "translation": "so", "footnotes": null}
            ]
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let corpus = QuranCorpus::from_json(SAMPLE).unwrap();
        assert_eq!(corpus.chapter_count(), 2);
        assert_eq!(corpus.verse_count(), 3);
    }

    #[test]
    fn test_verses_sorted_within_chapter() {
        let corpus = QuranCorpus::from_json(SAMPLE).unwrap();
        let (chapter, verses) = corpus.chapters().next().unwrap();
        assert_eq!(chapter, 1);
        assert_eq!(verses[0].verse, 1);
        assert_eq!(verses[1].verse, 2);
    }

    #[test]
    fn test_missing_footnotes_become_empty_string() {
        let corpus = QuranCorpus::from_json(SAMPLE).unwrap();
        let (_, verses) = corpus.chapters().nth(1).unwrap();
        assert_eq!(verses[0].footnotes, "");
    }

    #[test]
    fn test_string_and_number_sura_aya_both_accepted() {
        let corpus = QuranCorpus::from_json(SAMPLE).unwrap();
        let (_, verses) = corpus.chapters().next().unwrap();
        assert_eq!(verses[0].source_id, Some(1));
        assert_eq!(verses[1].source_id, Some(2));
    }

    #[test]
    fn test_non_array_result_skipped() {
        let json = r#"{
            "1": {"result": "not-an-array"},
            "2": {"result": [{"sura": 2, "aya": 1, "arabic_text": "a", "translation": "s"}]}
        }"#;
        let corpus = QuranCorpus::from_json(json).unwrap();
        assert_eq!(corpus.chapter_count(), 1);
    }

    #[test]
    fn test_out_of_range_chapter_skipped() {
        let json = r#"{
            "115": {"result": [{"sura": 115, "aya": 1, "arabic_text": "a", "translation": "s"}]},
            "1": {"result": [{"sura": 1, "aya": 1, "arabic_text": "a", "translation": "s"}]}
        }"#;
        let corpus = QuranCorpus::from_json(json).unwrap();
        assert_eq!(corpus.chapter_count(), 1);
        assert_eq!(corpus.chapters().next().unwrap().0, 1);
    }

    #[test]
    fn test_duplicate_verse_deduped() {
        let json = r#"{
            "1": {"result": [
                {"sura": 1, "aya": 1, "arabic_text": "first", "translation": "s"},
                {"sura": 1, "aya": 1, "arabic_text": "second", "translation": "s"}
            ]}
        }"#;
        let corpus = QuranCorpus::from_json(json).unwrap();
        assert_eq!(corpus.verse_count(), 1);
        let (_, verses) = corpus.chapters().next().unwrap();
        assert_eq!(verses[0].arabic_text, "first");
    }

    #[test]
    fn test_empty_corpus_is_error() {
        assert!(matches!(
            QuranCorpus::from_json("{}"),
            Err(CorpusError::Empty)
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = QuranCorpus::load(Path::new("/nonexistent/quran.json"));
        assert!(matches!(result, Err(CorpusError::NotFound(_))));
    }
}
