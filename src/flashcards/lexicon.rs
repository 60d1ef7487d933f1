use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;

use crate::language_utils;

/// Universal part-of-speech tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adj,
    Adv,
    Propn,
    Pron,
    Det,
    Adp,
    Num,
    Conj,
    /// Unknown or other
    X,
}

impl PartOfSpeech {
    /// Parse a tag, falling back to `X` for anything unrecognized
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_uppercase().as_str() {
            "NOUN" => Self::Noun,
            "VERB" | "AUX" => Self::Verb,
            "ADJ" => Self::Adj,
            "ADV" => Self::Adv,
            "PROPN" => Self::Propn,
            "PRON" => Self::Pron,
            "DET" => Self::Det,
            "ADP" => Self::Adp,
            "NUM" => Self::Num,
            "CONJ" | "CCONJ" | "SCONJ" => Self::Conj,
            _ => Self::X,
        }
    }

    /// Tag text
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Noun => "NOUN",
            Self::Verb => "VERB",
            Self::Adj => "ADJ",
            Self::Adv => "ADV",
            Self::Propn => "PROPN",
            Self::Pron => "PRON",
            Self::Det => "DET",
            Self::Adp => "ADP",
            Self::Num => "NUM",
            Self::Conj => "CONJ",
            Self::X => "X",
        }
    }

    /// Nouns, verbs and adjectives receive the ranking boost
    pub fn is_boosted(&self) -> bool {
        matches!(self, Self::Noun | Self::Verb | Self::Adj)
    }
}

impl fmt::Display for PartOfSpeech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// Lexicon row
#[derive(Debug, Clone, PartialEq)]
pub struct LexiconEntry {
    /// Part-of-speech tag
    pub pos: PartOfSpeech,
    /// Third TSV column: a Zipf-like frequency value, higher for more
    /// common lemmas. Ranking scores a lemma by its distance below the
    /// lexicon's maximum.
    pub rarity: f64,
}

/// Per-language lemma table with part of speech and rarity.
///
/// Files are `<code>.tsv` with rows `lemma<TAB>pos<TAB>value`, where value
/// is a frequency measure on a Zipf-like scale (higher means more common).
/// Lemmas missing from the table are scored as if they had the maximum
/// value, so they contribute no rarity term.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexicon {
    entries: HashMap<String, LexiconEntry>,
    max_rarity: f64,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::empty()
    }
}

impl Lexicon {
    /// Lexicon with no entries; every word is unknown
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            max_rarity: 1.0,
        }
    }

    /// Parse `lemma<TAB>pos<TAB>rarity` lines. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = HashMap::new();
        let mut max_rarity: Option<f64> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read lexicon line {}", index + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 3 {
                return Err(anyhow!("Lexicon line {}: expected 3 tab-separated fields", index + 1));
            }
            let rarity: f64 = fields[2]
                .trim()
                .parse()
                .with_context(|| format!("Lexicon line {}: invalid rarity '{}'", index + 1, fields[2]))?;

            max_rarity = Some(max_rarity.map_or(rarity, |m: f64| m.max(rarity)));
            entries.insert(
                fields[0].trim().to_lowercase(),
                LexiconEntry {
                    pos: PartOfSpeech::from_tag(fields[1]),
                    rarity,
                },
            );
        }

        Ok(Self {
            entries,
            max_rarity: max_rarity.unwrap_or(1.0),
        })
    }

    /// Load a lexicon file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open lexicon: {}", path.display()))?;
        let lexicon = Self::parse(std::io::BufReader::new(file))?;
        info!("Loaded lexicon {} ({} entries)", path.display(), lexicon.len());
        Ok(lexicon)
    }

    /// Load `<dir>/<lang>.tsv`, or an empty lexicon when there is none
    pub fn for_language(dir: Option<&Path>, language: &str) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::empty());
        };
        let code = language_utils::normalize_to_part1_or_part2t(language)?;
        let path = dir.join(format!("{}.tsv", code));
        if !path.exists() {
            debug!("No lexicon at {}, ranking without rarity data", path.display());
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the lexicon has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest listed rarity; 1.0 for an empty lexicon
    pub fn max_rarity(&self) -> f64 {
        self.max_rarity
    }

    /// Entry for a lemma
    pub fn lookup(&self, lemma: &str) -> Option<&LexiconEntry> {
        self.entries.get(lemma)
    }

    /// Frequency value of a lemma; unknown lemmas get the maximum
    pub fn rarity(&self, lemma: &str) -> f64 {
        self.lookup(lemma).map_or(self.max_rarity, |e| e.rarity)
    }

    /// Part of speech of a lemma; unknown lemmas are `X`
    pub fn pos(&self, lemma: &str) -> PartOfSpeech {
        self.lookup(lemma).map_or(PartOfSpeech::X, |e| e.pos)
    }
}
