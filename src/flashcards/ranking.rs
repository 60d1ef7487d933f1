use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::lexicon::{Lexicon, PartOfSpeech};
use super::stopwords;
use super::tokenize::TokenizedChapter;

/// Weight of the rarity term
const RARITY_WEIGHT: f64 = 0.7;
/// Weight of the tf-icf term
const TF_ICF_WEIGHT: f64 = 0.3;

/// Chapter frequencies of every lemma across a book
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    chapter_count: usize,
    chapter_frequency: HashMap<String, usize>,
}

impl CorpusStats {
    /// Count, for each lemma, how many chapters contain it
    pub fn from_chapters(chapters: &[TokenizedChapter]) -> Self {
        let mut chapter_frequency: HashMap<String, usize> = HashMap::new();
        for chapter in chapters {
            let lemmas: HashSet<&str> = chapter.tokens.iter().map(|t| t.lemma.as_str()).collect();
            for lemma in lemmas {
                *chapter_frequency.entry(lemma.to_string()).or_default() += 1;
            }
        }
        Self {
            chapter_count: chapters.len(),
            chapter_frequency,
        }
    }

    /// Number of chapters
    pub fn chapter_count(&self) -> usize {
        self.chapter_count
    }

    /// Smoothed inverse chapter frequency: `ln((1 + N) / (1 + cf)) + 1`
    pub fn icf(&self, lemma: &str) -> f64 {
        let cf = self.chapter_frequency.get(lemma).copied().unwrap_or(0);
        ((1.0 + self.chapter_count as f64) / (1.0 + cf as f64)).ln() + 1.0
    }
}

/// A scored lemma of one chapter
#[derive(Debug, Clone, PartialEq)]
pub struct RankedWord {
    pub lemma: String,
    pub pos: PartOfSpeech,
    pub score: f64,
    /// Position of the first occurrence in the chapter
    pub first_position: usize,
    /// Occurrences in the chapter
    pub count: usize,
}

#[derive(Debug, Default)]
struct LemmaStats {
    count: usize,
    first_position: usize,
    seen_lowercase: bool,
    capitalized_mid_sentence: bool,
    numeral: bool,
}

/// Scores chapter vocabulary for study value
#[derive(Debug, Clone)]
pub struct RankingEngine {
    lexicon: Arc<Lexicon>,
    stopwords: Option<&'static HashSet<&'static str>>,
    pos_boost: f64,
}

impl RankingEngine {
    /// Engine for one target language
    pub fn new(lexicon: Arc<Lexicon>, language: &str, pos_boost: f64) -> Self {
        Self {
            lexicon,
            stopwords: stopwords::stopwords(language),
            pos_boost,
        }
    }

    fn is_stopword(&self, lemma: &str) -> bool {
        self.stopwords.is_some_and(|set| set.contains(lemma))
    }

    /// Proper nouns are tagged in the lexicon, or are unknown words that are
    /// never written lowercase and are capitalized mid-sentence at least once.
    fn is_proper_noun(&self, lemma: &str, stats: &LemmaStats) -> bool {
        match self.lexicon.lookup(lemma) {
            Some(entry) => entry.pos == PartOfSpeech::Propn,
            None => !stats.seen_lowercase && stats.capitalized_mid_sentence,
        }
    }

    /// Score every eligible lemma of a chapter, best first.
    ///
    /// Equal scores are ordered by first occurrence in the chapter.
    pub fn rank(&self, chapter: &TokenizedChapter, corpus: &CorpusStats) -> Vec<RankedWord> {
        let mut stats: HashMap<&str, LemmaStats> = HashMap::new();
        for token in &chapter.tokens {
            let entry = stats.entry(token.lemma.as_str()).or_insert_with(|| LemmaStats {
                first_position: token.position,
                numeral: token.is_numeral(),
                ..LemmaStats::default()
            });
            entry.count += 1;
            if token.is_capitalized() {
                if !token.sentence_start {
                    entry.capitalized_mid_sentence = true;
                }
            } else {
                entry.seen_lowercase = true;
            }
        }

        let candidates: Vec<(&str, &LemmaStats)> = stats
            .iter()
            .filter(|(lemma, s)| !s.numeral && !self.is_stopword(lemma) && !self.is_proper_noun(lemma, s))
            .map(|(lemma, s)| (*lemma, s))
            .collect();

        let max_count = candidates.iter().map(|(_, s)| s.count).max().unwrap_or(1) as f64;
        let max_rarity = self.lexicon.max_rarity();

        let mut ranked: Vec<RankedWord> = candidates
            .into_iter()
            .map(|(lemma, s)| {
                let pos = self.lexicon.pos(lemma);
                let tf = s.count as f64 / max_count;
                let mut score = RARITY_WEIGHT * (max_rarity - self.lexicon.rarity(lemma))
                    + TF_ICF_WEIGHT * tf * corpus.icf(lemma);
                if pos.is_boosted() {
                    score += self.pos_boost;
                }
                RankedWord {
                    lemma: lemma.to_string(),
                    pos,
                    score,
                    first_position: s.first_position,
                    count: s.count,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.first_position.cmp(&b.first_position))
        });

        debug!(
            "Ranked {} of {} lemmas ({} tokens)",
            ranked.len(),
            stats.len(),
            chapter.tokens.len()
        );
        ranked
    }

    /// Top `n` distinct lemmas, in rank order
    pub fn select(ranked: &[RankedWord], n: usize) -> Vec<RankedWord> {
        let mut seen = HashSet::new();
        ranked
            .iter()
            .filter(|word| seen.insert(word.lemma.as_str()))
            .take(n)
            .cloned()
            .collect()
    }
}
