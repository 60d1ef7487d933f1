/*!
 * Vocabulary selection for study decks.
 *
 * Chapters are tokenized, scored against a per-language lexicon and the
 * book's chapter frequencies, and the best distinct lemmas are selected.
 */

pub use self::lexicon::{Lexicon, PartOfSpeech};
pub use self::ranking::{CorpusStats, RankedWord, RankingEngine};
pub use self::tokenize::{tokenize, Token, TokenizedChapter};

pub mod lexicon;
pub mod ranking;
pub mod stopwords;
pub mod tokenize;
