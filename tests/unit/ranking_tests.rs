/*!
 * Tests for vocabulary ranking across chapters
 */

use std::io::Cursor;
use std::sync::Arc;

use bookling::flashcards::{tokenize, CorpusStats, Lexicon, PartOfSpeech, RankingEngine};

fn lexicon() -> Lexicon {
    let tsv = "\
# lemma\tpos\trarity
casa\tNOUN\t2.0
montaña\tNOUN\t7.5
caminar\tVERB\t4.0
lentamente\tADV\t6.0
madrid\tPROPN\t5.0
";
    Lexicon::parse(Cursor::new(tsv)).unwrap()
}

fn engine() -> RankingEngine {
    RankingEngine::new(Arc::new(lexicon()), "es", 0.5)
}

#[test]
fn test_rank_shouldWeightDistanceFromMaxRarity() {
    // casa: 0.7 * (7.5 - 2.0); montaña sits at max rarity and gets no rarity term
    let chapter = tokenize(&["La casa está junto a la montaña."]);
    let corpus = CorpusStats::from_chapters(std::slice::from_ref(&chapter));

    let ranked = engine().rank(&chapter, &corpus);
    let montana = ranked.iter().position(|w| w.lemma == "montaña").unwrap();
    let casa = ranked.iter().position(|w| w.lemma == "casa").unwrap();
    assert!(casa < montana);
    assert_eq!(ranked[montana].pos, PartOfSpeech::Noun);
    assert!((ranked[casa].score - ranked[montana].score - 0.7 * 5.5).abs() < 1e-9);
}

#[test]
fn test_rank_withLexiconProperNoun_shouldExcludeIt() {
    let chapter = tokenize(&["madrid es enorme y la montaña también."]);
    let corpus = CorpusStats::from_chapters(std::slice::from_ref(&chapter));

    let ranked = engine().rank(&chapter, &corpus);
    assert!(ranked.iter().all(|w| w.lemma != "madrid"));
}

#[test]
fn test_rank_withPosBoost_shouldLiftVerbsOverAdverbs() {
    // caminar: 0.7 * (7.5 - 4.0) + boost; lentamente: 0.7 * (7.5 - 6.0)
    let chapter = tokenize(&["Lentamente decidí caminar."]);
    let corpus = CorpusStats::from_chapters(std::slice::from_ref(&chapter));

    let ranked = engine().rank(&chapter, &corpus);
    let names: Vec<&str> = ranked.iter().map(|w| w.lemma.as_str()).collect();
    let caminar = names.iter().position(|l| *l == "caminar").unwrap();
    let lentamente = names.iter().position(|l| *l == "lentamente").unwrap();
    assert!(caminar < lentamente);
}

#[test]
fn test_rank_shouldBeDeterministic() {
    let chapter = tokenize(&["El río cruza el valle. El valle guarda el río y la piedra."]);
    let corpus = CorpusStats::from_chapters(std::slice::from_ref(&chapter));
    let engine = engine();

    let first = engine.rank(&chapter, &corpus);
    let second = engine.rank(&chapter, &corpus);
    assert_eq!(first, second);
}

#[test]
fn test_corpusStats_shouldDiscountWordsInEveryChapter() {
    let chapters = vec![
        tokenize(&["El faro ilumina el puerto."]),
        tokenize(&["El faro vigila la costa."]),
        tokenize(&["El faro duerme en la niebla."]),
    ];
    let corpus = CorpusStats::from_chapters(&chapters);

    assert_eq!(corpus.chapter_count(), 3);
    assert!(corpus.icf("faro") < corpus.icf("niebla"));
}

#[test]
fn test_select_shouldCapAtN() {
    let chapter = tokenize(&["Uno dos tres cuatro cinco seis siete ocho."]);
    let corpus = CorpusStats::from_chapters(std::slice::from_ref(&chapter));
    let ranked = RankingEngine::new(Arc::new(Lexicon::empty()), "es", 0.5).rank(&chapter, &corpus);

    let selected = RankingEngine::select(&ranked, 3);
    assert_eq!(selected.len(), 3);
    assert_eq!(selected[..], ranked[..3]);
}
