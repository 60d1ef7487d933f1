use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::language_utils;

const EN: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "he", "her", "here", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its",
    "just", "me", "my", "no", "not", "now", "of", "on", "one", "only", "or", "our", "out", "over",
    "she", "so", "some", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "to", "up", "us", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "will", "with", "would", "you", "your",
];

const ES: &[&str] = &[
    "a", "al", "algo", "ante", "antes", "aquí", "así", "como", "con", "cuando", "de", "del",
    "desde", "donde", "durante", "e", "el", "él", "ella", "ellas", "ellos", "en", "entre", "era",
    "es", "esa", "ese", "eso", "esta", "está", "este", "esto", "fue", "ha", "hay", "la", "las",
    "le", "les", "lo", "los", "más", "me", "mi", "muy", "nada", "ni", "no", "nos", "o", "para",
    "pero", "por", "porque", "que", "qué", "se", "sea", "ser", "si", "sí", "sin", "sobre", "son",
    "su", "sus", "también", "te", "tiene", "todo", "tu", "tú", "un", "una", "uno", "y", "ya", "yo",
];

const FR: &[&str] = &[
    "à", "au", "aux", "avec", "ce", "ces", "cet", "cette", "dans", "de", "des", "du", "elle",
    "elles", "en", "est", "et", "eux", "il", "ils", "je", "la", "le", "les", "leur", "lui", "ma",
    "mais", "me", "même", "mes", "moi", "mon", "ne", "nous", "on", "ou", "où", "par", "pas",
    "pour", "qu", "que", "qui", "sa", "se", "ses", "son", "sont", "sur", "ta", "te", "tes", "toi",
    "ton", "tu", "un", "une", "vos", "votre", "vous", "y", "été", "être", "avoir", "a", "ai",
    "était", "c'est", "l", "d", "j", "n", "s",
];

const DE: &[&str] = &[
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "bin", "bis", "da", "das", "dass",
    "dem", "den", "der", "des", "die", "dies", "diese", "du", "durch", "ein", "eine", "einem",
    "einen", "einer", "er", "es", "für", "hat", "hatte", "ich", "ihr", "im", "in", "ist", "ja",
    "kein", "man", "mit", "nach", "nicht", "noch", "nur", "oder", "sein", "sich", "sie", "sind",
    "so", "über", "um", "und", "uns", "von", "vor", "war", "was", "wenn", "wie", "wir", "wird",
    "zu", "zum", "zur",
];

const IT: &[&str] = &[
    "a", "ai", "al", "alla", "anche", "che", "chi", "ci", "come", "con", "da", "dal", "dalla",
    "del", "della", "di", "e", "è", "ed", "era", "gli", "ha", "hanno", "i", "il", "in", "io",
    "la", "le", "lei", "lo", "loro", "lui", "ma", "mi", "ne", "nel", "nella", "non", "noi", "o",
    "per", "più", "quando", "quello", "questo", "se", "si", "sono", "su", "sua", "suo", "ti",
    "tra", "tu", "un", "una", "uno", "voi",
];

const PT: &[&str] = &[
    "a", "ao", "aos", "as", "à", "com", "como", "da", "das", "de", "do", "dos", "e", "é", "ela",
    "elas", "ele", "eles", "em", "era", "essa", "esse", "esta", "está", "este", "eu", "foi",
    "há", "isso", "isto", "já", "lhe", "mais", "mas", "me", "meu", "minha", "na", "não", "nas",
    "no", "nos", "o", "os", "ou", "para", "pela", "pelo", "por", "que", "se", "sem", "ser", "seu",
    "sua", "também", "te", "tem", "um", "uma", "você",
];

static STOPWORDS: Lazy<HashMap<&'static str, HashSet<&'static str>>> = Lazy::new(|| {
    [("en", EN), ("es", ES), ("fr", FR), ("de", DE), ("it", IT), ("pt", PT)]
        .into_iter()
        .map(|(lang, words)| (lang, words.iter().copied().collect()))
        .collect()
});

/// Built-in stopword set for a language, if one exists
pub fn stopwords(language: &str) -> Option<&'static HashSet<&'static str>> {
    let code = language_utils::normalize_to_part1_or_part2t(language).ok()?;
    STOPWORDS.get(code.as_str())
}

/// Whether `word` (already lowercased) is a stopword of `language`
pub fn is_stopword(language: &str, word: &str) -> bool {
    stopwords(language).is_some_and(|set| set.contains(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isStopword_shouldUseLanguageList() {
        assert!(is_stopword("es", "los"));
        assert!(is_stopword("spa", "los"));
        assert!(!is_stopword("es", "gato"));
        assert!(is_stopword("de", "und"));
    }

    #[test]
    fn test_stopwords_withUnsupportedLanguage_shouldBeNone() {
        assert!(stopwords("ja").is_none());
        assert!(!is_stopword("ja", "the"));
    }
}
