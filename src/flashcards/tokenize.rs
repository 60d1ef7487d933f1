use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\p{N}+(?:[.,]\p{N}+)*|[\p{L}\p{N}][\p{L}\p{M}\p{N}'’\-]*").expect("Invalid word regex")
});

/// Sentence-ending punctuation
fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

/// One word occurrence in a chapter
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Text as written
    pub surface: String,
    /// Lowercased form used as the lemma
    pub lemma: String,
    /// Index of the token in the chapter
    pub position: usize,
    /// Index of the sentence holding the token
    pub sentence: usize,
    /// Whether the token opens its sentence
    pub sentence_start: bool,
}

impl Token {
    /// Digits with optional decimal or thousands separators
    pub fn is_numeral(&self) -> bool {
        self.surface.chars().any(|c| c.is_numeric())
            && self.surface.chars().all(|c| c.is_numeric() || c == '.' || c == ',')
    }

    /// First letter is uppercase
    pub fn is_capitalized(&self) -> bool {
        self.surface.chars().next().is_some_and(char::is_uppercase)
    }
}

/// Sentences and tokens of one chapter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenizedChapter {
    /// Sentences in reading order
    pub sentences: Vec<String>,
    /// Word tokens in reading order
    pub tokens: Vec<Token>,
}

impl TokenizedChapter {
    /// First sentence containing a token with this lemma
    pub fn first_sentence_with(&self, lemma: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.lemma == lemma)
            .and_then(|t| self.sentences.get(t.sentence))
            .map(String::as_str)
    }
}

/// Split text into trimmed sentences.
///
/// A sentence ends at a run of terminal punctuation followed by whitespace
/// or the end of the text, so "1.500" and "e.g" stay inside a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminal(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}

/// Words of a text, trailing apostrophes and hyphens removed
pub fn words(text: &str) -> Vec<&str> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['\'', '’', '-']))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Tokenize the paragraphs of a chapter.
///
/// Paragraph ends are sentence ends, so a heading-like paragraph without
/// punctuation does not swallow the next sentence.
pub fn tokenize<S: AsRef<str>>(paragraphs: &[S]) -> TokenizedChapter {
    let mut chapter = TokenizedChapter::default();

    for paragraph in paragraphs {
        for sentence in split_sentences(paragraph.as_ref()) {
            let sentence_index = chapter.sentences.len();
            for (i, word) in words(&sentence).into_iter().enumerate() {
                let position = chapter.tokens.len();
                chapter.tokens.push(Token {
                    surface: word.to_string(),
                    lemma: word.to_lowercase(),
                    position,
                    sentence: sentence_index,
                    sentence_start: i == 0,
                });
            }
            chapter.sentences.push(sentence);
        }
    }

    chapter
}
