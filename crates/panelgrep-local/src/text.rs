//! Free text to normalized keyword tokens: tokenize, drop stop words, stem.
//!
//! Deterministic for a fixed (language, stop-word set). Duplicate tokens are
//! preserved on purpose: the indexer reads multiplicity as frequency, so
//! callers that want a set must dedupe themselves.

use panelgrep_core::{Error, Result, TokenProcessor};
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::path::Path;

/// Surface-form stop words per language, filtered out before stemming.
///
/// Kept deliberately small: the goal is to drop tokens that match broadly in
/// most documents and harm ranking, not to reproduce a linguistics corpus.
/// An extra file can extend the set at construction time.
const EN_STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "come", "could", "day", "do", "does", "did", "for", "from", "get",
    "go", "had", "has", "have", "he", "her", "him", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "just", "know", "like", "make", "me", "my", "no", "not", "now", "of", "on",
    "one", "only", "or", "other", "our", "out", "over", "say", "she", "so", "some", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "up", "us",
    "was", "we", "were", "what", "when", "which", "who", "will", "with", "would", "you", "your",
];

const RU_STOP_WORDS: &[&str] = &[
    "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
    "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "ее", "мне", "было",
    "вот", "от", "о", "из", "ему", "или", "ни", "быть", "был", "него", "до", "вас", "нибудь",
];

const FR_STOP_WORDS: &[&str] = &[
    "au", "aux", "avec", "ce", "ces", "dans", "de", "des", "du", "elle", "en", "et", "eux", "il",
    "ils", "je", "la", "le", "les", "leur", "lui", "ma", "mais", "me", "même", "mes", "moi",
    "mon", "ne", "nos", "notre", "nous", "on", "ou", "par", "pas", "pour", "qu", "que", "qui",
    "sa", "se", "ses", "son", "sur", "ta", "te", "tes", "toi", "ton", "tu", "un", "une", "vos",
    "votre", "vous",
];

const ES_STOP_WORDS: &[&str] = &[
    "a", "al", "algo", "como", "con", "cuando", "de", "del", "donde", "el", "ella", "ellos",
    "en", "entre", "era", "es", "esa", "ese", "esta", "este", "esto", "fue", "ha", "hay", "la",
    "las", "le", "lo", "los", "me", "mi", "muy", "más", "ni", "no", "nos", "o", "para", "pero",
    "por", "que", "se", "sin", "sobre", "su", "sus", "te", "tiene", "un", "una", "uno", "y", "ya",
];

const SV_STOP_WORDS: &[&str] = &[
    "att", "av", "blev", "bli", "de", "dem", "den", "det", "dig", "din", "du", "där", "då",
    "efter", "ej", "en", "er", "ett", "för", "från", "ha", "han", "hans", "har", "hon", "i",
    "icke", "inte", "jag", "kan", "man", "med", "mig", "min", "mot", "nu", "när", "och", "om",
    "oss", "på", "sedan", "sig", "sin", "ska", "som", "så", "till", "upp", "ut", "vad", "var",
    "vi", "vid", "än", "är", "över",
];

fn language(code: &str) -> Option<(Algorithm, &'static [&'static str])> {
    match code {
        "en" => Some((Algorithm::English, EN_STOP_WORDS)),
        "ru" => Some((Algorithm::Russian, RU_STOP_WORDS)),
        "fr" => Some((Algorithm::French, FR_STOP_WORDS)),
        "es" => Some((Algorithm::Spanish, ES_STOP_WORDS)),
        "sv" => Some((Algorithm::Swedish, SV_STOP_WORDS)),
        _ => None,
    }
}

pub struct TextProcessor {
    stemmer: Stemmer,
    stop_words: HashSet<String>,
}

impl TextProcessor {
    /// Recognized language codes: `en`, `ru`, `fr`, `es`, `sv`. Anything else
    /// is `Error::UnsupportedLanguage`. The optional file holds extra stop
    /// words separated by whitespace; it is merged into the built-in set.
    pub fn new(lang: &str, extra_stop_words: Option<&Path>) -> Result<Self> {
        let (algorithm, builtin) =
            language(lang).ok_or_else(|| Error::UnsupportedLanguage(lang.to_string()))?;

        let mut stop_words: HashSet<String> = builtin.iter().map(|w| w.to_string()).collect();
        if let Some(path) = extra_stop_words {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::Parse(format!("stop-word file {}: {e}", path.display()))
            })?;
            stop_words.extend(raw.split_whitespace().map(|w| w.to_lowercase()));
        }

        Ok(Self {
            stemmer: Stemmer::create(algorithm),
            stop_words,
        })
    }

    /// Splits on whitespace and punctuation, except that an apostrophe binds
    /// to its word: the token is truncated at the first apostrophe and the
    /// remainder is dropped ("don't" -> "don").
    pub fn tokenize(text: &str) -> Vec<String> {
        let is_separator = |c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\'');

        let mut tokens = Vec::new();
        for raw in text.split(is_separator) {
            let token = match raw.find('\'') {
                Some(i) => &raw[..i],
                None => raw,
            };
            if !token.is_empty() {
                tokens.push(token.to_string());
            }
        }
        tokens
    }
}

impl TokenProcessor for TextProcessor {
    fn full_process(&self, text: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for token in Self::tokenize(text) {
            let lowered = token.to_lowercase();
            if self.stop_words.contains(lowered.as_str()) {
                continue;
            }
            out.push(self.stemmer.stem(&lowered).into_owned());
        }
        Ok(out)
    }
}
