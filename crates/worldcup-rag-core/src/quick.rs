//! Quick answers: canned responses for greetings and a handful of common
//! questions, resolved before retrieval.
//!
//! Factual entries match exactly on the normalized query, first with
//! punctuation kept and then with punctuation stripped. Only greetings match
//! loosely: a short message (at most [`GREETING_MAX_WORDS`] words) that
//! starts with a greeting and continues with nothing but small talk gets the
//! greeting reply, so "oi, tudo bem?" is answered without calling the model
//! while "oi, quem ganhou 2022?" goes on to retrieval.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Longest message, in words, that can still match a greeting loosely.
pub const GREETING_MAX_WORDS: usize = 4;

/// Words that may follow a greeting without turning it into a question.
const SMALL_TALK: &[&str] = &[
    "tudo", "bem", "bom", "beleza", "como", "vai", "pessoal", "galera", "gente", "amigo",
    "e", "aí", "ai", "there", "everyone", "all", "how", "are", "you",
];

const GREETING_PT: &str =
    "Olá! Sou seu assistente especializado em Copa do Mundo FIFA. Como posso ajudar?";
const GREETING_EN: &str = "Hello! I'm your FIFA World Cup specialist assistant. How can I help?";
const GREETING_HI: &str =
    "Oi! Sou especialista em Copa do Mundo FIFA. O que você gostaria de saber?";
const CHAMPION_2022: &str = "A Argentina conquistou a Copa do Mundo de 2022, realizada no Catar, \
vencendo a França na final. O Catar foi a sede, não o campeão. \
Kylian Mbappé foi o artilheiro com 8 gols.";

/// One quick-answer entry, as read from the optional extension file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickAnswerEntry {
    pub question: String,
    pub answer: String,
    /// Greeting entries also match short messages that start with the word.
    #[serde(default)]
    pub greeting: bool,
}

/// Lookup table for quick answers.
#[derive(Debug, Clone, Default)]
pub struct QuickAnswers {
    exact: HashMap<String, String>,
    stripped: HashMap<String, String>,
    greetings: HashMap<String, String>,
}

impl QuickAnswers {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (word, reply) in [
            ("oi", GREETING_PT),
            ("olá", GREETING_PT),
            ("ola", GREETING_PT),
            ("hello", GREETING_EN),
            ("hi", GREETING_HI),
            ("bom dia", GREETING_PT),
            ("boa tarde", GREETING_PT),
            ("boa noite", GREETING_PT),
        ] {
            table.insert_greeting(word, reply);
        }
        for (q, a) in [
            (
                "quem ganhou a copa de 1970",
                "O Brasil conquistou a Copa do Mundo de 1970, realizada no México. \
Foi o terceiro título mundial brasileiro.",
            ),
            (
                "artilheiro copa 1970",
                "Gerd Müller (Alemanha Ocidental) foi o artilheiro da Copa de 1970 com 10 gols.",
            ),
            (
                "quantas copas o brasil tem",
                "O Brasil conquistou 5 Copas do Mundo: 1958 (Suécia), 1962 (Chile), \
1970 (México), 1994 (EUA), 2002 (Japão/Coreia do Sul).",
            ),
            (
                "próxima copa",
                "A próxima Copa do Mundo será em 2026, realizada conjuntamente pelos EUA, \
Canadá e México, com 48 seleções.",
            ),
            ("quem ganhou em 2022", CHAMPION_2022),
            ("quem ganhou a copa de 2022", CHAMPION_2022),
        ] {
            table.insert(q, a);
        }
        table
    }

    /// Add or replace an exact-match entry.
    pub fn insert(&mut self, question: &str, answer: &str) {
        let key = normalize_query(question);
        self.stripped
            .insert(strip_punctuation(&key), answer.to_string());
        self.exact.insert(key, answer.to_string());
    }

    /// Add a greeting: an exact entry that also matches loosely.
    pub fn insert_greeting(&mut self, word: &str, answer: &str) {
        self.insert(word, answer);
        self.greetings
            .insert(strip_punctuation(&normalize_query(word)), answer.to_string());
    }

    /// Add entries read from a file.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = QuickAnswerEntry>) {
        for entry in entries {
            if entry.greeting {
                self.insert_greeting(&entry.question, &entry.answer);
            } else {
                self.insert(&entry.question, &entry.answer);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Resolve a raw user message.
    pub fn resolve(&self, query: &str) -> Option<&str> {
        let key = normalize_query(query);
        if key.is_empty() {
            return None;
        }
        if let Some(answer) = self.exact.get(&key) {
            return Some(answer.as_str());
        }

        let bare = strip_punctuation(&key);
        if let Some(answer) = self.stripped.get(&bare) {
            return Some(answer.as_str());
        }

        self.resolve_greeting(&bare)
    }

    fn resolve_greeting(&self, bare: &str) -> Option<&str> {
        let words: Vec<&str> = bare.split(' ').collect();
        if words.len() > GREETING_MAX_WORDS {
            return None;
        }
        // two-word greetings ("bom dia") take precedence over one-word ones
        let pair = words.get(1).map(|second| format!("{} {}", words[0], second));
        let (answer, rest) = match pair.and_then(|p| self.greetings.get(&p)) {
            Some(answer) => (answer, &words[2..]),
            None => (self.greetings.get(words[0])?, &words[1..]),
        };
        if rest.iter().all(|w| SMALL_TALK.contains(w)) {
            Some(answer.as_str())
        } else {
            None
        }
    }
}

/// Primary normalization: lowercase, trim, collapse internal whitespace.
///
/// Idempotent, and also used for response cache keys.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Secondary normalization: drop everything that is not alphanumeric or a
/// space, then collapse whitespace again.
pub fn strip_punctuation(normalized: &str) -> String {
    let kept: String = normalized
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    normalize_query(&kept)
}
