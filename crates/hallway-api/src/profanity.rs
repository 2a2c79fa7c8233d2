use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Words masked for recipients who turned the filter on. Matching is
/// case-insensitive and substring-based.
pub const BLOCKED_WORDS: &[&str] = &[
    "motherfucker",
    "fuck",
    "shit",
    "bitch",
    "bastard",
    "asshole",
    "cunt",
    "dick",
    "piss",
    "slut",
    "whore",
    "damn",
    "crap",
];

static DEFAULT_FILTER: Lazy<ProfanityFilter> =
    Lazy::new(|| ProfanityFilter::new(BLOCKED_WORDS).expect("built-in word list is valid"));

#[derive(Debug, Clone)]
pub struct ProfanityFilter {
    patterns: Vec<Regex>,
}

impl ProfanityFilter {
    pub fn new<I, S>(words: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = words
            .into_iter()
            .filter(|w| !w.as_ref().is_empty())
            .map(|w| {
                RegexBuilder::new(&regex::escape(w.as_ref()))
                    .case_insensitive(true)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Replace every occurrence of a listed word with asterisks, one per
    /// character of the matched text.
    pub fn censor<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern
                .replace_all(&out, |caps: &regex::Captures<'_>| "*".repeat(caps[0].chars().count()))
            {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            };
            if let Some(s) = replaced {
                out = Cow::Owned(s);
            }
        }
        out
    }

    /// Censor only when the recipient has the filter enabled.
    pub fn for_recipient<'a>(&self, text: &'a str, filter_enabled: bool) -> Cow<'a, str> {
        if filter_enabled {
            self.censor(text)
        } else {
            Cow::Borrowed(text)
        }
    }
}

impl Default for ProfanityFilter {
    fn default() -> Self {
        DEFAULT_FILTER.clone()
    }
}
