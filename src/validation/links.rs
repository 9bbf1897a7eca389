use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::{RecommendedPage, RetrievedDocument};
use crate::validation::fuzzy::FuzzyMatcher;

/// Titles shorter than this are too ambiguous to use as evidence.
const MIN_TITLE_CHARS: usize = 3;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s)\]>"'<]+"#).expect("url regex"))
}

/// Answer text with its links rewritten, plus the links it now contains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkCorrection {
    pub answer_text: String,
    pub links: Vec<RecommendedPage>,
}

/// Candidate whose title appears latest in `window`, case-insensitive.
fn title_in_window<'a>(window: &str, candidates: &'a [RetrievedDocument]) -> Option<&'a RetrievedDocument> {
    let window = window.to_lowercase();
    let mut best: Option<(usize, &RetrievedDocument)> = None;

    for doc in candidates {
        let title = doc.title.trim().to_lowercase();
        if title.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        if let Some(pos) = window.rfind(&title) {
            if best.map_or(true, |(p, _)| pos > p) {
                best = Some((pos, doc));
            }
        }
    }
    best.map(|(_, doc)| doc)
}

/// Rewrite every URL in `answer` that does not name a retrieved document.
///
/// Per URL, in order: keep an exact match; otherwise use the candidate whose
/// title appears in the text since the previous URL; otherwise the most
/// similar candidate identifier at or above the matcher's cutoff; otherwise
/// leave the URL alone. Running this on its own output changes nothing.
pub fn correct_links(answer: &str, candidates: &[RetrievedDocument], matcher: &FuzzyMatcher) -> LinkCorrection {
    let mut text = String::with_capacity(answer.len());
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = 0;

    for m in url_pattern().find_iter(answer) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':']);
        let start = m.start();
        let end = start + url.len();
        let window = &answer[cursor..start];

        let resolved = match candidates.iter().find(|d| d.identifier == url) {
            Some(doc) => Some(doc),
            None => title_in_window(window, candidates).or_else(|| {
                matcher
                    .best_match(url, candidates.iter().map(|d| d.identifier.as_str()))
                    .and_then(|(id, _)| candidates.iter().find(|d| d.identifier == id))
            }),
        };

        text.push_str(window);
        match resolved {
            Some(doc) => {
                if doc.identifier != url {
                    tracing::warn!("Corrected link '{url}' -> '{}'", doc.identifier);
                }
                text.push_str(&doc.identifier);
                if seen.insert(doc.identifier.clone()) {
                    links.push(RecommendedPage {
                        identifier: doc.identifier.clone(),
                        title: doc.title.clone(),
                        description: None,
                        justification: None,
                    });
                }
            }
            None => {
                tracing::warn!("Leaving unrecognised link '{url}'");
                text.push_str(url);
            }
        }
        cursor = end;
    }
    text.push_str(&answer[cursor..]);

    LinkCorrection {
        answer_text: text,
        links,
    }
}
