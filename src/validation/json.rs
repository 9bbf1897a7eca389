use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::models::{RecommendedPage, RetrievedDocument};
use crate::validation::fuzzy::FuzzyMatcher;
use crate::validation::identifiers::IdentifierSet;

/// One page as the model wrote it. Every field is optional; both the
/// Portuguese and English field names are accepted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawPage {
    #[serde(default, alias = "url", alias = "slug", alias = "identificador")]
    pub identifier: Option<String>,
    #[serde(default, alias = "titulo")]
    pub title: Option<String>,
    #[serde(default, alias = "descricao")]
    pub description: Option<String>,
    #[serde(default, alias = "justificativa")]
    pub justification: Option<String>,
}

/// The balanced `{...}` starting at byte `start`, skipping braces inside
/// string literals.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First JSON object embedded in `text`, which may be wrapped in prose or
/// markdown fences.
pub fn extract_json_object(text: &str) -> Option<Value> {
    for (start, _) in text.match_indices('{') {
        let Some(candidate) = balanced_object_at(text, start) else {
            continue;
        };
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
    }
    None
}

/// Pages listed under `data.paginas` (or `data.pages`). Unparseable output
/// yields an empty list; malformed entries are skipped.
pub fn parse_pages(raw: &str) -> Vec<RawPage> {
    let Some(value) = extract_json_object(raw) else {
        tracing::warn!("No JSON object found in model output");
        return Vec::new();
    };

    let pages = value
        .get("data")
        .and_then(|d| d.get("paginas").or_else(|| d.get("pages")))
        .and_then(Value::as_array);

    let Some(pages) = pages else {
        tracing::warn!("Model JSON has no data.paginas list");
        return Vec::new();
    };

    pages
        .iter()
        .filter_map(|p| match serde_json::from_value::<RawPage>(p.clone()) {
            Ok(page) => Some(page),
            Err(e) => {
                tracing::warn!("Skipping malformed page entry: {e}");
                None
            }
        })
        .collect()
}

/// Check every page's identifier against `authority`. Exact matches pass,
/// near misses are rewritten to the closest authoritative identifier, and
/// the rest are dropped. Missing titles are filled from the retrieved
/// documents. The result holds each identifier once.
pub fn validate_pages(
    pages: Vec<RawPage>,
    authority: &IdentifierSet,
    candidates: &[RetrievedDocument],
    matcher: &FuzzyMatcher,
) -> Vec<RecommendedPage> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for page in pages {
        let Some(raw_id) = page.identifier.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            tracing::warn!("Dropping page without identifier");
            continue;
        };

        let identifier = if authority.contains(raw_id) {
            raw_id.to_string()
        } else {
            match matcher.best_match(raw_id, authority.iter()) {
                Some((corrected, score)) => {
                    tracing::warn!("Corrected identifier '{raw_id}' -> '{corrected}' ({score:.3})");
                    corrected.to_string()
                }
                None => {
                    tracing::warn!("Dropping unknown identifier '{raw_id}'");
                    continue;
                }
            }
        };

        if !seen.insert(identifier.clone()) {
            continue;
        }

        let title = page
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                candidates
                    .iter()
                    .find(|d| d.identifier == identifier)
                    .map(|d| d.title.clone())
            })
            .unwrap_or_default();

        out.push(RecommendedPage {
            identifier,
            title,
            description: page.description,
            justification: page.justification,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimilarityMetric;
    use crate::models::SourceKind;

    fn matcher() -> FuzzyMatcher {
        FuzzyMatcher::new(SimilarityMetric::Levenshtein, 0.9)
    }

    fn url(slug: &str) -> String {
        format!("https://acervo.org/{slug}")
    }

    fn authority() -> IdentifierSet {
        IdentifierSet::from_iter([url("xyz-124"), url("judeus-no-brasil")])
    }

    #[test]
    fn test_extracts_object_from_fenced_prose() {
        let raw = "Claro! Aqui está:\n```json\n{\"data\": {\"paginas\": [{\"url\": \"a}b\"}]}}\n```\nEspero ter ajudado {sic}";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["data"]["paginas"][0]["url"], "a}b");
    }

    #[test]
    fn test_skips_non_json_braces() {
        let raw = "{não é json} depois {\"data\": {\"paginas\": []}}";
        let value = extract_json_object(raw).unwrap();
        assert!(value["data"]["paginas"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_output_is_empty() {
        assert!(parse_pages("sem json aqui").is_empty());
        assert!(parse_pages("{\"data\": {\"paginas\": [").is_empty());
        assert!(parse_pages("{\"outra\": 1}").is_empty());
    }

    #[test]
    fn test_parses_portuguese_fields() {
        let pages = parse_pages(
            r#"{"data":{"paginas":[{"slug":"xyz-123","titulo":"XYZ","descricao":"d","justificativa":"j"}, 42]}}"#,
        );
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].identifier.as_deref(), Some("xyz-123"));
        assert_eq!(pages[0].title.as_deref(), Some("XYZ"));
        assert_eq!(pages[0].justification.as_deref(), Some("j"));
    }

    #[test]
    fn test_near_miss_is_corrected() {
        let pages = parse_pages(r#"{"data":{"paginas":[{"slug":"https://acervo.org/xyz-123","titulo":"XYZ"}]}}"#);
        let validated = validate_pages(pages, &authority(), &[], &matcher());
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].identifier, url("xyz-124"));
        assert_eq!(validated[0].description, None);
    }

    #[test]
    fn test_unknown_and_duplicate_pages_are_dropped() {
        let pages = parse_pages(
            r#"{"data":{"paginas":[
                {"url":"https://acervo.org/totalmente-diferente"},
                {"url":"https://acervo.org/xyz-124"},
                {"url":"https://acervo.org/xyz-123"},
                {"titulo":"sem url"}
            ]}}"#,
        );
        let validated = validate_pages(pages, &authority(), &[], &matcher());
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].identifier, url("xyz-124"));
    }

    #[test]
    fn test_missing_title_is_backfilled() {
        let candidates = vec![RetrievedDocument {
            identifier: url("judeus-no-brasil"),
            title: "Judeus no Brasil".into(),
            content: String::new(),
            relevance_score: 1.0,
            source: SourceKind::Lexical,
        }];
        let pages = parse_pages(r#"{"data":{"paginas":[{"url":"https://acervo.org/judeus-no-brasil"}]}}"#);
        let validated = validate_pages(pages, &authority(), &candidates, &matcher());
        assert_eq!(validated[0].title, "Judeus no Brasil");
    }

    #[test]
    fn test_validation_is_idempotent() {
        let pages = parse_pages(
            r#"{"data":{"paginas":[{"url":"https://acervo.org/xyz-123","titulo":"XYZ","justificativa":"j"},{"url":"https://acervo.org/judeus-no-brasi"}]}}"#,
        );
        let first = validate_pages(pages, &authority(), &[], &matcher());

        let again: Vec<RawPage> = first
            .iter()
            .map(|p| RawPage {
                identifier: Some(p.identifier.clone()),
                title: Some(p.title.clone()),
                description: p.description.clone(),
                justification: p.justification.clone(),
            })
            .collect();
        let second = validate_pages(again, &authority(), &[], &matcher());
        assert_eq!(first, second);
    }
}
