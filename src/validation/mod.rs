//! Checks model output against the corpus: structured page lists are
//! matched to the authoritative identifiers, free-text links to the
//! retrieved documents. Nothing here fails; bad records are corrected or
//! dropped.

pub mod fuzzy;
pub mod identifiers;
pub mod json;
pub mod links;

use crate::config::ValidationConfig;
use crate::models::{RecommendedPage, RetrievedDocument};
use fuzzy::FuzzyMatcher;
use identifiers::IdentifierSet;
use links::LinkCorrection;

pub struct ResponseValidator {
    identifiers: FuzzyMatcher,
    links: FuzzyMatcher,
}

impl ResponseValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            identifiers: FuzzyMatcher::new(config.identifier_metric, config.identifier_cutoff),
            links: FuzzyMatcher::new(config.link_metric, config.link_cutoff),
        }
    }

    /// Parse the first JSON object in `raw` and validate its pages.
    pub fn validate_structured(
        &self,
        raw: &str,
        authority: &IdentifierSet,
        candidates: &[RetrievedDocument],
    ) -> Vec<RecommendedPage> {
        self.validate_pages(json::parse_pages(raw), authority, candidates)
    }

    /// Validate pages already parsed with [`json::parse_pages`].
    pub fn validate_pages(
        &self,
        pages: Vec<json::RawPage>,
        authority: &IdentifierSet,
        candidates: &[RetrievedDocument],
    ) -> Vec<RecommendedPage> {
        let listed = pages.len();
        let validated = json::validate_pages(pages, authority, candidates, &self.identifiers);
        tracing::info!("Validated {} of {listed} recommended pages", validated.len());
        validated
    }

    /// Correct the links in a prose answer.
    pub fn validate_free_text(&self, answer: &str, candidates: &[RetrievedDocument]) -> LinkCorrection {
        links::correct_links(answer, candidates, &self.links)
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_scenario_rewrites_near_miss() {
        let authority = IdentifierSet::from_iter([
            "https://acervo.org/xyz-124".to_string(),
            "https://acervo.org/abc-001".to_string(),
        ]);
        let raw = r#"Resposta: {"data":{"paginas":[{"slug":"https://acervo.org/xyz-123","titulo":"XYZ","descricao":"d","justificativa":"j"}]}}"#;
        let pages = ResponseValidator::default().validate_structured(raw, &authority, &[]);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].identifier, "https://acervo.org/xyz-124");
        assert_eq!(pages[0].title, "XYZ");
    }

    #[test]
    fn test_unrelated_page_on_same_host_is_dropped() {
        let authority =
            IdentifierSet::from_iter(["https://www.museujudaico.org.br/acervo/festas-judaicas".to_string()]);
        let pages = vec![json::RawPage {
            identifier: Some("https://www.museujudaico.org.br/acervo/historia-geral".into()),
            title: Some("História geral".into()),
            description: None,
            justification: None,
        }];
        let validated = ResponseValidator::default().validate_pages(pages, &authority, &[]);
        assert!(validated.is_empty());
    }

    #[test]
    fn test_garbage_output_validates_to_nothing() {
        let authority = IdentifierSet::from_iter(["xyz-124".to_string()]);
        let pages = ResponseValidator::default().validate_structured("desculpe, não sei", &authority, &[]);
        assert!(pages.is_empty());
    }
}
