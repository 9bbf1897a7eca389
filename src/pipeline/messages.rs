/// User-facing text streamed as progress and used on failure. An empty
/// message is never emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressMessages {
    pub preparing: String,
    pub searching: String,
    /// `{n}` is replaced by the number of documents found
    pub documents_found: String,
    /// `{n}` is replaced by the number of pages the model selected
    pub pages_selected: String,
    pub validated: String,
    pub apology: String,
}

pub const APOLOGY: &str =
    "Desculpe, ocorreu um erro na requisição da API. Tente novamente em alguns minutos.";

impl Default for ProgressMessages {
    fn default() -> Self {
        Self {
            preparing: "Preparando a consulta...".to_string(),
            searching: "Buscando documentos relacionados...".to_string(),
            documents_found: "Encontrei {n} documentos relacionados à sua pesquisa. Analisando o conteúdo..."
                .to_string(),
            pages_selected: "Selecionei as {n} páginas mais relevantes para sua consulta. \
                             Validando e preparando resposta final..."
                .to_string(),
            validated: String::new(),
            apology: APOLOGY.to_string(),
        }
    }
}

impl ProgressMessages {
    pub fn documents_found(&self, n: usize) -> String {
        self.documents_found.replace("{n}", &n.to_string())
    }

    pub fn pages_selected(&self, n: usize) -> String {
        self.pages_selected.replace("{n}", &n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_substituted() {
        let messages = ProgressMessages::default();
        assert_eq!(
            messages.documents_found(12),
            "Encontrei 12 documentos relacionados à sua pesquisa. Analisando o conteúdo..."
        );
        assert!(messages.pages_selected(3).starts_with("Selecionei as 3 páginas"));
        assert!(messages.validated.is_empty());
    }
}
