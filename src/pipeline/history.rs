use crate::llm::prompt::{char_len, tail_chars, truncate_chars};
use crate::models::HistoryTurn;

const TURN_SEPARATOR: &str = "\n---\n";

/// Render prior turns as `Usuário: …\nBot: …\n---` blocks, oldest first.
pub fn format_history(turns: &[HistoryTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("Usuário: {}\nBot: {}\n---", t.user.trim(), t.bot.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Query and history cut to the character budget.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedRequest {
    pub query: String,
    pub history: Option<String>,
}

/// Fit `query` plus `history` into `max_query_chars` characters.
///
/// The query is kept whole when it fits. The history gets what is left;
/// older text is dropped first and a cut turn is skipped entirely. A budget
/// below `min_history_chars` drops the history.
pub fn fit_history(
    query: &str,
    history: Option<&str>,
    max_query_chars: usize,
    min_history_chars: usize,
) -> FittedRequest {
    let query = truncate_chars(query.trim(), max_query_chars).to_string();
    let budget = max_query_chars.saturating_sub(char_len(&query));

    let history = history
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .filter(|_| budget >= min_history_chars)
        .and_then(|h| {
            if char_len(h) <= budget {
                return Some(h.to_string());
            }
            let tail = tail_chars(h, budget);
            let tail = match tail.find(TURN_SEPARATOR) {
                Some(idx) => &tail[idx + TURN_SEPARATOR.len()..],
                None => tail,
            };
            let tail = tail.trim();
            (!tail.is_empty()).then(|| tail.to_string())
        });

    FittedRequest { query, history }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<HistoryTurn> {
        (0..n)
            .map(|i| HistoryTurn {
                user: format!("pergunta {i} sobre imigração"),
                bot: format!("resposta {i} com detalhes sobre o tema"),
            })
            .collect()
    }

    #[test]
    fn test_format_history() {
        let text = format_history(&turns(2));
        assert_eq!(
            text,
            "Usuário: pergunta 0 sobre imigração\nBot: resposta 0 com detalhes sobre o tema\n---\n\
             Usuário: pergunta 1 sobre imigração\nBot: resposta 1 com detalhes sobre o tema\n---"
        );
    }

    #[test]
    fn test_short_history_is_kept_whole() {
        let history = format_history(&turns(1));
        let fitted = fit_history("judeus no brasil", Some(&history), 1000, 100);
        assert_eq!(fitted.history.as_deref(), Some(history.as_str()));
    }

    #[test]
    fn test_long_history_keeps_latest_whole_turns() {
        let history = format_history(&turns(30));
        let query = "história dos judeus no Brasil";
        let fitted = fit_history(query, Some(&history), 1000, 100);
        let kept = fitted.history.unwrap();

        assert!(char_len(&kept) + char_len(&fitted.query) <= 1000);
        assert!(kept.starts_with("Usuário: "));
        assert!(kept.ends_with("resposta 29 com detalhes sobre o tema\n---"));
        assert!(!kept.contains("pergunta 0 "));
    }

    #[test]
    fn test_small_budget_drops_history() {
        let query = "x".repeat(950);
        let fitted = fit_history(&query, Some("Usuário: oi\nBot: olá\n---"), 1000, 100);
        assert_eq!(fitted.history, None);
    }

    #[test]
    fn test_oversized_query_is_clipped() {
        let query = "é".repeat(1200);
        let fitted = fit_history(&query, Some("qualquer"), 1000, 100);
        assert_eq!(char_len(&fitted.query), 1000);
        assert_eq!(fitted.history, None);
    }

    #[test]
    fn test_budget_invariant_over_many_sizes() {
        let history = format_history(&turns(12));
        for query_len in [0usize, 1, 50, 400, 899, 900, 901, 999, 1000, 1500] {
            let query = "q".repeat(query_len);
            let fitted = fit_history(&query, Some(&history), 1000, 100);
            let used = fitted.history.as_deref().map(char_len).unwrap_or(0);
            assert!(used + char_len(&fitted.query) <= 1000, "query_len={query_len}");
        }
    }
}
