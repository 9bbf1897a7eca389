/// Portuguese function words plus conversational filler that never helps
/// retrieval ("estou pesquisando sobre ...").
const STOPWORDS: &[&str] = &[
    "a", "à", "às", "ao", "aos", "as", "o", "os", "um", "uma", "uns", "umas", "de", "da", "das",
    "do", "dos", "em", "na", "nas", "no", "nos", "num", "numa", "por", "pela", "pelas", "pelo",
    "pelos", "para", "pra", "com", "sem", "sob", "sobre", "entre", "até", "e", "ou", "mas", "que",
    "se", "como", "quando", "onde", "qual", "quais", "quem", "é", "foi", "foram", "ser",
    "ter", "há", "seu", "sua", "seus", "suas", "meu", "minha", "este", "esta", "esse", "essa",
    "isso", "isto", "aquele", "aquela", "eu", "me", "mim", "você", "vocês", "ele", "ela", "eles",
    "elas", "lhe", "muito", "mais", "menos", "também", "já", "não", "sim", "estou", "quero",
    "gostaria", "queria", "preciso", "procuro", "procurando", "pesquisando", "buscando", "saber",
    "informações", "algo", "alguma", "algum", "the", "of", "and", "in", "on", "for", "to",
];

pub fn is_stopword(lowercase_word: &str) -> bool {
    STOPWORDS.contains(&lowercase_word)
}

/// Lowercase and split on anything that is not a letter or digit.
/// Accented letters are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whitespace-separated words, lowercased. Used for the substring prefilter,
/// where punctuation inside a word (hyphens, apostrophes) must survive.
pub fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation() && c != '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_keeps_accents_and_splits_hyphens() {
        assert_eq!(
            tokenize("História dos cristãos-novos, 1808!"),
            vec!["história", "dos", "cristãos", "novos", "1808"]
        );
    }

    #[test]
    fn test_words_keeps_inner_hyphens() {
        assert_eq!(words("  Cristãos-novos,  Brasil. "), vec!["cristãos-novos", "brasil"]);
    }

    #[test]
    fn test_stopwords() {
        assert!(is_stopword("dos"));
        assert!(!is_stopword("judeus"));
    }
}
