// 🔤 Token-order-independent name similarity
//
// Names are lowercased, punctuation becomes whitespace, legal-form words are
// optionally folded to their abbreviation, then tokens are sorted and the
// joined strings are compared by normalized edit distance (0-100).

/// Long legal-form words and the abbreviation they fold to
const LEGAL_FORMS: [(&str, &str); 4] = [
    ("corporation", "corp"),
    ("incorporated", "inc"),
    ("limited", "ltd"),
    ("company", "co"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSortScorer {
    pub fold_legal_forms: bool,
}

impl TokenSortScorer {
    pub fn new(fold_legal_forms: bool) -> Self {
        TokenSortScorer { fold_legal_forms }
    }

    /// Comparison key: processed, folded, sorted tokens joined by one space
    pub fn sort_key(&self, name: &str) -> String {
        let processed: String = name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_lowercase().next().unwrap_or(c)
                } else {
                    ' '
                }
            })
            .collect();

        let mut tokens: Vec<&str> = processed
            .split_whitespace()
            .map(|token| {
                if self.fold_legal_forms {
                    LEGAL_FORMS
                        .iter()
                        .find(|(long, _)| *long == token)
                        .map(|(_, short)| *short)
                        .unwrap_or(token)
                } else {
                    token
                }
            })
            .collect();

        tokens.sort_unstable();
        tokens.join(" ")
    }

    /// Score two precomputed keys. An empty key scores 0 against anything.
    pub fn score_keys(&self, a: &str, b: &str) -> u8 {
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        (strsim::normalized_levenshtein(a, b) * 100.0).round() as u8
    }

    pub fn score(&self, a: &str, b: &str) -> u8 {
        self.score_keys(&self.sort_key(a), &self.sort_key(b))
    }
}

impl Default for TokenSortScorer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_ignores_order_case_and_punctuation() {
        let scorer = TokenSortScorer::new(false);
        assert_eq!(scorer.sort_key("Bank of  NEW YORK, The"), "bank new of the york");
        assert_eq!(
            scorer.sort_key("The Bank of New York"),
            scorer.sort_key("new york bank OF the")
        );
    }

    #[test]
    fn test_identical_after_processing_scores_100() {
        let scorer = TokenSortScorer::default();
        assert_eq!(scorer.score("Acme Corp.", "ACME corp"), 100);
        assert_eq!(scorer.score("Nestle SA", "SA Nestle"), 100);
    }

    #[test]
    fn test_legal_form_folding() {
        let folding = TokenSortScorer::new(true);
        let plain = TokenSortScorer::new(false);

        assert_eq!(folding.score("Acme Corp.", "Acme Corporation"), 100);
        assert!(plain.score("Acme Corp.", "Acme Corporation") < 100);
        assert_eq!(folding.sort_key("Widget Company Limited"), "co ltd widget");
    }

    #[test]
    fn test_unrelated_names_score_low() {
        let scorer = TokenSortScorer::default();
        assert!(scorer.score("Equinor ASA", "Toyota Motor Corp") < 40);
    }

    #[test]
    fn test_empty_key_scores_zero() {
        let scorer = TokenSortScorer::default();
        assert_eq!(scorer.score("...", "..."), 0);
        assert_eq!(scorer.score("", "Acme"), 0);
    }
}
