//! Whitespace/punctuation tokenizer shared by template analysis and
//! candidate-line extraction.
//!
//! `(`, `)` and tab always separate tokens. `,` separates only for CSV logs and
//! `/` only when it touches the placeholder in the template (so `#_RESULT_#/s`
//! splits but `MB/s` elsewhere in the line does not). `=` is padded with
//! spaces so it always stands alone.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Separators {
    pub comma: bool,
    pub slash: bool,
}

impl Separators {
    fn is_separator(&self, c: char) -> bool {
        match c {
            '(' | ')' | '\t' => true,
            ',' => self.comma,
            '/' => self.slash,
            _ => false,
        }
    }
}

/// Split one line into tokens.
pub fn tokenize(line: &str, separators: Separators) -> Vec<String> {
    let mut spaced = String::with_capacity(line.len() + 8);
    for c in line.chars() {
        if c == '=' {
            spaced.push_str(" = ");
        } else if separators.is_separator(c) {
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced.split_whitespace().map(str::to_string).collect()
}

/// Index of the first token exactly equal to `needle`.
pub fn position(tokens: &[String], needle: &str) -> Option<usize> {
    tokens.iter().position(|t| t == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_whitespace() {
        let tokens = tokenize("  Average   time: 12.5 ms ", Separators::default());
        assert_eq!(tokens, vec!["Average", "time:", "12.5", "ms"]);
    }

    #[test]
    fn test_parens_and_tabs_always_split() {
        let tokens = tokenize("Score\t(1234)\tpoints", Separators::default());
        assert_eq!(tokens, vec!["Score", "1234", "points"]);
    }

    #[test]
    fn test_equals_is_padded() {
        let tokens = tokenize("fps=60.1", Separators::default());
        assert_eq!(tokens, vec!["fps", "=", "60.1"]);
    }

    #[test]
    fn test_comma_only_under_csv() {
        assert_eq!(tokenize("a,b", Separators::default()), vec!["a,b"]);
        let csv = Separators {
            comma: true,
            slash: false,
        };
        assert_eq!(tokenize("a,b", csv), vec!["a", "b"]);
    }

    #[test]
    fn test_slash_only_when_enabled() {
        assert_eq!(tokenize("12/avg", Separators::default()), vec!["12/avg"]);
        let slash = Separators {
            comma: false,
            slash: true,
        };
        assert_eq!(tokenize("12/avg", slash), vec!["12", "avg"]);
    }

    #[test]
    fn test_position() {
        let tokens = tokenize("a b c", Separators::default());
        assert_eq!(position(&tokens, "b"), Some(1));
        assert_eq!(position(&tokens, "z"), None);
    }
}
