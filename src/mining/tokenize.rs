/// Lowercased word tokens of two or more characters. Word characters are
/// Unicode alphanumerics and `_`, so Hangul syllables count as letters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| word.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn splits_on_non_word_chars() {
        assert_eq!(
            tokenize("스타일러 살균, 정말 좋아요! a UV_lamp"),
            vec!["스타일러", "살균", "정말", "좋아요", "uv_lamp"]
        );
    }

    #[test]
    fn single_chars_are_dropped() {
        assert!(tokenize("a 1 옷 .").is_empty());
        assert_eq!(tokenize("99.9%"), vec!["99"]);
    }
}
