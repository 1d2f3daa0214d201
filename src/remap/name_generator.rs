use std::collections::HashMap;

/// Hands out `prefix1`, `prefix2`, ... with one counter per prefix. One generator belongs to one
/// mapping run.
#[derive(Debug, Default)]
pub(crate) struct NameGenerator {
    indexes: HashMap<String, u32>,
}

impl NameGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn generate(&mut self, prefix: &str) -> String {
        let index = self.indexes.entry(prefix.to_string()).or_insert(0);
        *index += 1;
        let separator = if prefix.ends_with(|c: char| c.is_ascii_digit()) {
            "_"
        } else {
            ""
        };
        format!("{prefix}{separator}{index}")
    }
}

/// `a` or `an`, by the first letter of `word`.
pub(crate) fn indefinite_article(word: &str) -> &'static str {
    match word.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_prefix() {
        let mut generator = NameGenerator::new();

        assert_eq!(generator.generate("Class"), "Class1");
        assert_eq!(generator.generate("Class"), "Class2");
        assert_eq!(generator.generate("Interface"), "Interface1");
        assert_eq!(generator.generate("Class2_Sub"), "Class2_Sub1");
        assert_eq!(generator.generate("anInt2"), "anInt2_1");
    }

    #[test]
    fn articles_follow_the_first_letter() {
        assert_eq!(indefinite_article("int"), "an");
        assert_eq!(indefinite_article("String"), "a");
        assert_eq!(capitalize("boolean"), "Boolean");
    }
}
