// src/repository/parsers/translations.rs

//! Translation feed parser
//!
//! Each line is `name:short description`. Lines without a colon are ignored.

use super::content_lines;

/// A localized short description for a package name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub name: String,
    pub short_desc: String,
}

/// Parse a translations feed
pub fn parse_translations(text: &str) -> Vec<Translation> {
    content_lines(text)
        .filter_map(|(_, line)| line.split_once(':'))
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, desc)| Translation {
            name: name.trim().to_string(),
            short_desc: desc.trim().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translations() {
        let parsed = parse_translations("libfoo:Foo library: core\nnocolon\n:orphan\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "libfoo");
        assert_eq!(parsed[0].short_desc, "Foo library: core");
    }
}
