// src/version.rs

//! Version comparison and dependency patterns
//!
//! Versions are compared chunk by chunk on their numeric runs only:
//! letters and separators are skipped, and a chunk missing on one side
//! counts as zero. `1.2.3` is newer than `1.2`, while `1.0a` and `1.0b`
//! compare equal.

use std::cmp::Ordering;
use std::fmt;

/// Relational operator of a dependency pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DependOp {
    /// Any version matches
    #[default]
    None,
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
}

impl DependOp {
    /// On-disk operator code
    pub fn code(self) -> u8 {
        match self {
            DependOp::None => 0,
            DependOp::Eq => 1,
            DependOp::Ge => 2,
            DependOp::Gt => 3,
            DependOp::Le => 4,
            DependOp::Lt => 5,
            DependOp::Ne => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => DependOp::None,
            1 => DependOp::Eq,
            2 => DependOp::Ge,
            3 => DependOp::Gt,
            4 => DependOp::Le,
            5 => DependOp::Lt,
            6 => DependOp::Ne,
            _ => return None,
        })
    }

    /// Parse an operator token such as `>=` or `!=`
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "" => DependOp::None,
            "=" | "==" => DependOp::Eq,
            ">=" => DependOp::Ge,
            ">" => DependOp::Gt,
            "<=" => DependOp::Le,
            "<" => DependOp::Lt,
            "!=" | "!" => DependOp::Ne,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DependOp::None => "",
            DependOp::Eq => "=",
            DependOp::Ge => ">=",
            DependOp::Gt => ">",
            DependOp::Le => "<=",
            DependOp::Lt => "<",
            DependOp::Ne => "!=",
        }
    }
}

impl fmt::Display for DependOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the next numeric chunk starting at `pos`, skipping anything that is
/// not an ASCII digit. Returns `None` once the input is exhausted.
fn next_chunk(s: &[u8], pos: &mut usize) -> Option<u64> {
    while *pos < s.len() && !s[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos >= s.len() {
        return None;
    }

    let mut value: u64 = 0;
    while *pos < s.len() && s[*pos].is_ascii_digit() {
        value = value
            .saturating_mul(10)
            .saturating_add(u64::from(s[*pos] - b'0'));
        *pos += 1;
    }
    Some(value)
}

/// Compare two version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut pa, mut pb) = (0usize, 0usize);

    loop {
        let ca = next_chunk(a, &mut pa);
        let cb = next_chunk(b, &mut pb);

        if ca.is_none() && cb.is_none() {
            return Ordering::Equal;
        }

        match ca.unwrap_or(0).cmp(&cb.unwrap_or(0)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
}

/// Check whether `candidate` satisfies `op required`
pub fn match_version(candidate: &str, required: &str, op: DependOp) -> bool {
    if op == DependOp::None {
        return true;
    }

    let rs = compare_versions(candidate, required);
    match op {
        DependOp::None => true,
        DependOp::Eq => rs == Ordering::Equal,
        DependOp::Ge => rs != Ordering::Less,
        DependOp::Gt => rs == Ordering::Greater,
        DependOp::Le => rs != Ordering::Greater,
        DependOp::Lt => rs == Ordering::Less,
        DependOp::Ne => rs != Ordering::Equal,
    }
}

/// A parsed `name op version` pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPattern {
    pub name: String,
    pub op: DependOp,
    pub version: String,
}

impl VersionPattern {
    /// Parse a pattern like `foo`, `foo>=1.2` or `foo >= 1.2`
    ///
    /// The name runs up to the first of `<`, `>`, `!`, `=`. Returns `None`
    /// when the name is empty or an operator has no version.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let split = input
            .find(['<', '>', '!', '='])
            .unwrap_or(input.len());

        let name = input[..split].trim();
        if name.is_empty() {
            return None;
        }

        let rest = &input[split..];
        let op_len = rest
            .find(|c: char| !matches!(c, '<' | '>' | '!' | '='))
            .unwrap_or(rest.len());
        let op = DependOp::parse(&rest[..op_len])?;
        let version = rest[op_len..].trim();

        if op != DependOp::None && version.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            op,
            version: version.to_string(),
        })
    }

    pub fn matches(&self, version: &str) -> bool {
        match_version(version, &self.version, self.op)
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&depend_string(&self.name, self.op, &self.version))
    }
}

/// Format a dependency back into its textual pattern, e.g. `libfoo>=1.0`
pub fn depend_string(name: &str, op: DependOp, version: &str) -> String {
    if op == DependOp::None || version.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", name, op, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions_table() {
        let cases = [
            ("1.0", "1.0", Ordering::Equal),
            ("1.2.3", "1.2", Ordering::Greater),
            ("1.2", "1.2.3", Ordering::Less),
            ("1.0", "1.0.0", Ordering::Equal),
            ("1.0a", "1.0b", Ordering::Equal),
            ("2.0", "10.0", Ordering::Less),
            ("1.10", "1.9", Ordering::Greater),
            ("1.2~rc1", "1.2", Ordering::Greater),
            ("abc", "def", Ordering::Equal),
            ("1.0-2", "1.0-10", Ordering::Less),
            ("0:1.0", "1.0", Ordering::Less),
            ("", "0", Ordering::Equal),
        ];

        for (a, b, expected) in cases {
            assert_eq!(compare_versions(a, b), expected, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_compare_versions_huge_chunks_saturate() {
        assert_eq!(
            compare_versions("99999999999999999999999", "1"),
            Ordering::Greater
        );
    }

    #[test]
    fn test_match_version_operators() {
        assert!(match_version("2.0", "2.0", DependOp::Eq));
        assert!(match_version("2.1", "2.0", DependOp::Ge));
        assert!(!match_version("1.9", "2.0", DependOp::Ge));
        assert!(match_version("2.1", "2.0", DependOp::Gt));
        assert!(!match_version("2.0", "2.0", DependOp::Gt));
        assert!(match_version("1.0", "2.0", DependOp::Le));
        assert!(match_version("1.0", "2.0", DependOp::Lt));
        assert!(match_version("1.0", "2.0", DependOp::Ne));
        assert!(match_version("anything", "2.0", DependOp::None));
    }

    #[test]
    fn test_parse_pattern() {
        let p = VersionPattern::parse("libfoo>=1.2").unwrap();
        assert_eq!(p.name, "libfoo");
        assert_eq!(p.op, DependOp::Ge);
        assert_eq!(p.version, "1.2");

        let p = VersionPattern::parse("  bar != 3 ").unwrap();
        assert_eq!(p.name, "bar");
        assert_eq!(p.op, DependOp::Ne);
        assert_eq!(p.version, "3");

        let p = VersionPattern::parse("baz").unwrap();
        assert_eq!(p.op, DependOp::None);
        assert!(p.version.is_empty());

        let p = VersionPattern::parse("qux==1").unwrap();
        assert_eq!(p.op, DependOp::Eq);

        assert!(VersionPattern::parse(">=1.0").is_none());
        assert!(VersionPattern::parse("foo>=").is_none());
        assert!(VersionPattern::parse("foo=>1").is_none());
    }

    #[test]
    fn test_depend_string() {
        assert_eq!(depend_string("foo", DependOp::Ge, "1.0"), "foo>=1.0");
        assert_eq!(depend_string("foo", DependOp::None, "1.0"), "foo");
        assert_eq!(
            VersionPattern::parse("a<2").unwrap().to_string(),
            "a<2"
        );
    }

    #[test]
    fn test_op_codes() {
        for code in 0..7 {
            let op = DependOp::from_code(code).unwrap();
            assert_eq!(op.code(), code);
        }
        assert!(DependOp::from_code(7).is_none());
    }
}
