// ==============================================================================
// validator.rs - Identifier and Literal Validation
// ==============================================================================
// Description: Validates array, attribute and dimension names before they are
//              placed into AFL statements; escapes string literals
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-02-18
// Version: 1.0.0
// Security: Allowlist-only identifier characters, no textual interpolation
// ==============================================================================

use crate::error::{PipelineError, PipelineResult};

const MAX_IDENTIFIER_LEN: usize = 128;

/// AFL keywords that cannot be used as bare names
const RESERVED: &[&str] = &["and", "or", "not", "null", "true", "false", "as", "array"];

/// Check that `name` is a legal AFL identifier.
///
/// Rules:
/// - 1 to 128 characters
/// - first character is an ASCII letter or `_`
/// - remaining characters are ASCII letters, digits or `_`
/// - not a reserved word
pub fn validate_identifier(name: &str) -> PipelineResult<()> {
    let invalid = |reason: &str| PipelineError::InvalidIdentifier {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let first = name.chars().next().ok_or_else(|| invalid("empty name"))?;

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("longer than 128 characters"));
    }

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid("must start with a letter or underscore"));
    }

    if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(invalid(&format!("illegal character {:?}", bad)));
    }

    if RESERVED.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(invalid("reserved word"));
    }

    Ok(())
}

/// Render a string as a single-quoted AFL literal.
///
/// Backslashes and single quotes are escaped; control characters are dropped.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars().filter(|c| !c.is_control()) {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("interimV3_gt").is_ok());
        assert!(validate_identifier("_tmp").is_ok());
        assert!(validate_identifier("chrom").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("3prime").is_err());
        assert!(validate_identifier("x;remove(y)").is_err());
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("NULL").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("CHB"), "'CHB'");
        assert_eq!(quote_literal("O'Neil"), "'O\\'Neil'");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
        assert_eq!(quote_literal("line\nbreak"), "'linebreak'"); // \n dropped
    }
}
