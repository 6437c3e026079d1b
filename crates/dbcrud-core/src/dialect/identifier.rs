//! Identifier validation and quoting shared across all dialects.

use dbcrud_common::{CrudError, Result};
use unicode_normalization::UnicodeNormalization;

/// Validates and normalizes one unqualified identifier segment (no dots).
///
/// Applies NFKC normalization before validation to neutralize Unicode
/// confusables, then checks length, character class, and the dialect's
/// reserved-catalog prefixes.
pub fn validate_identifier_part(
    name: &str,
    max_len: usize,
    reserved_prefixes: &[&str],
) -> Result<String> {
    if name.is_empty() {
        return Err(CrudError::Validation("identifier part cannot be empty".into()));
    }

    let name = name.nfkc().collect::<String>();

    if name.len() > max_len {
        return Err(CrudError::Validation(format!(
            "identifier '{name}' exceeds maximum length of {max_len}"
        )));
    }

    let first_char = name
        .chars()
        .next()
        .ok_or_else(|| CrudError::Validation(format!("identifier '{name}' is empty")))?;
    if !first_char.is_alphabetic() && first_char != '_' {
        return Err(CrudError::Validation(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }

    for ch in name.chars() {
        if !ch.is_alphanumeric() && ch != '_' {
            return Err(CrudError::Validation(format!(
                "identifier '{name}' contains invalid character '{ch}'"
            )));
        }
    }

    let lower = name.to_lowercase();
    for prefix in reserved_prefixes {
        if lower.starts_with(prefix) {
            return Err(CrudError::Validation(format!(
                "identifier '{name}' reaches into a reserved catalog namespace ('{prefix}')"
            )));
        }
    }

    Ok(name)
}

/// Validates a (possibly schema-qualified, `schema.table`) identifier, part by part.
pub fn validate_identifier(name: &str, max_len: usize, reserved_prefixes: &[&str]) -> Result<()> {
    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 2 {
            return Err(CrudError::Validation(format!(
                "schema-qualified identifier '{name}' must be in the form 'schema.table'"
            )));
        }
        for part in parts {
            validate_identifier_part(part, max_len, reserved_prefixes)?;
        }
        Ok(())
    } else {
        validate_identifier_part(name, max_len, reserved_prefixes)?;
        Ok(())
    }
}

/// Wraps an identifier in the given quote pair, quoting each dot-separated part.
pub fn wrap_with_quotes(name: &str, open: char, close: char) -> String {
    if name.contains('.') {
        name.split('.')
            .map(|part| format!("{open}{part}{close}"))
            .collect::<Vec<_>>()
            .join(".")
    } else {
        format!("{open}{name}{close}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(validate_identifier_part("", 63, &[]).is_err());
        let long = "a".repeat(64);
        assert!(validate_identifier_part(&long, 63, &[]).is_err());
    }

    #[test]
    fn rejects_reserved_prefix() {
        assert!(validate_identifier_part("pg_class", 63, &["pg_"]).is_err());
        assert!(validate_identifier_part("information_schema", 63, &["information_schema"]).is_err());
    }

    #[test]
    fn accepts_plain_identifier() {
        assert_eq!(validate_identifier_part("users", 63, &["pg_"]).unwrap(), "users");
    }

    #[test]
    fn schema_qualified_round_trip() {
        validate_identifier("public.users", 63, &["pg_"]).unwrap();
        assert!(validate_identifier("a.b.c", 63, &[]).is_err());
    }

    #[test]
    fn wraps_schema_qualified_name() {
        assert_eq!(wrap_with_quotes("public.users", '"', '"'), "\"public\".\"users\"");
        assert_eq!(wrap_with_quotes("users", '"', '"'), "\"users\"");
    }
}
