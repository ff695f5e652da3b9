//! Request validation utilities.

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> crate::types::Result<()> {
    if s.is_empty() {
        return Err(crate::types::Error::policy_error(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Validate a kernel base ID: non-empty, and must not contain `:` (the
/// namespace/base separator), so `KernelId::compose` never produces an
/// ambiguous effective ID.
pub fn validate_kernel_base(base: &str) -> crate::types::Result<()> {
    validate_non_empty(base, "kernel id")?;
    if base.contains(':') {
        return Err(crate::types::Error::policy_error(
            "kernel id must not contain ':'",
        ));
    }
    Ok(())
}

/// Validate a namespace: may be empty (meaning "no namespace"), but if
/// present must not contain `:`.
pub fn validate_namespace(namespace: &str) -> crate::types::Result<()> {
    if namespace.contains(':') {
        return Err(crate::types::Error::policy_error(
            "namespace must not contain ':'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_base() {
        assert!(validate_kernel_base("").is_err());
    }

    #[test]
    fn rejects_colon_in_base() {
        assert!(validate_kernel_base("tenant:foo").is_err());
    }

    #[test]
    fn accepts_plain_base() {
        assert!(validate_kernel_base("foo").is_ok());
    }

    #[test]
    fn rejects_colon_in_namespace() {
        assert!(validate_namespace("tenant:a").is_err());
    }

    #[test]
    fn accepts_empty_namespace() {
        assert!(validate_namespace("").is_ok());
    }

    proptest::proptest! {
        #[test]
        fn any_base_containing_a_colon_is_rejected(prefix in "[a-zA-Z0-9]{0,8}", suffix in "[a-zA-Z0-9]{0,8}") {
            let base = format!("{}:{}", prefix, suffix);
            proptest::prop_assert!(validate_kernel_base(&base).is_err());
        }

        #[test]
        fn any_colon_free_non_empty_base_is_accepted(base in "[a-zA-Z0-9_-]{1,16}") {
            proptest::prop_assert!(validate_kernel_base(&base).is_ok());
        }
    }
}
