use thiserror::Error;

/// Errores del dominio: validación de definiciones y de campos editables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("fields not editable: {}", .0.join(","))]
    FieldNotEditable(Vec<String>),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_not_editable_lists_fields() {
        let err = DomainError::FieldNotEditable(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "fields not editable: a,b");
    }

    #[test]
    fn invalid_definition_format() {
        let err = DomainError::InvalidDefinition("levels vacíos".into());
        assert_eq!(err.to_string(), "invalid definition: levels vacíos");
    }
}
