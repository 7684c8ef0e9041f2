//! Conjunto ordenado de nombres de campo (orden de declaración preservado).

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DomainError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet(IndexSet<String>);

impl FieldSet {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    /// Parsea una lista separada por comas (`"name,time,type"`). Ignora
    /// entradas vacías y duplicados.
    pub fn parse(list: &str) -> Self {
        list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Verifica que todas las `keys` pertenezcan al conjunto.
    ///
    /// # Errores
    /// `DomainError::FieldNotEditable` con las claves fuera del conjunto, en
    /// el orden en que llegaron.
    pub fn check_keys<'a, I>(&self, keys: I) -> Result<(), DomainError>
        where I: IntoIterator<Item = &'a str>
    {
        let rejected: Vec<String> = keys.into_iter()
                                        .filter(|k| !self.contains(k))
                                        .map(str::to_string)
                                        .collect();
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(DomainError::FieldNotEditable(rejected))
        }
    }
}

impl<S: Into<String>> FromIterator<S> for FieldSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(","))
    }
}
