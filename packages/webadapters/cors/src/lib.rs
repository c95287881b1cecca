#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub use webadapters_http_models;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use webadapters_http_models::Method;

/// Either everything is allowed (`*`), or only the listed values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AllOrSome<T> {
    All,
    Some(T),
}

impl<T> Default for AllOrSome<T> {
    fn default() -> Self {
        Self::All
    }
}

impl<T> AllOrSome<T> {
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub const fn is_some(&self) -> bool {
        !self.is_all()
    }

    pub const fn as_ref(&self) -> Option<&T> {
        match *self {
            Self::All => None,
            Self::Some(ref t) => Some(t),
        }
    }
}

impl<T: PartialEq> AllOrSome<Vec<T>> {
    /// `All` allows anything; `Some` only what it lists.
    pub fn allows(&self, value: &T) -> bool {
        match self {
            Self::All => true,
            Self::Some(values) => values.contains(value),
        }
    }

    fn extend(&mut self, values: impl IntoIterator<Item = T>) {
        if let Self::Some(existing) = self {
            existing.extend(values);
        }
    }
}

/// A CORS policy. Starts out denying everything; each builder call widens it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Cors {
    pub allowed_origins: AllOrSome<Vec<String>>,
    pub allowed_methods: AllOrSome<Vec<Method>>,
    pub allowed_headers: AllOrSome<Vec<String>>,
    pub expose_headers: AllOrSome<Vec<String>>,
    pub supports_credentials: bool,
    pub max_age: Option<u32>,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            allowed_origins: AllOrSome::Some(vec![]),
            allowed_methods: AllOrSome::Some(vec![]),
            allowed_headers: AllOrSome::Some(vec![]),
            expose_headers: AllOrSome::Some(vec![]),
            supports_credentials: false,
            max_age: None,
        }
    }
}

impl Cors {
    /// Any origin, method and header, exposing every header.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
    }

    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.allowed_origins = AllOrSome::All;
        self
    }

    #[must_use]
    pub fn allow_origin<T: Into<String>>(self, origin: T) -> Self {
        self.allowed_origins([origin])
    }

    #[must_use]
    pub fn allowed_origins<T: Into<String>, I: IntoIterator<Item = T>>(
        mut self,
        origins: I,
    ) -> Self {
        self.allowed_origins
            .extend(origins.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn allow_any_method(mut self) -> Self {
        self.allowed_methods = AllOrSome::All;
        self
    }

    #[must_use]
    pub fn allow_method(self, method: Method) -> Self {
        self.allowed_methods([method])
    }

    #[must_use]
    pub fn allowed_methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.allowed_methods.extend(methods);
        self
    }

    #[must_use]
    pub fn allow_any_header(mut self) -> Self {
        self.allowed_headers = AllOrSome::All;
        self
    }

    #[must_use]
    pub fn allow_header<T: Into<String>>(self, header: T) -> Self {
        self.allowed_headers([header])
    }

    #[must_use]
    pub fn allowed_headers<T: Into<String>, I: IntoIterator<Item = T>>(
        mut self,
        headers: I,
    ) -> Self {
        self.allowed_headers
            .extend(headers.into_iter().map(|x| x.into().to_ascii_lowercase()));
        self
    }

    #[must_use]
    pub fn expose_any_header(mut self) -> Self {
        self.expose_headers = AllOrSome::All;
        self
    }

    #[must_use]
    pub fn expose_headers<T: Into<String>, I: IntoIterator<Item = T>>(
        mut self,
        headers: I,
    ) -> Self {
        self.expose_headers
            .extend(headers.into_iter().map(|x| x.into().to_ascii_lowercase()));
        self
    }

    #[must_use]
    pub const fn support_credentials(mut self) -> Self {
        self.supports_credentials = true;
        self
    }

    #[must_use]
    pub fn max_age(mut self, max_age: impl Into<Option<u32>>) -> Self {
        self.max_age = max_age.into();
        self
    }

    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        match &self.allowed_origins {
            AllOrSome::All => true,
            AllOrSome::Some(origins) => origins.iter().any(|x| x == origin),
        }
    }

    #[must_use]
    pub fn allows_method(&self, method: Method) -> bool {
        self.allowed_methods.allows(&method)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn all_or_some_variants() {
        assert!(AllOrSome::<()>::All.is_all());
        assert!(!AllOrSome::<()>::All.is_some());
        assert!(AllOrSome::Some(()).is_some());
        assert_eq!(AllOrSome::Some(3).as_ref(), Some(&3));
    }

    #[test_log::test]
    fn default_policy_denies_everything() {
        let cors = Cors::default();
        assert!(!cors.allows_origin("http://localhost:3000"));
        assert!(!cors.allows_method(Method::Get));
        assert!(!cors.supports_credentials);
    }

    #[test_log::test]
    fn builder_accumulates_listed_values() {
        let cors = Cors::default()
            .allow_origin("http://a.test")
            .allowed_origins(["http://b.test"])
            .allowed_methods([Method::Get, Method::Post])
            .allow_header("X-Request-Id")
            .max_age(600);

        assert!(cors.allows_origin("http://b.test"));
        assert!(!cors.allows_origin("http://c.test"));
        assert!(cors.allows_method(Method::Post));
        assert!(!cors.allows_method(Method::Delete));
        assert_eq!(
            cors.allowed_headers,
            AllOrSome::Some(vec!["x-request-id".to_string()])
        );
        assert_eq!(cors.max_age, Some(600));
    }

    #[test_log::test]
    fn listing_after_any_keeps_any() {
        let cors = Cors::default().allow_any_origin().allow_origin("http://a.test");
        assert_eq!(cors.allowed_origins, AllOrSome::All);
    }

    #[test_log::test]
    fn permissive_allows_everything() {
        let cors = Cors::permissive();
        assert!(cors.allows_origin("http://anything.test"));
        assert!(cors.allows_method(Method::Trace));
        assert!(cors.expose_headers.is_all());
    }
}
