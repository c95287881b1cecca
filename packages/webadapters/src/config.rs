//! Server metadata and runtime settings.
//!
//! [`ServerConfig`] is everything that describes the API (title, contact,
//! docs URLs, ...). [`ServerSettings`] is everything that shapes how the
//! backend serves it (CORS, compression, workers, shutdown timeout).

use std::{collections::BTreeMap, time::Duration};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use webadapters_cors::Cors;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest request body read before answering `413 Content Too Large`.
pub const DEFAULT_MAX_BODY_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Contact {
    pub name: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct License {
    pub name: String,
    pub url: Option<String>,
}

impl License {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// An entry of the OpenAPI `servers` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerDescriptor {
    pub url: String,
    pub description: Option<String>,
}

impl ServerDescriptor {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TagInfo {
    pub name: String,
    pub description: Option<String>,
}

impl TagInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Docs settings. Every URL is `None` until set, so no docs route is served
/// by default.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DocsConfig {
    pub openapi_url: Option<String>,
    pub docs_url: Option<String>,
    pub redoc_url: Option<String>,
    pub openapi_tags: Vec<TagInfo>,
    pub swagger_ui_oauth2_redirect_url: Option<String>,
    pub swagger_ui_init_oauth: Option<serde_json::Value>,
    pub swagger_ui_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    pub title: String,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub version: String,
    pub contact: Option<Contact>,
    pub license: Option<License>,
    pub license_url: Option<String>,
    pub terms_of_service: Option<String>,
    pub servers: Vec<ServerDescriptor>,
    /// Path prefix applied to every route, groups included.
    pub prefix: String,
    /// Content type given to response bodies that do not set their own.
    pub media_type: Option<String>,
    pub docs: DocsConfig,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            title: "API".to_string(),
            description: None,
            summary: None,
            version: "0.1.0".to_string(),
            contact: None,
            license: None,
            license_url: None,
            terms_of_service: None,
            servers: vec![],
            prefix: String::new(),
            media_type: None,
            docs: DocsConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// The license to publish, with `license_url` filled in when the license
    /// itself carries no URL.
    #[must_use]
    pub fn effective_license(&self) -> Option<License> {
        self.license.clone().map(|license| match license.url {
            Some(_) => license,
            None => License {
                url: self.license_url.clone(),
                ..license
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerSettings {
    pub cors: Option<Cors>,
    pub compress: bool,
    pub workers: Option<usize>,
    pub shutdown_timeout: Duration,
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            cors: None,
            compress: false,
            workers: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn docs_are_opt_in() {
        let config = ServerConfig::default();
        assert_eq!(config.docs.openapi_url, None);
        assert_eq!(config.docs.docs_url, None);
        assert_eq!(config.docs.redoc_url, None);
    }

    #[test_log::test]
    fn body_limit_defaults_to_256_kib() {
        assert_eq!(ServerSettings::default().max_body_size, 262_144);
    }

    #[test_log::test]
    fn license_url_fills_in_missing_license_url() {
        let config = ServerConfig {
            license: Some(License::new("MPL-2.0")),
            license_url: Some("https://mozilla.org/MPL/2.0/".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(
            config.effective_license(),
            Some(License::new("MPL-2.0").with_url("https://mozilla.org/MPL/2.0/"))
        );
    }

    #[cfg(feature = "serde")]
    #[test_log::test]
    fn config_deserializes_with_defaults_for_missing_fields() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"title": "Demo", "docs": {"openapi_url": "/openapi.json"}}"#)
                .unwrap();
        assert_eq!(config.title, "Demo");
        assert_eq!(config.version, "0.1.0");
        assert_eq!(config.docs.openapi_url.as_deref(), Some("/openapi.json"));
    }
}
