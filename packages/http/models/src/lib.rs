#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! HTTP method and status code types shared by every web adapter backend.
//!
//! The types here carry no framework dependency of their own. Conversions to
//! the native types of each wrapped framework live behind the `actix` and
//! `http` features.

#[cfg(feature = "actix")]
pub mod actix;
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, AsRefStr, EnumIter,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

macro_rules! status_codes {
    ($($variant:ident = $code:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, AsRefStr)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
        pub enum StatusCode {
            $($variant,)+
        }

        impl From<StatusCode> for u16 {
            fn from(value: StatusCode) -> Self {
                match value {
                    $(StatusCode::$variant => $code,)+
                }
            }
        }

        impl TryFrom<u16> for StatusCode {
            type Error = TryFromU16StatusCodeError;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                Ok(match value {
                    $($code => Self::$variant,)+
                    _ => return Err(TryFromU16StatusCodeError(value)),
                })
            }
        }
    };
}

status_codes! {
    Continue = 100,
    SwitchingProtocols = 101,
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,
    PartialContent = 206,
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    TemporaryRedirect = 307,
    PermanentRedirect = 308,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    RequestTimeout = 408,
    Conflict = 409,
    Gone = 410,
    PreconditionFailed = 412,
    ContentTooLarge = 413,
    UnsupportedMediaType = 415,
    ImATeapot = 418,
    UnprocessableEntity = 422,
    TooManyRequests = 429,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported HTTP status code {0}")]
pub struct TryFromU16StatusCodeError(pub u16);

impl StatusCode {
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        (*self).into()
    }

    /// # Errors
    ///
    /// * If the `u16` is not a status code known to this crate
    pub fn try_from_u16(value: u16) -> Result<Self, TryFromU16StatusCodeError> {
        value.try_into()
    }

    /// Like [`StatusCode::try_from_u16`], but falls back to
    /// `InternalServerError` for codes this crate does not model.
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        value.try_into().unwrap_or(Self::InternalServerError)
    }
}

impl StatusCode {
    /// Check if status is within 100-199.
    #[inline]
    #[must_use]
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// Check if status is within 200-299.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Check if status is within 300-399.
    #[inline]
    #[must_use]
    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.as_u16())
    }

    /// Check if status is within 400-499.
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    /// Check if status is within 500-599.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.as_ref())
    }
}
