use ::http::{Method as HttpMethod, StatusCode as HttpStatusCode};

use crate::{Method, StatusCode, TryFromU16StatusCodeError};

impl From<Method> for HttpMethod {
    fn from(value: Method) -> Self {
        match value {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
            Method::Head => Self::HEAD,
            Method::Options => Self::OPTIONS,
            Method::Connect => Self::CONNECT,
            Method::Trace => Self::TRACE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported http method {0}")]
pub struct TryFromHttpMethodError(pub HttpMethod);

impl TryFrom<&HttpMethod> for Method {
    type Error = TryFromHttpMethodError;

    fn try_from(value: &HttpMethod) -> Result<Self, Self::Error> {
        Ok(match *value {
            HttpMethod::GET => Self::Get,
            HttpMethod::POST => Self::Post,
            HttpMethod::PUT => Self::Put,
            HttpMethod::PATCH => Self::Patch,
            HttpMethod::DELETE => Self::Delete,
            HttpMethod::HEAD => Self::Head,
            HttpMethod::OPTIONS => Self::Options,
            HttpMethod::CONNECT => Self::Connect,
            HttpMethod::TRACE => Self::Trace,
            _ => return Err(TryFromHttpMethodError(value.clone())),
        })
    }
}

impl From<StatusCode> for HttpStatusCode {
    fn from(value: StatusCode) -> Self {
        // Every modeled code is within 100..=999.
        Self::from_u16(value.as_u16()).unwrap_or(Self::INTERNAL_SERVER_ERROR)
    }
}

impl TryFrom<HttpStatusCode> for StatusCode {
    type Error = TryFromU16StatusCodeError;

    fn try_from(value: HttpStatusCode) -> Result<Self, Self::Error> {
        value.as_u16().try_into()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn method_round_trips_through_http() {
        let native: HttpMethod = Method::Patch.into();
        assert_eq!(native, HttpMethod::PATCH);
        assert_eq!(Method::try_from(&native).unwrap(), Method::Patch);
    }

    #[test_log::test]
    fn extension_methods_are_rejected() {
        let native = HttpMethod::from_bytes(b"PURGE").unwrap();
        assert!(Method::try_from(&native).is_err());
    }

    #[test_log::test]
    fn status_code_maps_to_http() {
        let native: HttpStatusCode = StatusCode::MethodNotAllowed.into();
        assert_eq!(native, HttpStatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            StatusCode::try_from(HttpStatusCode::CREATED).unwrap(),
            StatusCode::Created
        );
    }
}
