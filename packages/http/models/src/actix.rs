use actix_web::http::{Method as ActixMethod, StatusCode as ActixStatusCode};

use crate::{Method, StatusCode, TryFromU16StatusCodeError};

impl From<Method> for ActixMethod {
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
#[error("Unsupported actix method {0}")]
pub struct TryFromActixMethodError(pub ActixMethod);

impl TryFrom<&ActixMethod> for Method {
    type Error = TryFromActixMethodError;

    fn try_from(value: &ActixMethod) -> Result<Self, Self::Error> {
        Ok(match *value {
            ActixMethod::GET => Self::Get,
            ActixMethod::POST => Self::Post,
            ActixMethod::PUT => Self::Put,
            ActixMethod::PATCH => Self::Patch,
            ActixMethod::DELETE => Self::Delete,
            ActixMethod::HEAD => Self::Head,
            ActixMethod::OPTIONS => Self::Options,
            ActixMethod::CONNECT => Self::Connect,
            ActixMethod::TRACE => Self::Trace,
            _ => return Err(TryFromActixMethodError(value.clone())),
        })
    }
}

impl From<StatusCode> for ActixStatusCode {
    fn from(value: StatusCode) -> Self {
        // Every modeled code is within 100..=999.
        Self::from_u16(value.as_u16()).unwrap_or(Self::INTERNAL_SERVER_ERROR)
    }
}

impl TryFrom<ActixStatusCode> for StatusCode {
    type Error = TryFromU16StatusCodeError;

    fn try_from(value: ActixStatusCode) -> Result<Self, Self::Error> {
        value.as_u16().try_into()
    }
}
