//! Exception handlers: turn handler errors into responses, keyed either by
//! status code or by the concrete error type carried inside [`Error`].

use std::{any::TypeId, collections::BTreeMap, sync::Arc};

use crate::{Error, HttpRequest, HttpResponse, StatusCode};

pub type ExceptionHandler = Arc<dyn Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync>;

type ErrorMatcher = fn(&(dyn std::error::Error + Send + Sync + 'static)) -> bool;

/// A concrete error type, compared by [`TypeId`].
#[derive(Clone, Copy)]
pub struct ErrorType {
    type_id: TypeId,
    type_name: &'static str,
    matches: ErrorMatcher,
}

impl ErrorType {
    #[must_use]
    pub fn of<E: std::error::Error + 'static>() -> Self {
        fn matches<E: std::error::Error + 'static>(
            error: &(dyn std::error::Error + Send + Sync + 'static),
        ) -> bool {
            error.is::<E>()
        }

        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            matches: matches::<E>,
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ErrorType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ErrorType {}

impl std::fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKey {
    Status(StatusCode),
    Error(ErrorType),
}

impl ExceptionKey {
    #[must_use]
    pub fn error<E: std::error::Error + 'static>() -> Self {
        Self::Error(ErrorType::of::<E>())
    }
}

impl From<StatusCode> for ExceptionKey {
    fn from(value: StatusCode) -> Self {
        Self::Status(value)
    }
}

impl std::fmt::Display for ExceptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status {status}"),
            Self::Error(ty) => write!(f, "error {}", ty.type_name),
        }
    }
}

/// Registered exception handlers. A later registration for the same key
/// replaces the earlier one; error-type keys are consulted before status
/// keys.
#[derive(Clone, Default)]
pub struct ExceptionHandlers {
    typed: Vec<(ErrorType, ExceptionHandler)>,
    status: BTreeMap<StatusCode, ExceptionHandler>,
}

impl ExceptionHandlers {
    pub fn insert(&mut self, key: ExceptionKey, handler: ExceptionHandler) {
        match key {
            ExceptionKey::Status(status) => {
                if self.status.insert(status, handler).is_some() {
                    log::debug!("insert: replaced exception handler for {key}");
                }
            }
            ExceptionKey::Error(ty) => {
                if let Some(existing) = self.typed.iter_mut().find(|(x, _)| *x == ty) {
                    log::debug!("insert: replaced exception handler for {key}");
                    existing.1 = handler;
                } else {
                    self.typed.push((ty, handler));
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.typed.is_empty() && self.status.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.typed.len() + self.status.len()
    }

    #[must_use]
    pub fn find(&self, error: &Error) -> Option<&ExceptionHandler> {
        let source = error.source_error();
        self.typed
            .iter()
            .find(|(ty, _)| (ty.matches)(source))
            .map(|(_, handler)| handler)
            .or_else(|| self.status.get(&error.status_code()))
    }

    /// # Errors
    ///
    /// * Gives the error back if no handler claims it
    pub fn recover(&self, req: &HttpRequest, error: Error) -> Result<HttpResponse, Error> {
        match self.find(&error) {
            Some(handler) => {
                log::debug!("recover: handling {error} for {} {}", req.method(), req.path());
                Ok(handler(req, &error))
            }
            None => Err(error),
        }
    }
}

impl std::fmt::Debug for ExceptionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionHandlers")
            .field(
                "typed",
                &self.typed.iter().map(|(ty, _)| ty).collect::<Vec<_>>(),
            )
            .field("status", &self.status.keys().collect::<Vec<_>>())
            .finish()
    }
}
