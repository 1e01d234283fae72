use crate::{
    errors::{ConnectionError, ProtocolStateError},
    server::Exchange,
};
use std::future::Future;
use thiserror::Error;

pub type ServiceResult = Result<(), ServiceError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Returned by the default trait methods: no handler registered for the
    /// method. The dispatcher answers with `501 Not Implemented`.
    #[error("method not implemented")]
    NotImplemented,
    #[error(transparent)]
    State(#[from] ProtocolStateError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("service failure: {0}")]
    Failed(String),
}

impl ServiceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// One ICAP service: a callback per ICAP method, invoked with the exchange
/// for the current transaction.
///
/// A handler must produce exactly one response before returning, either
/// through the full [`Exchange`] sequence (`set_status`/`set_header`/
/// `send_headers`/`write_body_chunk`/`finish`) or with
/// [`Exchange::no_adaptation_required`]. Methods left at their defaults are
/// reported to clients as `501 Not Implemented`.
///
/// The value is cloned once per accepted connection; registration therefore
/// happens once at startup and is never mutated afterwards.
pub trait IcapService: Clone + Send + 'static {
    fn handle_options(
        &mut self,
        _xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async { Err(ServiceError::NotImplemented) }
    }

    fn handle_reqmod(
        &mut self,
        _xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async { Err(ServiceError::NotImplemented) }
    }

    fn handle_respmod(
        &mut self,
        _xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async { Err(ServiceError::NotImplemented) }
    }
}
