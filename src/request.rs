use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::TetherResult;
use crate::error::RpcClientError;
use crate::method::{Idempotency, RpcMethod};

/// Immutable description of one unary call: the method, an opaque payload,
/// and call metadata. Captured once and replayed verbatim on every retry.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: RpcMethod,
    payload: Bytes,
    metadata: HeaderMap,
    idempotency: Idempotency,
}

impl RequestDescriptor {
    pub fn new(method: RpcMethod, payload: impl Into<Bytes>) -> Self {
        Self {
            method,
            payload: payload.into(),
            metadata: HeaderMap::new(),
            idempotency: method.idempotency(),
        }
    }

    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata_entry(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.metadata.insert(name, value);
        self
    }

    pub fn try_metadata_entry(self, name: &str, value: &str) -> TetherResult<Self> {
        let name: HeaderName =
            name.parse()
                .map_err(|source| RpcClientError::InvalidMetadataName {
                    name: name.to_owned(),
                    source,
                })?;
        let value: HeaderValue =
            value
                .parse()
                .map_err(|source| RpcClientError::InvalidMetadataValue {
                    name: name.as_str().to_owned(),
                    source,
                })?;
        Ok(self.metadata_entry(name, value))
    }

    /// Overrides the replay-safety classification derived from the method.
    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn method(&self) -> RpcMethod {
        self.method
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn idempotency(&self) -> Idempotency {
        self.idempotency
    }
}
