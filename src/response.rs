use bytes::Bytes;
use http::HeaderMap;

/// Successful result of one unary call: an opaque payload plus any
/// metadata the transport surfaced alongside it.
#[derive(Clone, Debug, Default)]
pub struct UnaryResponse {
    payload: Bytes,
    metadata: HeaderMap,
}

impl UnaryResponse {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HeaderMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
