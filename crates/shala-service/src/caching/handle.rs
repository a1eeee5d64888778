use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use super::{CacheContents, CacheError};

/// The magic bytes every PDF document starts with.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// A handle to a PDF payload held by the [`PdfCache`](super::PdfCache).
///
/// The payload is owned by the cache until the entry is evicted, invalidated or cleared, at
/// which point the cache releases it. Cloning a handle is cheap and all clones observe the
/// release: afterwards [`bytes`](Self::bytes) returns `None`.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    len: u64,
    payload: Mutex<Option<Bytes>>,
}

impl ResourceHandle {
    /// Wraps an assembled payload in a handle, validating that it is usable.
    ///
    /// `expected_len` is the total size announced by the fetcher, if any.
    pub(crate) fn materialize(
        payload: Bytes,
        expected_len: Option<u64>,
        verify_pdf_header: bool,
    ) -> CacheContents<Self> {
        if payload.is_empty() {
            return Err(CacheError::Decode("empty payload".into()));
        }
        if let Some(expected) = expected_len {
            if (payload.len() as u64) < expected {
                return Err(CacheError::Decode(format!(
                    "truncated payload: received {} of {expected} bytes",
                    payload.len()
                )));
            }
        }
        if verify_pdf_header && !payload.starts_with(PDF_MAGIC) {
            return Err(CacheError::Decode("missing PDF header".into()));
        }

        Ok(Self::new(payload))
    }

    fn new(payload: Bytes) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                len: payload.len() as u64,
                payload: Mutex::new(Some(payload)),
            }),
        }
    }

    /// The payload, or `None` once the cache has released it.
    pub fn bytes(&self) -> Option<Bytes> {
        self.lock().clone()
    }

    /// The size of the payload in bytes.
    ///
    /// This stays available after release, it is what the cache accounts for.
    pub fn len(&self) -> u64 {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Returns `true` if both handles refer to the same cached payload.
    pub fn same_payload(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Drops the payload. Releasing twice is a no-op.
    pub(crate) fn release(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Bytes>> {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("len", &self.inner.len)
            .field("released", &self.is_released())
            .finish()
    }
}
