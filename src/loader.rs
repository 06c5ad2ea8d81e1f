//! Image loader with a per-session, memoizing cache.
//!
//! References are data URIs, `file://` URIs, bare paths, or remote URLs.
//! Remote fetching is delegated to a [`Fetch`] implementation supplied by
//! the caller.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::config::Configuration;
use crate::error::Error;
use crate::surface::Surface;

/// Retrieves the raw bytes behind a remote (`http`/`https`) reference.
///
/// Called from a blocking worker thread, so implementations may block.
pub trait Fetch: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, Error>;
}

/// Default fetcher: refuses every remote reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl Fetch for NoRemote {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, Error> {
        Err(Error::decode(reference, "no fetcher configured for remote images"))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Source<'a> {
    Data { base64: bool, payload: &'a str },
    File(&'a Path),
    Remote,
}

fn classify(reference: &str) -> Result<Source<'_>, Error> {
    if let Some(rest) = reference.strip_prefix("data:") {
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::decode(reference, "data URI has no payload separator"))?;
        return Ok(Source::Data {
            base64: meta.ends_with(";base64"),
            payload,
        });
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(Source::Remote);
    }
    let path = reference.strip_prefix("file://").unwrap_or(reference);
    if path.is_empty() {
        return Err(Error::decode(reference, "empty image reference"));
    }
    Ok(Source::File(Path::new(path)))
}

/// Resolve a reference to its encoded bytes. Blocking.
fn read_reference(reference: &str, fetcher: &dyn Fetch, max_bytes: usize) -> Result<Vec<u8>, Error> {
    let bytes = match classify(reference)? {
        Source::Data { base64: true, payload } => {
            // base64 expands by 4/3; reject before allocating the decoded buffer
            if payload.len() / 4 * 3 > max_bytes {
                return Err(Error::decode(reference, "data URI exceeds size limit"));
            }
            STANDARD
                .decode(payload.trim())
                .map_err(|e| Error::decode(reference, e))?
        }
        Source::Data { base64: false, payload } => payload.as_bytes().to_vec(),
        Source::File(path) => {
            let len = fs::metadata(path).map_err(|e| Error::decode(reference, e))?.len();
            if len > max_bytes as u64 {
                return Err(Error::decode(reference, "file exceeds size limit"));
            }
            fs::read(path).map_err(|e| Error::decode(reference, e))?
        }
        Source::Remote => fetcher.fetch(reference)?,
    };
    if bytes.len() > max_bytes {
        return Err(Error::decode(reference, "image exceeds size limit"));
    }
    Ok(bytes)
}

type Slot = Arc<OnceCell<Arc<Surface>>>;

/// Memoizing image loader scoped to one editing session.
///
/// Successful decodes are kept until [`ImageCache::clear`]. Concurrent
/// loads of the same reference share one decode; failures are not cached.
pub struct ImageCache {
    slots: Mutex<HashMap<String, Slot>>,
    fetcher: Arc<dyn Fetch>,
    decode_timeout: Duration,
    max_reference_bytes: usize,
}

impl ImageCache {
    pub fn new(cfg: &Configuration) -> Self {
        Self::with_fetcher(cfg, Arc::new(NoRemote))
    }

    pub fn with_fetcher(cfg: &Configuration, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            fetcher,
            decode_timeout: cfg.decode_timeout,
            max_reference_bytes: cfg.max_reference_bytes,
        }
    }

    fn slot(&self, reference: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(reference.to_owned()).or_default().clone()
    }

    /// Resolve `reference` to a decoded surface.
    ///
    /// A cache hit returns the same `Arc` without decoding again. When another
    /// caller is already decoding the same reference this waits for its result.
    pub async fn load(&self, reference: &str) -> Result<Arc<Surface>, Error> {
        let slot = self.slot(reference);
        if let Some(hit) = slot.get() {
            trace!(reference = %short(reference), "image cache hit");
            return Ok(hit.clone());
        }
        let res = slot.get_or_try_init(|| self.decode(reference)).await.cloned();
        if res.is_err() {
            self.forget_failed(reference, &slot);
        }
        res
    }

    /// Drop the slot a failed decode left behind, unless a later caller has
    /// already replaced or filled it.
    fn forget_failed(&self, reference: &str, slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slots.get(reference)
            && Arc::ptr_eq(current, slot)
            && !current.initialized()
        {
            slots.remove(reference);
        }
    }

    /// Number of references with a slot, including decodes still in flight.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn decode(&self, reference: &str) -> Result<Arc<Surface>, Error> {
        debug!(reference = %short(reference), "decoding image");
        let owned = reference.to_owned();
        let fetcher = self.fetcher.clone();
        let max_bytes = self.max_reference_bytes;
        let task = tokio::task::spawn_blocking(move || {
            let bytes = read_reference(&owned, fetcher.as_ref(), max_bytes)?;
            Surface::decode(&owned, &bytes)
        });
        match tokio::time::timeout(self.decode_timeout, task).await {
            Err(_) => Err(Error::decode(reference, "timed out")),
            Ok(Err(join)) => Err(Error::decode(reference, join)),
            Ok(Ok(res)) => res.map(Arc::new),
        }
    }

    /// Seed the cache with a surface the caller already holds, e.g. a freshly
    /// composed preview under its encoded reference. An existing entry wins.
    pub fn insert(&self, reference: impl Into<String>, surface: Surface) -> Arc<Surface> {
        let reference = reference.into();
        let slot = self.slot(&reference);
        let surface = Arc::new(surface);
        match slot.set(surface.clone()) {
            Ok(()) => surface,
            Err(_) => slot.get().cloned().unwrap_or(surface),
        }
    }

    /// Whether a decoded surface for `reference` is cached.
    pub fn contains(&self, reference: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(reference).is_some_and(|s| s.initialized())
    }

    /// Number of references with a completed decode.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached surface. Loads already in flight still complete for
    /// their callers but are not retained.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(entries = slots.len(), "clearing image cache");
        slots.clear();
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("entries", &self.len())
            .field("decode_timeout", &self.decode_timeout)
            .finish_non_exhaustive()
    }
}

fn short(reference: &str) -> &str {
    if reference.starts_with("data:") {
        reference.split_once(',').map_or(reference, |(meta, _)| meta)
    } else {
        reference
    }
}
