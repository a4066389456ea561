use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mvquery_core::session::Session;
use tokio::sync::Mutex;

use crate::control_plane::ControlPlane;
use crate::error::SessionError;

/// Process-wide cache of the runtime session.
///
/// The lock is held across the control-plane lookup, so concurrent callers
/// that find the cache empty trigger a single lookup and then observe its
/// result. A failed lookup leaves the cache exactly as it was.
pub struct SessionResolver {
    control_plane: Arc<dyn ControlPlane>,
    cached: Mutex<Option<Session>>,
    lookups: AtomicU64,
}

impl SessionResolver {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            cached: Mutex::new(None),
            lookups: AtomicU64::new(0),
        }
    }

    /// Cached session, or a fresh one from the control plane.
    pub async fn resolve(&self) -> Result<Session, SessionError> {
        let mut cached = self.cached.lock().await;
        if let Some(session) = cached.as_ref() {
            tracing::debug!(instance_id = %session.instance_id, "session cache hit");
            return Ok(session.clone());
        }
        let session = self.lookup().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Forces a lookup and replaces the cached session on success.
    pub async fn refresh(&self) -> Result<Session, SessionError> {
        let mut cached = self.cached.lock().await;
        let session = self.lookup().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            tracing::info!("session cache invalidated");
        }
    }

    /// Number of control-plane lookups performed so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    async fn lookup(&self) -> Result<Session, SessionError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        tracing::info!("resolving runtime session via control plane");

        let descriptor = self
            .control_plane
            .project_descriptor()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "control plane lookup failed");
                SessionError::Lookup(err)
            })?;
        let session = Session::from_project_descriptor(&descriptor).map_err(|field| {
            tracing::warn!(field, "project descriptor is incomplete");
            SessionError::IncompleteDescriptor(field)
        })?;

        tracing::info!(
            host = %session.host,
            instance_id = %session.instance_id,
            "runtime session resolved"
        );
        Ok(session)
    }
}
