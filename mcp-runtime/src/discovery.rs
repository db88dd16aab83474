use std::sync::Arc;

use datum_core::kind::{self, ApiGroupResources, ResolveError, ResolvedKind};
use tokio::sync::Mutex;

use crate::control_plane::ControlPlane;
use crate::error::EngineError;

/// Lazily populated discovery snapshot for one session.
///
/// The snapshot is fetched on first lookup and kept until a kind cannot be
/// found, at which point it is refreshed once so freshly installed CRDs
/// resolve without restarting the process.
#[derive(Default)]
pub struct DiscoveryCache {
    snapshot: Mutex<Option<Arc<Vec<ApiGroupResources>>>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn group_resources(
        &self,
        control_plane: &dyn ControlPlane,
    ) -> Result<Arc<Vec<ApiGroupResources>>, EngineError> {
        let (groups, _) = self.load(control_plane, false).await?;
        Ok(groups)
    }

    /// Returns the snapshot and whether this call fetched it.
    async fn load(
        &self,
        control_plane: &dyn ControlPlane,
        refresh: bool,
    ) -> Result<(Arc<Vec<ApiGroupResources>>, bool), EngineError> {
        let mut snapshot = self.snapshot.lock().await;
        if !refresh {
            if let Some(groups) = snapshot.as_ref() {
                return Ok((Arc::clone(groups), false));
            }
        }
        let groups = Arc::new(control_plane.discover().await?);
        tracing::debug!(
            endpoint = control_plane.endpoint(),
            groups = groups.len(),
            "discovery snapshot loaded"
        );
        *snapshot = Some(Arc::clone(&groups));
        Ok((groups, true))
    }

    pub async fn resolve(
        &self,
        control_plane: &dyn ControlPlane,
        kind: &str,
        api_version: Option<&str>,
    ) -> Result<ResolvedKind, EngineError> {
        let (groups, fresh) = self.load(control_plane, false).await?;
        match kind::resolve(&groups, kind, api_version) {
            Err(ResolveError::NotFound { .. }) if !fresh => {
                tracing::debug!(kind, "kind missing from cached discovery, refreshing");
                let (groups, _) = self.load(control_plane, true).await?;
                Ok(kind::resolve(&groups, kind, api_version)?)
            }
            other => Ok(other?),
        }
    }
}
