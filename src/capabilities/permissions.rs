//! Permissions from configuration.

use std::sync::Mutex;

use crate::prelude::*;

use super::{Grants, PermissionGate};

/// Permissions decided up front, standing in for an OS permission prompt.
///
/// If `grant_on_request` is set, a request grants everything, as if the user
/// accepted every prompt. Otherwise requests change nothing, as if the user
/// declined.
#[derive(Debug)]
pub struct StaticPermissions {
    grants: Mutex<Grants>,
    grant_on_request: bool,
}

impl StaticPermissions {
    /// Create a new permission gate.
    pub fn new(initial: Grants, grant_on_request: bool) -> Self {
        Self {
            grants: Mutex::new(initial),
            grant_on_request,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Grants>> {
        self.grants
            .lock()
            .map_err(|_| anyhow!("permission state lock poisoned"))
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn check(&self) -> Result<Grants> {
        Ok(*self.lock()?)
    }

    #[instrument(level = "debug", skip_all)]
    async fn request(&self) -> Result<Grants> {
        let mut grants = self.lock()?;
        if self.grant_on_request {
            *grants = Grants::all();
        }
        debug!(?grants, "Permission request answered");
        Ok(*grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_grants_when_configured() {
        let gate = StaticPermissions::new(Grants::none(), true);
        assert_eq!(gate.check().await.unwrap(), Grants::none());
        assert_eq!(gate.request().await.unwrap(), Grants::all());
        assert_eq!(gate.check().await.unwrap(), Grants::all());
    }

    #[tokio::test]
    async fn test_denial_is_steady() {
        let initial = Grants {
            camera: true,
            storage: false,
        };
        let gate = StaticPermissions::new(initial, false);
        assert_eq!(gate.request().await.unwrap(), initial);
        assert_eq!(gate.request().await.unwrap(), initial);
    }
}
