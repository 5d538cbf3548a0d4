use tokio_util::sync::CancellationToken;

/// Authorization for one scheduling chain
///
/// Only the lifecycle manager revokes it. Revocation is final: a restarted
/// pipeline gets a fresh token, so a retired chain can never be
/// re-authorized.
#[derive(Debug, Clone, Default)]
pub struct LoopToken {
    inner: CancellationToken,
}

impl LoopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authorized(&self) -> bool {
        !self.inner.is_cancelled()
    }

    pub fn revoke(&self) {
        self.inner.cancel();
    }

    /// Resolves once the token has been revoked
    pub async fn revoked(&self) {
        self.inner.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_revoke_wakes_waiters() {
        let token = LoopToken::new();
        assert!(token.is_authorized());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.revoked().await })
        };

        token.revoke();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!token.is_authorized());

        // Idempotent
        token.revoke();
        assert!(!token.is_authorized());
    }
}
