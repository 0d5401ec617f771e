//! Single-use bearer credentials.
//!
//! A credential authorizes exactly one privileged operation against one wallet. The raw token
//! is handed to the caller once; storage only ever sees its lease id, the HMAC-SHA256 of the
//! token keyed with a custodian-wide [`TokenSalt`], so tokens cannot be recovered from storage.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use btc_custodian_db::Storage;
use hmac::{Hmac, Mac};
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::{
    errors::{CustodianError, CustodianResult},
    keys::{WalletKind, SALT_KEY},
    records::{CredentialRecord, RecordError, VersionedRecord},
};

/// Size of the token salt, in bytes.
pub const SALT_LEN: usize = 32;

/// Length of a hex-encoded lease id.
const LEASE_ID_HEX_LEN: usize = 64;

type HmacSha256 = Hmac<Sha256>;

/// Secret key turning tokens into lease ids.
///
/// Created once per storage and reused on every start, so lease ids issued before a restart
/// still resolve.
#[derive(Clone)]
pub struct TokenSalt([u8; SALT_LEN]);

impl fmt::Debug for TokenSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSalt([redacted])")
    }
}

impl Drop for TokenSalt {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl TokenSalt {
    /// Loads the salt from `storage`, generating and persisting one if there is none yet.
    pub async fn load_or_init<S: Storage>(storage: &S) -> CustodianResult<Self> {
        if let Some(stored) = storage.get(SALT_KEY).await? {
            return Self::from_stored(&stored);
        }

        let mut salt = [0u8; SALT_LEN];
        thread_rng().fill_bytes(&mut salt);
        let candidate = Self(salt);
        salt.zeroize();

        if storage
            .compare_and_swap(SALT_KEY, None, Some(candidate.0.to_vec()))
            .await?
        {
            info!("initialized token salt");
            return Ok(candidate);
        }

        // Another instance initialized it first.
        match storage.get(SALT_KEY).await? {
            Some(stored) => Self::from_stored(&stored),
            None => Err(RecordError::InvalidSaltLength(0).into()),
        }
    }

    fn from_stored(stored: &[u8]) -> CustodianResult<Self> {
        let salt: [u8; SALT_LEN] = stored
            .try_into()
            .map_err(|_| RecordError::InvalidSaltLength(stored.len()))?;
        Ok(Self(salt))
    }

    /// Hex-encoded `HMAC-SHA256(salt, token)`.
    pub fn lease_id(&self, token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).expect("HMAC can take a key of any size");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Handle of an issued credential, sufficient to revoke it but not to use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Kind of the wallet the credential was issued for.
    pub kind: WalletKind,
    /// Salted digest of the token.
    pub lease_id: String,
}

/// A freshly issued credential. The token is not retrievable afterwards.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCredential {
    /// Bearer token to present for the next privileged operation.
    pub token: String,
    /// Revocation handle.
    pub lease: Lease,
    /// Time the token stays valid for.
    pub ttl: Duration,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("lease", &self.lease)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// A credential that passed validation and awaits its claim.
#[derive(Debug)]
pub struct ValidCredential {
    key: String,
    stored: Vec<u8>,
    record: CredentialRecord,
}

impl ValidCredential {
    /// The validated record.
    pub const fn record(&self) -> &CredentialRecord {
        &self.record
    }
}

/// A credential reserved for one in-flight operation. Settled by [`Credentials::consume`] or
/// [`Credentials::release`].
#[derive(Debug)]
pub struct ClaimedCredential {
    key: String,
    unclaimed: Vec<u8>,
    claimed: Vec<u8>,
    record: CredentialRecord,
}

/// Issues, validates, claims, consumes and revokes credentials.
#[derive(Debug)]
pub struct Credentials<S> {
    storage: Arc<S>,
    salt: TokenSalt,
    ttl: Duration,
}

impl<S: Storage> Credentials<S> {
    /// Creates a lifecycle over `storage` with an already loaded `salt`.
    pub const fn new(storage: Arc<S>, salt: TokenSalt, ttl: Duration) -> Self {
        Self { storage, salt, ttl }
    }

    /// Issues a credential for wallet `name` of `kind`. The caller checks the wallet exists.
    pub async fn issue(&self, kind: WalletKind, name: &str) -> CustodianResult<IssuedCredential> {
        let token = Uuid::new_v4().to_string();
        let lease_id = self.salt.lease_id(&token);

        let issued_at_ms = now_millis();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let record = CredentialRecord {
            wallet_name: name.to_string(),
            lease_id: lease_id.clone(),
            issued_at_ms,
            expires_at_ms: issued_at_ms.saturating_add(ttl_ms),
            claimed: false,
        };

        let inserted = self
            .storage
            .compare_and_swap(
                &kind.credential_key(&lease_id),
                None,
                Some(record.to_bytes()?),
            )
            .await?;
        if !inserted {
            // Only reachable on a UUID collision.
            error!(%name, %kind, %lease_id, "lease id already in use");
            return Err(CustodianError::InvalidToken);
        }

        info!(%name, %kind, %lease_id, "issued credential");

        Ok(IssuedCredential {
            token,
            lease: Lease { kind, lease_id },
            ttl: self.ttl,
        })
    }

    /// Checks that `token` is live, unclaimed and bound to wallet `name` of `kind`.
    ///
    /// Unknown, expired, claimed and foreign tokens are indistinguishable to the caller. Expired
    /// credentials are deleted on sight.
    pub async fn validate(
        &self,
        kind: WalletKind,
        token: &str,
        name: &str,
    ) -> CustodianResult<ValidCredential> {
        if token.is_empty() {
            return Err(CustodianError::MissingToken);
        }

        let key = kind.credential_key(&self.salt.lease_id(token));
        let Some(stored) = self.storage.get(&key).await? else {
            warn!(%name, %kind, "rejected unknown token");
            return Err(CustodianError::InvalidToken);
        };
        let record = CredentialRecord::from_bytes(&stored)?;

        if record.wallet_name != name {
            warn!(%name, %kind, lease_id = %record.lease_id, "rejected token bound to another wallet");
            return Err(CustodianError::InvalidToken);
        }

        if record.is_expired(now_millis()) {
            warn!(%name, %kind, lease_id = %record.lease_id, "rejected expired token");
            self.storage
                .compare_and_swap(&key, Some(&stored), None)
                .await?;
            return Err(CustodianError::InvalidToken);
        }

        if record.claimed {
            warn!(%name, %kind, lease_id = %record.lease_id, "rejected token already in use");
            return Err(CustodianError::InvalidToken);
        }

        Ok(ValidCredential {
            key,
            stored,
            record,
        })
    }

    /// Reserves a validated credential before the operation it authorizes touches any state.
    ///
    /// Fails with [`CustodianError::InvalidToken`] if a concurrent request claimed it first.
    pub async fn claim(&self, credential: ValidCredential) -> CustodianResult<ClaimedCredential> {
        let ValidCredential {
            key,
            stored,
            mut record,
        } = credential;

        record.claimed = true;
        let claimed = record.to_bytes()?;

        if !self
            .storage
            .compare_and_swap(&key, Some(&stored), Some(claimed.clone()))
            .await?
        {
            warn!(lease_id = %record.lease_id, "credential claimed concurrently");
            return Err(CustodianError::InvalidToken);
        }

        debug!(lease_id = %record.lease_id, "claimed credential");

        Ok(ClaimedCredential {
            key,
            unclaimed: stored,
            claimed,
            record,
        })
    }

    /// Deletes a claimed credential once its operation succeeded.
    pub async fn consume(&self, credential: ClaimedCredential) -> CustodianResult<()> {
        let ClaimedCredential {
            key,
            claimed,
            record,
            ..
        } = credential;

        match self
            .storage
            .compare_and_swap(&key, Some(&claimed), None)
            .await
        {
            Ok(true) => {
                debug!(lease_id = %record.lease_id, "consumed credential");
                Ok(())
            }
            Ok(false) => {
                // Revoked or swept while the operation ran.
                debug!(lease_id = %record.lease_id, "claimed credential already gone");
                Ok(())
            }
            Err(source) => {
                error!(
                    lease_id = %record.lease_id,
                    wallet = %record.wallet_name,
                    %source,
                    "operation completed but its credential could not be revoked"
                );
                Err(CustodianError::RevocationFailed {
                    lease_id: record.lease_id,
                    source,
                })
            }
        }
    }

    /// Hands a claimed credential back after its operation failed, so the token stays usable.
    pub async fn release(&self, credential: ClaimedCredential) {
        let ClaimedCredential {
            key,
            unclaimed,
            claimed,
            record,
        } = credential;

        match self
            .storage
            .compare_and_swap(&key, Some(&claimed), Some(unclaimed))
            .await
        {
            Ok(true) => debug!(lease_id = %record.lease_id, "released credential"),
            Ok(false) => debug!(lease_id = %record.lease_id, "claimed credential already gone"),
            Err(err) => warn!(lease_id = %record.lease_id, %err, "could not release credential"),
        }
    }

    /// Revokes a credential by its lease. Revoking an unknown lease is a no-op.
    pub async fn revoke(&self, lease: &Lease) -> CustodianResult<()> {
        let well_formed = lease.lease_id.len() == LEASE_ID_HEX_LEN
            && lease.lease_id.chars().all(|c| c.is_ascii_hexdigit());
        if !well_formed {
            return Err(CustodianError::MissingInternalData);
        }

        self.storage
            .delete(&lease.kind.credential_key(&lease.lease_id))
            .await?;

        info!(kind = %lease.kind, lease_id = %lease.lease_id, "revoked credential");

        Ok(())
    }

    /// Deletes every expired credential and returns how many were removed.
    pub async fn sweep_expired(&self) -> CustodianResult<usize> {
        let now = now_millis();
        let mut removed = 0;

        // The standard prefix covers every kind.
        for key in self
            .storage
            .list(&WalletKind::Standard.credential_prefix())
            .await?
        {
            let Some(stored) = self.storage.get(&key).await? else {
                continue;
            };

            match CredentialRecord::from_bytes(&stored) {
                Ok(record) if record.is_expired(now) => {
                    if self
                        .storage
                        .compare_and_swap(&key, Some(&stored), None)
                        .await?
                    {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(%key, %err, "skipping unreadable credential"),
            }
        }

        if removed > 0 {
            info!(%removed, "swept expired credentials");
        }

        Ok(removed)
    }
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use btc_custodian_db::InMemoryStorage;

    use super::*;

    async fn credentials(ttl: Duration) -> (Arc<InMemoryStorage>, Credentials<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let salt = TokenSalt::load_or_init(storage.as_ref()).await.unwrap();
        (storage.clone(), Credentials::new(storage, salt, ttl))
    }

    #[tokio::test]
    async fn salt_is_created_once() {
        let storage = InMemoryStorage::new();

        let first = TokenSalt::load_or_init(&storage).await.unwrap();
        let second = TokenSalt::load_or_init(&storage).await.unwrap();

        assert_eq!(first.lease_id("token"), second.lease_id("token"));
        assert_eq!(storage.list(SALT_KEY).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_salt_is_rejected() {
        let storage = InMemoryStorage::new();
        storage.put(SALT_KEY, vec![1; 5]).await.unwrap();

        assert!(matches!(
            TokenSalt::load_or_init(&storage).await,
            Err(CustodianError::Record(RecordError::InvalidSaltLength(5)))
        ));
    }

    #[test]
    fn lease_ids_depend_on_salt() {
        let a = TokenSalt([1; SALT_LEN]);
        let b = TokenSalt([2; SALT_LEN]);

        let lease = a.lease_id("token");
        assert_eq!(lease.len(), LEASE_ID_HEX_LEN);
        assert_eq!(lease, a.lease_id("token"));
        assert_ne!(lease, b.lease_id("token"));
        assert_ne!(lease, a.lease_id("other"));
    }

    #[tokio::test]
    async fn issued_token_is_stored_salted() {
        let (storage, credentials) = credentials(Duration::from_secs(300)).await;

        let issued = credentials
            .issue(WalletKind::Segwit, "alice")
            .await
            .unwrap();
        assert_eq!(issued.ttl, Duration::from_secs(300));
        assert_eq!(issued.lease.kind, WalletKind::Segwit);

        let keys = storage
            .list(&WalletKind::Segwit.credential_prefix())
            .await
            .unwrap();
        assert_eq!(keys, vec![format!("creds/segwit/{}", issued.lease.lease_id)]);

        let stored = storage.get(&keys[0]).await.unwrap().unwrap();
        assert!(
            !String::from_utf8_lossy(&stored).contains(&issued.token),
            "raw token must never be persisted"
        );

        let record = CredentialRecord::from_bytes(&stored).unwrap();
        assert_eq!(record.expires_at_ms - record.issued_at_ms, 300_000);
        assert!(!record.claimed);
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (_, credentials) = credentials(Duration::from_secs(300)).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();

        let valid = credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .unwrap();
        assert_eq!(valid.record().wallet_name, "alice");
        let claimed = credentials.claim(valid).await.unwrap();
        credentials.consume(claimed).await.unwrap();

        assert!(matches!(
            credentials
                .validate(WalletKind::Standard, &issued.token, "alice")
                .await,
            Err(CustodianError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (_, credentials) = credentials(Duration::from_secs(300)).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();

        let first = credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .unwrap();
        let second = credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .unwrap();

        let winner = credentials.claim(first).await.unwrap();
        assert!(matches!(
            credentials.claim(second).await,
            Err(CustodianError::InvalidToken)
        ));
        credentials.consume(winner).await.unwrap();
    }

    #[tokio::test]
    async fn claimed_token_is_held_until_released() {
        let (_, credentials) = credentials(Duration::from_secs(300)).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();

        let valid = credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .unwrap();
        let claimed = credentials.claim(valid).await.unwrap();

        assert!(matches!(
            credentials
                .validate(WalletKind::Standard, &issued.token, "alice")
                .await,
            Err(CustodianError::InvalidToken)
        ));

        credentials.release(claimed).await;
        let valid = credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .expect("released token must be usable again");
        assert!(!valid.record().claimed);
    }

    #[tokio::test]
    async fn sub_second_ttl_is_honoured() {
        let (storage, credentials) = credentials(Duration::from_millis(900)).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();
        assert_eq!(issued.ttl, Duration::from_millis(900));

        let stored = storage
            .get(&WalletKind::Standard.credential_key(&issued.lease.lease_id))
            .await
            .unwrap()
            .unwrap();
        let record = CredentialRecord::from_bytes(&stored).unwrap();
        assert_eq!(record.expires_at_ms - record.issued_at_ms, 900);

        assert!(credentials
            .validate(WalletKind::Standard, &issued.token, "alice")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rejections_are_indistinguishable() {
        let (_, credentials) = credentials(Duration::from_secs(300)).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();

        let wrong_wallet = credentials
            .validate(WalletKind::Standard, &issued.token, "bob")
            .await
            .unwrap_err();
        let wrong_kind = credentials
            .validate(WalletKind::Segwit, &issued.token, "alice")
            .await
            .unwrap_err();
        let unknown = credentials
            .validate(WalletKind::Standard, "not-a-token", "alice")
            .await
            .unwrap_err();

        for err in [wrong_wallet, wrong_kind, unknown] {
            assert_eq!(err.to_string(), "invalid auth token");
        }

        assert!(matches!(
            credentials.validate(WalletKind::Standard, "", "alice").await,
            Err(CustodianError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected_and_deleted() {
        let (storage, credentials) = credentials(Duration::ZERO).await;
        let issued = credentials
            .issue(WalletKind::Standard, "alice")
            .await
            .unwrap();

        assert!(matches!(
            credentials
                .validate(WalletKind::Standard, &issued.token, "alice")
                .await,
            Err(CustodianError::InvalidToken)
        ));
        assert!(storage
            .get(&WalletKind::Standard.credential_key(&issued.lease.lease_id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let storage = Arc::new(InMemoryStorage::new());
        let salt = TokenSalt::load_or_init(storage.as_ref()).await.unwrap();
        let expired = Credentials::new(storage.clone(), salt.clone(), Duration::ZERO);
        let live = Credentials::new(storage.clone(), salt, Duration::from_secs(300));

        expired.issue(WalletKind::Standard, "a").await.unwrap();
        expired.issue(WalletKind::Multisig, "b").await.unwrap();
        expired.issue(WalletKind::Segwit, "c").await.unwrap();
        let kept = live.issue(WalletKind::Segwit, "d").await.unwrap();

        assert_eq!(live.sweep_expired().await.unwrap(), 3);
        assert_eq!(
            storage.list("creds/").await.unwrap(),
            vec![WalletKind::Segwit.credential_key(&kept.lease.lease_id)]
        );
        assert_eq!(live.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn revoke_validates_lease() {
        let (_, credentials) = credentials(Duration::from_secs(300)).await;
        let issued = credentials
            .issue(WalletKind::Multisig, "vault")
            .await
            .unwrap();

        let not_hex = "zz".repeat(32);
        for lease_id in ["", "abc", not_hex.as_str()] {
            let lease = Lease {
                kind: WalletKind::Multisig,
                lease_id: lease_id.to_string(),
            };
            assert!(matches!(
                credentials.revoke(&lease).await,
                Err(CustodianError::MissingInternalData)
            ));
        }

        credentials.revoke(&issued.lease).await.unwrap();
        assert!(matches!(
            credentials
                .validate(WalletKind::Multisig, &issued.token, "vault")
                .await,
            Err(CustodianError::InvalidToken)
        ));
    }
}
