// src/connection.rs
use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::{AccountBuilder, AccountFactory, WalletSigner};
use crate::bundler::BundlerClient;
use crate::error::AaResult;

struct Session {
    owner: Address,
    builder: Arc<dyn AccountBuilder>,
    sender: Option<Address>,
}

/// Owns the bundler client and the smart-account builder for the connected
/// signer. A builder is rebuilt only when a different signer shows up or the
/// session is invalidated.
pub struct ConnectionManager {
    factory: Arc<dyn AccountFactory>,
    use_cache: bool,
    client: Mutex<Option<Arc<dyn BundlerClient>>>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn AccountFactory>, use_cache: bool) -> Self {
        Self {
            factory,
            use_cache,
            client: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub async fn client(&self, signer: &WalletSigner) -> AaResult<Arc<dyn BundlerClient>> {
        signer.provider()?;
        let mut cached = self.client.lock().await;
        if self.use_cache {
            if let Some(client) = cached.as_ref() {
                return Ok(Arc::clone(client));
            }
        }
        let client = self.factory.create_client(signer).await?;
        if self.use_cache {
            *cached = Some(Arc::clone(&client));
        }
        Ok(client)
    }

    pub async fn builder(&self, signer: &WalletSigner) -> AaResult<Arc<dyn AccountBuilder>> {
        signer.provider()?;
        let mut session = self.session.lock().await;
        self.builder_locked(&mut session, signer).await
    }

    /// The smart-account address for `signer`, cached per session. The
    /// session lock is released while the address is resolved on chain.
    pub async fn wallet_address(&self, signer: &WalletSigner) -> AaResult<Address> {
        signer.provider()?;
        let owner = signer.address();
        let builder = {
            let mut session = self.session.lock().await;
            if self.use_cache {
                if let Some(Session {
                    owner: cached_owner,
                    sender: Some(sender),
                    ..
                }) = session.as_ref()
                {
                    if *cached_owner == owner {
                        return Ok(*sender);
                    }
                }
            }
            self.builder_locked(&mut session, signer).await?
        };

        let sender = builder.sender().await?;

        // Only record it if the session was not replaced in the meantime
        if let Some(current) = self.session.lock().await.as_mut() {
            if current.owner == owner && Arc::ptr_eq(&current.builder, &builder) {
                current.sender = Some(sender);
            }
        }
        Ok(sender)
    }

    async fn builder_locked(
        &self,
        session: &mut Option<Session>,
        signer: &WalletSigner,
    ) -> AaResult<Arc<dyn AccountBuilder>> {
        let owner = signer.address();
        if self.use_cache {
            match session.as_ref() {
                Some(current) if current.owner == owner => return Ok(Arc::clone(&current.builder)),
                Some(current) => info!("Signer changed from {:?} to {:?}, rebuilding", current.owner, owner),
                None => {}
            }
        }
        let builder = self.factory.create_builder(signer).await?;
        if self.use_cache {
            *session = Some(Session {
                owner,
                builder: Arc::clone(&builder),
                sender: None,
            });
        }
        Ok(builder)
    }

    /// Drop the session if it belongs to `owner`. Returns whether anything was
    /// evicted.
    pub async fn invalidate(&self, owner: Address) -> bool {
        let mut session = self.session.lock().await;
        if session.as_ref().map(|s| s.owner) == Some(owner) {
            debug!("Invalidating session for {:?}", owner);
            *session = None;
            return true;
        }
        false
    }

    /// Drop the session and the bundler client.
    pub async fn invalidate_all(&self) {
        *self.session.lock().await = None;
        *self.client.lock().await = None;
    }

    /// Owner of the cached session, if any.
    pub async fn current_owner(&self) -> Option<Address> {
        self.session.lock().await.as_ref().map(|s| s.owner)
    }
}
