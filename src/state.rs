use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::store::{
    default_options, redis::RedisStore, unix_millis, AdminRecord, Store, StoreError,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let store = RedisStore::connect(&config.redis_url)
            .await
            .expect("Redis misconfigured!");

        Self::init(config, Arc::new(store))
            .await
            .expect("Store initialization failed!")
    }

    /// Seeds the option collection when empty, grants the bootstrap admin
    /// when configured and no admin exists yet.
    pub async fn init(config: Config, store: Arc<dyn Store>) -> Result<Arc<Self>, StoreError> {
        store.seed_options(&default_options()).await?;

        if let Some(uid) = &config.bootstrap_admin {
            if store.list_admins().await?.is_empty() {
                info!("Granting bootstrap admin to {uid}");
                store
                    .put_admin(AdminRecord {
                        uid: uid.clone(),
                        created_at: unix_millis(),
                        created_by: "bootstrap".to_string(),
                        email: None,
                    })
                    .await?;
            }
        }

        Ok(Arc::new(Self { config, store }))
    }
}
