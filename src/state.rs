//! Shared handler state, built once at startup from [`AppConfig`].

use crate::{
    config::AppConfig,
    services::{
        sessions::SessionStore, signing::SignedUrlService, upload::UploadPipeline,
        version_store::VersionStore,
    },
};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: VersionStore,
    pub pipeline: UploadPipeline,
    pub signer: Arc<SignedUrlService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, config: AppConfig) -> Result<Self> {
        let store = VersionStore::new(db, config.storage_dir.clone());
        let sessions = Arc::new(SessionStore::new(config.session_ttl_secs));
        let pipeline = UploadPipeline::new(store.clone(), sessions);
        let signer = SignedUrlService::new(&config.signing_secret, &config.public_url)?;
        Ok(Self {
            store,
            pipeline,
            signer: Arc::new(signer),
            config: Arc::new(config),
        })
    }
}
