//! Wiring: config and keys in, a ready `HashHedgeEngine` over SQLite out.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use hashhedge_sdk::{
    ChainBackend, ContractEvent, ElectrumBackend, HashHedgeEngine, KeyRing, TransactionAssembler,
};
use hashhedge_store::HashHedgeStore;

use crate::config::OracleConfig;
use crate::error::AppError;

pub type Engine = HashHedgeEngine<HashHedgeStore>;

pub struct OracleApp {
    config: OracleConfig,
    engine: Engine,
    store: Arc<Mutex<HashHedgeStore>>,
    events: broadcast::Receiver<ContractEvent>,
}

impl OracleApp {
    /// Open the configured database and Electrum backend.
    pub fn open(config: OracleConfig, keys: KeyRing) -> Result<Self, AppError> {
        let db_path = config.database_path.to_string_lossy().into_owned();
        let store = HashHedgeStore::open(&db_path)?;
        let chain = Arc::new(ElectrumBackend::new(config.electrum_url()));
        log::info!(
            "app: {} network, database {}, electrum {}",
            config.network,
            db_path,
            config.electrum_url()
        );
        if config.network.is_mainnet() {
            log::warn!("app: running on mainnet, payouts move real funds");
        }
        Ok(Self::from_parts(config, keys, store, chain))
    }

    pub fn from_parts(
        config: OracleConfig,
        keys: KeyRing,
        store: HashHedgeStore,
        chain: Arc<dyn ChainBackend>,
    ) -> Self {
        let assembler = TransactionAssembler::new(keys, config.fee_policy(), config.network);
        let store = Arc::new(Mutex::new(store));
        let (engine, events) = HashHedgeEngine::new(
            assembler,
            store.clone(),
            chain,
            Arc::new(config.feed()),
            config.threshold,
        );
        Self {
            config,
            engine,
            store,
            events,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn with_store<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&mut HashHedgeStore) -> hashhedge_store::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = store
                .lock()
                .map_err(|_| AppError::Task("store mutex poisoned".into()))?;
            f(&mut guard).map_err(AppError::from)
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
    }

    /// Events published since the last call, each logged once.
    pub fn drain_events(&mut self) -> Vec<ContractEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    log::info!("event: {}", event.to_json());
                    out.push(event);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    log::warn!("event: dropped {n} events");
                }
                Err(_) => break,
            }
        }
        out
    }
}
