use std::sync::Arc;
use std::time::Duration;

use haggle_agent::{build_generator, GenerationError, NegotiationAgent, ResponseGenerator};
use haggle_channels::provisioning::number_provider;
use haggle_channels::{
    email_sender, sms_sender, DispatchError, EmailSender, InboundIngestor, OutboundDispatcher,
    PhoneProvisioner, ProvisionError, SmsSender,
};
use haggle_core::config::{AppConfig, ConfigError, LoadOptions, ProvisioningConfig};
use haggle_core::pricing::BrandMarginTable;
use haggle_core::provisioning::{ProvisioningEngine, ProvisioningEngineConfig};
use haggle_db::{
    connect_with_config, migrations, BuyerRepository, DbPool, MessageRepository, OfferRepository,
    ProvisioningRepository, SqlBuyerRepository, SqlMessageRepository, SqlOfferRepository,
    SqlProvisioningRepository, SqlThreadRepository, ThreadRepository,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::worker::ProvisioningWorker;

const WAKEUP_BUFFER: usize = 16;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    pub worker: ProvisioningWorker,
    pub worker_wakeups: mpsc::Receiver<()>,
}

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: DbPool,
    pub buyers: Arc<dyn BuyerRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub provisioning: Arc<dyn ProvisioningRepository>,
    pub ingestor: Arc<InboundIngestor>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub agent: Arc<NegotiationAgent>,
    pub pricing: Arc<BrandMarginTable>,
    pub provisioning_engine: ProvisioningEngine,
    pub provisioning_wakeup: mpsc::Sender<()>,
}

/// Outbound integrations, swapped for fakes in tests.
pub struct Integrations {
    pub generator: Arc<dyn ResponseGenerator>,
    pub email: Arc<dyn EmailSender>,
    pub sms: Arc<dyn SmsSender>,
}

impl Integrations {
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        Ok(Self {
            generator: build_generator(&config.llm)?,
            email: email_sender(&config.email)?,
            sms: sms_sender(&config.sms)?,
        })
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: DbPool,
        integrations: Integrations,
        provisioning_wakeup: mpsc::Sender<()>,
    ) -> Self {
        let buyers: Arc<dyn BuyerRepository> = Arc::new(SqlBuyerRepository::new(db_pool.clone()));
        let threads: Arc<dyn ThreadRepository> =
            Arc::new(SqlThreadRepository::new(db_pool.clone()));
        let messages: Arc<dyn MessageRepository> =
            Arc::new(SqlMessageRepository::new(db_pool.clone()));

        let ingestor = InboundIngestor::new(buyers.clone(), messages.clone());
        let dispatcher = OutboundDispatcher::new(
            buyers.clone(),
            threads.clone(),
            messages.clone(),
            integrations.email,
            integrations.sms,
        );
        let agent = NegotiationAgent::new(
            integrations.generator,
            Duration::from_secs(config.llm.timeout_secs.max(1)),
        );

        Self {
            provisioning_engine: ProvisioningEngine::with_config(engine_config(&config.provisioning)),
            config: Arc::new(config),
            offers: Arc::new(SqlOfferRepository::new(db_pool.clone())),
            provisioning: Arc::new(SqlProvisioningRepository::new(db_pool.clone())),
            db_pool,
            buyers,
            threads,
            messages,
            ingestor: Arc::new(ingestor),
            dispatcher: Arc::new(dispatcher),
            agent: Arc::new(agent),
            pricing: Arc::new(BrandMarginTable::standard()),
            provisioning_wakeup,
        }
    }

    /// Nudges the worker; a full buffer already guarantees a pending drain.
    pub fn wake_provisioning(&self) {
        let _ = self.provisioning_wakeup.try_send(());
    }
}

pub fn engine_config(config: &ProvisioningConfig) -> ProvisioningEngineConfig {
    ProvisioningEngineConfig {
        default_max_retries: config.max_retries,
        retry_base_delay_seconds: i64::try_from(config.retry_base_delay_secs).unwrap_or(i64::MAX),
        ..ProvisioningEngineConfig::default()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("response generator setup failed: {0}")]
    Generator(#[from] GenerationError),
    #[error("outbound channel setup failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("number provider setup failed: {0}")]
    Provisioning(#[from] ProvisionError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let integrations = Integrations::from_config(&config)?;
    let provider = number_provider(&config.sms)?;
    info!(
        event_name = "system.bootstrap.integrations_ready",
        correlation_id = "bootstrap",
        llm_provider = integrations.generator.provider(),
        sms_configured = config.sms.has_credentials(),
        "outbound integrations initialized"
    );

    let (wakeup_tx, wakeup_rx) = mpsc::channel(WAKEUP_BUFFER);
    let state = AppState::new(config.clone(), db_pool.clone(), integrations, wakeup_tx);
    let worker = ProvisioningWorker::new(
        state.provisioning.clone(),
        PhoneProvisioner::new(
            state.buyers.clone(),
            provider,
            config.provisioning.default_area_code.clone(),
        ),
        engine_config(&config.provisioning),
        Duration::from_secs(config.provisioning.poll_interval_secs.max(1)),
    );

    Ok(Application { config, db_pool, state, worker, worker_wakeups: wakeup_rx })
}
