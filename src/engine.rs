//! The engine context every command runs against

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::services::config::EngineConfig;
use crate::services::git_cli::GitCli;
use crate::services::locks::KeyedLocks;
use crate::services::mirror_service::MirrorService;
use crate::services::project_state::ProjectState;
use crate::services::session_service::SessionService;
use crate::services::store::Store;

/// Shared state for one engine instance.
///
/// Mirror syncs are serialized per slug through `mirror_locks`; apply,
/// undo and publish are serialized per project root through
/// `project_locks`.
pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<Store>,
    pub git: GitCli,
    pub mirror_locks: KeyedLocks,
    pub project_locks: KeyedLocks,
    pub sessions: SessionService,
    pub project_state: ProjectState,
}

impl Engine {
    /// Open the engine over the database in `config.data_dir`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Store::open(&config.database_path())?;
        Ok(Self::with_store(config, store))
    }

    /// Load configuration from `config_dir` and open the engine.
    pub fn open(config_dir: &Path) -> Result<Self> {
        let config = EngineConfig::load(config_dir)?;
        tracing::info!("Opening engine with data dir {}", config.data_dir.display());
        Self::new(config)
    }

    /// Open with the platform config directory.
    pub fn open_default() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("patchdeck");
        Self::open(&config_dir)
    }

    pub fn with_store(config: EngineConfig, store: Store) -> Self {
        let store = Arc::new(store);
        let git = GitCli::new(config.git_binary.clone(), config.git_timeout());
        Self {
            sessions: SessionService::new(store.clone(), config.sessions_dir()),
            project_state: ProjectState::new(store.clone()),
            git,
            mirror_locks: KeyedLocks::new(),
            project_locks: KeyedLocks::new(),
            store,
            config,
        }
    }

    pub fn mirrors(&self) -> MirrorService<'_> {
        MirrorService::new(&self.git, &self.config, &self.mirror_locks)
    }
}
