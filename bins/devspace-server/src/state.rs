// Shared server state handed to every route
use crate::config::ServerConfig;
use crate::filetree::OpenDirs;
use crate::files::FileSync;
use crate::handler::ProtocolHandler;
use crate::registry::SessionRegistry;
use crate::sandbox::SandboxController;
use crate::workspace::WorkspaceStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: WorkspaceStore,
    pub files: FileSync,
    pub registry: Arc<SessionRegistry>,
    pub sandbox: Arc<SandboxController>,
    pub protocol: Arc<ProtocolHandler>,
    pub open_dirs: Arc<OpenDirs>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: WorkspaceStore, sandbox: SandboxController, config: ServerConfig) -> Self {
        let files = FileSync::new(store.clone());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        let sandbox = Arc::new(sandbox);
        let protocol = Arc::new(ProtocolHandler::new(
            files.clone(),
            Arc::clone(&sandbox),
            Arc::clone(&registry),
        ));
        Self {
            store,
            files,
            registry,
            sandbox,
            protocol,
            open_dirs: Arc::new(OpenDirs::new()),
            config: Arc::new(config),
        }
    }
}
