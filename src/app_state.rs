use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, workspace::Workspace};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub workspace: Arc<Workspace>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
