// Módulos de la aplicación
mod api;
mod app_state;
mod chat;
mod config;
mod consolidation;
mod error;
mod export;
mod extract;
mod history;
mod llm;
mod models;
mod pdf;
mod pipeline;
mod storage;
mod workspace;

use crate::{
    app_state::AppState, extract::PdfTextExtractor, llm::LlmManager, storage::FileKvStore,
    workspace::Workspace,
};
use anyhow::{Context, Result};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Abrir el almacenamiento local y cargar el historial
    let kv = FileKvStore::open(&cfg.data_dir).context("Error abriendo el directorio de datos")?;
    info!("Almacenamiento local en {}", kv.root().display());

    // 4. Inicializar gestor de LLMs y el contexto de trabajo
    let llm_manager = LlmManager::from_config(&cfg);
    info!(
        "Modelos: {:?} análisis={} estrategia={}",
        cfg.llm_provider, cfg.llm_analysis_model, cfg.llm_strategy_model
    );
    let workspace = Arc::new(Workspace::new(
        Arc::new(kv),
        Arc::new(llm_manager),
        Arc::new(PdfTextExtractor),
    ));
    // El timestamp persistido no trae el análisis: si el historial está
    // completo se vuelve a pedir al arrancar.
    workspace.spawn_consolidation();

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        workspace,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
