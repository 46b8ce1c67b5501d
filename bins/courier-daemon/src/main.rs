mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use config::CourierConfig;
use courier_core::config::EngineConfig;
use courier_core::mailbox::InMemoryMailbox;
use courier_core::media::InMemoryBlobStore;
use courier_core::receipts::InMemoryReceiptChannel;
use courier_core::roster::InMemoryThreadDirectory;
use courier_core::store::{KeyProvider, MasterKey, StorageError};
use courier_core::Engine;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::LevelFilter;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct DaemonKey;

impl KeyProvider for DaemonKey {
    fn get_or_create_master_key(&self) -> Result<MasterKey, StorageError> {
        Ok(MasterKey::new([2u8; 32]))
    }

    fn get_master_key(&self) -> Result<MasterKey, StorageError> {
        Ok(MasterKey::new([2u8; 32]))
    }
}

#[derive(thiserror::Error, Debug)]
enum DaemonError {
    #[error("config")]
    Config,
    #[error("engine")]
    Engine,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let args: Vec<String> = std::env::args().collect();
    let mut path = PathBuf::from("courier.toml");
    let mut i = 1;
    while i + 1 < args.len() {
        if args[i] == "--config" {
            path = PathBuf::from(&args[i + 1]);
        }
        i += 1;
    }
    let cfg = config::load_config(&path).map_err(|_| DaemonError::Config)?;
    init_logging(&cfg);
    let engine = init_engine(&cfg).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = start_control_server(engine.clone(), cfg.control.port, shutdown_rx).await?;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let _ = ctrl_c.as_mut().await;
    let _ = shutdown_tx.send(());
    let _ = server.await;
    engine.shutdown();
    Ok(())
}

fn init_logging(cfg: &CourierConfig) {
    let level = match cfg.logging.level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

async fn init_engine(cfg: &CourierConfig) -> Result<Arc<Engine>, DaemonError> {
    let storage_path = cfg.data_dir.join("engine");
    let media_dir = cfg.data_dir.join("media");
    let namespace = format!("daemon-{}", cfg.identity.user_id);
    let engine_cfg = EngineConfig {
        storage_path: storage_path.to_str().unwrap_or(".courier").to_string(),
        namespace,
        media_dir: media_dir.to_str().unwrap_or(".courier/media").to_string(),
        user_id: cfg.identity.user_id.clone(),
        display_name: cfg.identity.display_name.clone(),
        enable_read_receipts: cfg.sync.read_receipts,
        allow_media: cfg.sync.media,
        poll_interval_ms: cfg.sync.poll_interval_ms,
    };
    Engine::init(
        engine_cfg,
        cfg.policy.clone(),
        Arc::new(DaemonKey),
        Arc::new(InMemoryMailbox::new()),
        Arc::new(InMemoryReceiptChannel::new()),
        Arc::new(InMemoryThreadDirectory::new()),
        Arc::new(InMemoryBlobStore::new()),
    )
    .await
    .map(Arc::new)
    .map_err(|_| DaemonError::Engine)
}

async fn start_control_server(
    engine: Arc<Engine>,
    port: u16,
    shutdown: oneshot::Receiver<()>,
) -> Result<JoinHandle<()>, DaemonError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(_) => {
            let handle = tokio::spawn(async move {
                let _ = shutdown.await;
            });
            return Ok(handle);
        }
    };
    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, _)) => {
                            let engine_clone = engine.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let engine = engine_clone.clone();
                                    async move { handle_request(engine, req).await }
                                });
                                let _ = http1::Builder::new().serve_connection(io, service).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    });
    Ok(handle)
}

async fn handle_request(
    engine: Arc<Engine>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match (req.method().as_str(), req.uri().path()) {
        ("GET", "/health") => Ok(Response::new(Full::from(
            serde_json::json!({"status":"ok"}).to_string(),
        ))),
        ("GET", "/stats") => match engine.stats().await {
            Ok(stats) => {
                let body = serde_json::json!({
                    "user_id": stats.user_id,
                    "chats": stats.chats,
                    "messages": stats.messages,
                    "pending_sends": stats.pending_sends
                });
                Ok(Response::new(Full::from(body.to_string())))
            }
            Err(_) => Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::from(Bytes::from_static(b"unavailable")))
                .unwrap()),
        },
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::from(Bytes::from_static(b"not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlConfig, IdentityConfig, LoggingConfig, SyncConfig};
    use courier_core::policy::Policy;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf.toml");
        let cfg = format!(
            r#"
data_dir = "{dir}"

[identity]
user_id = "alice"
display_name = "Alice"

[policy]
receipt_aggregation = "Any"
max_text_bytes = 1024
max_caption_bytes = 256
max_file_name_len = 32
max_media_bytes = 4096
journal_flush_batch = 8
max_journal_age_secs = 60
event_buffer = 16

[sync]
poll_interval_ms = 500

[logging]
level = "info"
"#,
            dir = dir.path().display()
        );
        std::fs::write(&path, cfg).unwrap();
        let loaded = config::load_config(&path).unwrap();
        assert_eq!(loaded.identity.user_id, "alice");
        assert_eq!(loaded.sync.poll_interval_ms, 500);
        assert!(loaded.sync.read_receipts);
        assert_eq!(loaded.control.port, 0);
        assert_eq!(loaded.policy.max_text_bytes, 1024);
    }

    #[tokio::test]
    async fn missing_config_is_an_io_error() {
        let err = config::load_config(std::path::Path::new("/nonexistent/courier.toml"))
            .err()
            .unwrap();
        assert!(matches!(err, config::ConfigError::Io));
    }

    #[tokio::test]
    async fn daemon_starts_and_stops() {
        let dir = tempdir().unwrap();
        let cfg = CourierConfig {
            data_dir: dir.path().to_path_buf(),
            identity: IdentityConfig {
                user_id: "alice".to_string(),
                display_name: None,
            },
            policy: Policy::default(),
            sync: SyncConfig::default(),
            control: ControlConfig::default(),
            logging: LoggingConfig {
                level: "error".to_string(),
            },
        };
        init_logging(&cfg);
        let engine = init_engine(&cfg).await.unwrap();
        let (tx, rx) = oneshot::channel();
        let handle = start_control_server(engine.clone(), 0, rx).await.unwrap();
        let _ = tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        engine.shutdown();
    }
}
