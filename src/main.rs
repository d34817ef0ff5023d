use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use pericope_lock::config::{Config, StorageType};
use pericope_lock::handlers;
use pericope_lock::service::LockService;
use pericope_lock::storage::memory::MemoryStore;
use pericope_lock::storage::redis::RedisStore;
use pericope_lock::storage::LockStore;
use pericope_lock::sweeper::{ExpirySweeper, SweeperHandle};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 加载配置
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, e));
    }
    info!(
        "Starting pericope-lock - storage: {:?}, lock_ttl: {}s, heartbeat_interval: {}s, sweep_interval: {}s",
        config.storage_type,
        config.lock_ttl_seconds,
        config.heartbeat_interval_seconds,
        config.sweep_interval_seconds
    );

    // 创建存储
    let (store, memory_store): (Arc<dyn LockStore>, Option<Arc<MemoryStore>>) =
        match config.storage_type {
            StorageType::Memory => {
                info!("Using memory storage");
                let mut memory_store = MemoryStore::new(config.lock_ttl());
                if config.memory_persist_enabled {
                    info!("Memory persistence enabled: {}", config.memory_persist_path);
                    info!("Persistence interval: {} seconds", config.memory_persist_interval);
                    memory_store = memory_store
                        .with_persistence(std::path::PathBuf::from(&config.memory_persist_path));

                    // 尝试从磁盘加载数据
                    match memory_store.load_from_disk().await {
                        Ok(count) if count > 0 => {
                            info!("Successfully restored {} locks from disk", count)
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Failed to load from disk: {}", e),
                    }
                } else {
                    info!("Memory persistence disabled");
                }
                let memory_store = Arc::new(memory_store);
                (memory_store.clone() as Arc<dyn LockStore>, Some(memory_store))
            }
            StorageType::Redis => {
                info!("Using Redis storage");
                let redis_url = config
                    .redis_url
                    .clone()
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
                let redis_store = RedisStore::new(
                    &redis_url,
                    config.redis_username.clone(),
                    config.redis_password.clone(),
                    config.redis_db,
                    config.lock_ttl(),
                )
                .await
                .map_err(|e| {
                    log::error!("Failed to connect to Redis: {:#}", e);
                    io::Error::new(io::ErrorKind::Other, e.to_string())
                })?;
                (Arc::new(redis_store) as Arc<dyn LockStore>, None)
            }
        };

    // 启动清理任务（Redis 依赖键过期，无需清理）
    let sweeper: Option<SweeperHandle> = match config.storage_type {
        StorageType::Memory => Some(ExpirySweeper::spawn(store.clone(), config.sweep_interval())),
        StorageType::Redis => None,
    };

    // 启动持久化任务
    let persist_store = memory_store.filter(|_| config.memory_persist_enabled);
    let persist_task = persist_store.clone().map(|memory_store| {
        let persist_interval = Duration::from_secs(config.memory_persist_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(persist_interval);
            loop {
                interval.tick().await;
                if let Err(e) = memory_store.persist_to_disk().await {
                    log::error!("[PERSISTENCE] Failed to persist to disk: {}", e);
                }
            }
        })
    });

    let service = web::Data::new(LockService::new(store, config.lock_settings()));

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Server starting on http://{}", bind_addr);
    info!("Swagger UI available at http://{}/swagger-ui/", bind_addr);

    // 启动 HTTP 服务
    let result = HttpServer::new(move || {
        let openapi = handlers::ApiDoc::openapi();

        App::new()
            .wrap(Logger::default())
            .app_data(service.clone())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await;

    info!("Server stopped, shutting down background tasks");
    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    if let Some(task) = persist_task {
        task.abort();
    }
    if let Some(memory_store) = persist_store {
        match memory_store.persist_to_disk().await {
            Ok(count) => info!("[PERSISTENCE] Final snapshot written with {} locks", count),
            Err(e) => log::error!("[PERSISTENCE] Failed to write final snapshot: {}", e),
        }
    }

    result
}
