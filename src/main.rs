use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use classroom_quests::api::{self, AppState};
use classroom_quests::config::{CONFIG_ENV, Config};
use classroom_quests::coordinator::Coordinator;
use classroom_quests::db::Database;
use classroom_quests::quest::{ContentRegistry, LedgerRewards};

/// Progress is written back every this many tracking ticks
const SAVE_EVERY_TICKS: u64 = 300;

#[tokio::main]
async fn main() {
    let config = match Config::resolve(std::env::args().nth(1), std::env::var(CONFIG_ENV).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match config.log_filter.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log_filter '{}': {}", config.log_filter, e),
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(ContentRegistry::new(&config.data_dir));
    let content = match registry.load_all().await {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to load content: {}", e);
            return;
        }
    };

    let db = match Database::new(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database '{}': {}", config.database_url, e);
            return;
        }
    };

    let mut coordinator = Coordinator::with_settings(
        Arc::new(LedgerRewards::new(db.clone())),
        config.event_capacity,
        config.reward_timeout(),
    );
    coordinator.install(&content);

    match db.completed_quests().await {
        Ok(rows) => coordinator.restore_completed(rows.iter().map(|r| r.quest_id.as_str())),
        Err(e) => warn!("Failed to read completed quests: {}", e),
    }
    match db.load_progress().await {
        Ok(records) => {
            info!("Restoring progress for {} quests", records.len());
            coordinator.apply_progress(&records).await;
        }
        Err(e) => warn!("Failed to read quest progress: {}", e),
    }

    let state = AppState::new(coordinator, Some(db.clone()));

    // Reinstall content whenever the data directory changes (dev mode)
    #[cfg(debug_assertions)]
    {
        if config.hot_reload {
            match registry.start_file_watcher() {
                Ok(mut rx) => {
                    let reload_state = state.clone();
                    let reload_registry = Arc::clone(&registry);
                    tokio::spawn(async move {
                        use classroom_quests::quest::HotReloadEvent;
                        while let Some(event) = rx.recv().await {
                            match event {
                                HotReloadEvent::Reloaded(path) => {
                                    info!("Content hot-reload: {}", path);
                                    let content = reload_registry.snapshot().await;
                                    reload_state.coordinator.lock().await.install(&content);
                                }
                                HotReloadEvent::Error(e) => {
                                    error!("Content hot-reload error: {}", e);
                                }
                            }
                        }
                    });
                    info!("Content hot-reload enabled");
                }
                Err(e) => {
                    warn!("Failed to start content hot-reload: {}", e);
                }
            }
        }
    }

    // Spawn tracking tick loop, saving progress now and then
    let tick_state = state.clone();
    let tracking_interval = config.tracking_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tracking_interval);
        let mut ticks: u64 = 0;
        loop {
            interval.tick().await;
            ticks += 1;

            let records = {
                let mut coordinator = tick_state.coordinator.lock().await;
                coordinator.tick().await;
                if ticks % SAVE_EVERY_TICKS != 0 {
                    continue;
                }
                coordinator.progress_records()
            };

            let Some(db) = &tick_state.db else {
                continue;
            };
            for record in &records {
                if let Err(e) = db.save_progress(record).await {
                    warn!("Failed to save progress for '{}': {}", record.quest_id, e);
                }
            }
        }
    });

    let app = api::router(state.clone());

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address '{}': {}", config.bind_addr, e);
            return;
        }
    };
    info!("Classroom quest service listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    let shutdown_state = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await;
    if let Err(e) = served {
        error!("Server error: {}", e);
    }

    // Final save so a restart resumes where the session stopped
    let records = shutdown_state.coordinator.lock().await.progress_records();
    if let Some(db) = &shutdown_state.db {
        for record in &records {
            if let Err(e) = db.save_progress(record).await {
                warn!("Failed to save progress for '{}': {}", record.quest_id, e);
            }
        }
        info!("Saved progress for {} quests", records.len());
    }
}
