#[cfg(not(feature = "node"))]
fn main() {
    eprintln!("Build with --features node to enable the ledger node.");
}

#[cfg(feature = "node")]
fn main() {
    use oracle_ledger::Application;
    use oracle_ledger::config::AppConfig;
    use oracle_ledger::node::feed::FeedListener;
    use oracle_ledger::node::http::start_http_server;
    use oracle_ledger::node::storage::SnapshotStore;
    use oracle_ledger::oracle::OracleCache;
    use parking_lot::RwLock;
    use std::env;
    use std::sync::Arc;
    use std::thread;
    use tracing::info;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.json".to_string());
    if let Some(extra) = args.next() {
        eprintln!("unexpected arg {}", extra);
        return;
    }

    let cfg = AppConfig::load(&config_path).expect("load config");
    let oracle = OracleCache::new();
    let mut app = Application::from_config(&cfg, oracle.clone());

    let store = match &cfg.node.data_dir {
        Some(dir) => Some(Arc::new(SnapshotStore::new(dir).expect("open data dir"))),
        None => None,
    };
    if let Some(store) = &store
        && let Some(snapshot) = store.load().expect("read snapshot")
    {
        app.restore(snapshot).expect("restore snapshot");
    }

    let _feed = FeedListener::start(
        &cfg.node.feed_listen_addr,
        oracle,
        cfg.node.observation_retention_secs,
    )
    .expect("start feed listener");

    let shared = Arc::new(RwLock::new(app));
    start_http_server(&cfg.node.http_listen_addr, shared, store).expect("start http driver");

    info!(chain_id = %cfg.chain_id, config = %config_path, "node running");
    loop {
        thread::park();
    }
}
