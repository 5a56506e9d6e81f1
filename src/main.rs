use relay_hub::{init_logger, run_server, spawn_shutdown_listener, ServerConfig, Shutdown};

/// Entry point:
/// 1. Read the configuration from the environment.
/// 2. Set up logging.
/// 3. Build a Tokio runtime sized by `worker_threads`.
/// 4. Run the hub until Ctrl+C.
fn main() {
    let config = ServerConfig::from_env();
    let logger = init_logger("relay_hub", &config.logger);

    if let Err(e) = config.validate() {
        logger.error(&format!("Invalid configuration: {}", e));
        std::process::exit(2);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("relay-hub-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            logger.error(&format!("Failed to build Tokio runtime: {}", e));
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async {
        let shutdown = Shutdown::new();
        let listener = spawn_shutdown_listener(shutdown.clone(), logger.clone());
        let result = run_server(config, logger.clone(), shutdown).await;
        listener.abort();
        result
    });

    if let Err(e) = result {
        logger.error(&format!("Rust server error: {}", e));
        std::process::exit(1);
    }
    logger.info("👋 Server stopped.");
}
