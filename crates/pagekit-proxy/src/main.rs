//! PageKit proxy server entry point.

use pagekit_common::{init_logging, LogConfig};
use pagekit_proxy::{run, ProxyConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Route actix's log-based middleware through tracing.
    let _ = tracing_log::LogTracer::init();
    init_logging(LogConfig::default());

    let config = ProxyConfig::load_or_default();
    run(config).await
}
