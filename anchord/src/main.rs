use std::path::PathBuf;
use std::sync::Arc;

use anchord::config::NodeConfig;
use anchord::database::{self, repositories::SqlxJobRepository};
use anchord::jobs::Manager;
use anchord::logging::{LoggingConfig, init_logging};
use anchord::node::{Node, Server};
use anchord::notification::WebhookSender;
use anchord::shutdown::install_shutdown_handler;
use anchord::tasks::JobStatusTask;
use task_queue::QueueServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = NodeConfig::from_env()?;

    let logging = init_logging(&LoggingConfig {
        log_dir: config.log_dir.as_ref().map(PathBuf::from),
        ..Default::default()
    })?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let repo = Arc::new(SqlxJobRepository::new(pool.clone()));
    let notifier = WebhookSender::new(config.webhook.clone())?;
    if !notifier.is_enabled() {
        tracing::info!("No webhook URL configured, job notifications are disabled");
    }
    let manager = Manager::new(config.jobs.clone(), repo, Arc::new(notifier));

    let queue = Arc::new(QueueServer::new(config.queue.clone()));
    queue
        .register_task_type(JobStatusTask::NAME, Arc::new(JobStatusTask::new(Arc::new(manager))))
        .await?;

    tracing::info!("anchord initialized successfully");

    let cancel = install_shutdown_handler();
    #[cfg(unix)]
    logging.reload_on_hangup(cancel.clone())?;
    let servers: Vec<Arc<dyn Server>> = vec![queue];
    Node::new(servers).run(cancel).await?;

    pool.close().await;
    tracing::info!("anchord stopped");

    Ok(())
}
