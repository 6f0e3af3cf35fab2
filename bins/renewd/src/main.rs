use std::sync::Arc;

use anyhow::Context;
use renew_core::{cfg::{self, AppId}, logx, store};
use tracing::{info, warn};

mod module;
mod runner;
mod scheduler;
mod status;

use module::{Module, ModuleCtx};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"), // <- no literal; comes from crate name
};

fn main() -> anyhow::Result<()> {
    let cfg = cfg::load_or_init(&APP).context("config")?;
    logx::init(&cfg.log_level);

    let mut rt = if cfg!(feature = "rt-single") {
        tokio::runtime::Builder::new_current_thread()
    } else {
        tokio::runtime::Builder::new_multi_thread()
    };
    rt.enable_all().build()?.block_on(run(cfg))
}

async fn run(cfg: cfg::Config) -> anyhow::Result<()> {
    let data_dir = cfg::data_dir(&APP)?;
    let kv = store::open_default(&data_dir)?;
    info!("{} boot data_dir={}", APP.application, data_dir.display());
    info!("cfg service_url={} max_retries={} call_delay_ms={}", cfg.service_url, cfg.max_retries, cfg.call_delay_ms());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ctx = ModuleCtx { kv, cfg: Arc::new(cfg), shutdown: shutdown_rx };

    let mut modules: Vec<Box<dyn Module>> = vec![Box::new(scheduler::Scheduler::new(ctx.cfg.tick_ms))];
    match ctx.cfg.status_addr.as_deref() {
        #[cfg(feature = "web-api")]
        Some(addr) => modules.push(Box::new(status::StatusServer::new(addr.parse().context("status_addr")?))),
        #[cfg(not(feature = "web-api"))]
        Some(addr) => warn!("status_addr={addr} ignored: built without web-api"),
        None => {}
    }

    let mut handles = Vec::new();
    for m in modules {
        info!("starting module {}", m.name());
        handles.push((m.name(), m.spawn(ctx.clone())));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for (name, h) in handles {
        match h.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("module {name} err={e:#}"),
            Err(e) => warn!("module {name} join err={e}"),
        }
    }
    Ok(())
}
