use std::sync::Arc;

use dotenvy::dotenv;
use log::{error, info};

use share_exchange::config::{ExchangeConfig, ServiceConfig};
use share_exchange::services::event_publisher::spawn_event_forwarder;
use share_exchange::services::redis_manager::RedisManager;
use share_exchange::services::request_consumer::start_request_consumer;
use share_exchange::Exchange;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let exchange_config = ExchangeConfig::from_env()?;
    let service_config = ServiceConfig::from_env()?;
    info!(
        "Exchange configured: lock_timeout={:?} reserve={} share_currency={} forecast_currency={}",
        exchange_config.lock_timeout,
        exchange_config.reserve_owner_id,
        exchange_config.share_currency,
        exchange_config.forecast_currency
    );

    let exchange = Arc::new(Exchange::new(exchange_config));

    let redis_manager = RedisManager::init_global(&service_config.redis_url)?;
    redis_manager.connect().await?;

    let _events = spawn_event_forwarder(exchange.events(), service_config.event_stream.clone());

    let Some(consumer) = start_request_consumer(exchange.clone(), service_config) else {
        return Err("request consumer failed to start".into());
    };
    info!("Exchange services ready");

    tokio::select! {
        result = consumer => {
            if let Err(e) = result {
                error!("Request consumer stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let report = exchange.audit();
    info!(
        "Final audit: entries={} clean={}",
        report.ledger_entries,
        report.is_clean()
    );
    Ok(())
}
