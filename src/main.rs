#[macro_use]
extern crate log;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer};
use actix_web::web::Data;
use sqlx::postgres::PgPoolOptions;

use config::{Config, StoreConfig};
use db::{JsonFileStore, PollDb, PollStore};
use lifecycle::PollManager;
use notify::{DiscordNotifier, Notifier};
use operations::PollOperations;
use schedule::ClosureScheduler;

mod config;
mod db;
mod lifecycle;
mod model;
mod notify;
mod operations;
mod render;
mod schedule;
mod service;
mod tally;
mod util;
mod vote;

#[actix_web::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Refusing to start: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn PollStore> = match &config.store {
        StoreConfig::Postgres(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .expect("Failed to connect to the database.");
            info!("Storing polls in Postgres");
            Arc::new(PollDb::new(pool))
        }
        StoreConfig::File(path) => {
            info!("Storing polls in {}", path);
            Arc::new(JsonFileStore::new(path))
        }
    };
    let notifier: Arc<dyn Notifier> = Arc::new(
        DiscordNotifier::new(&config.bot_token, config.http_timeout)
            .expect("Failed to build HTTP client.")
    );

    let (scheduler, triggers) = ClosureScheduler::new();
    let mut manager = PollManager::new(store, notifier, config.lifecycle.clone(), scheduler);
    if let Err(e) = manager.reload().await {
        error!("Failed to restore polls, starting empty: {}", e);
    }
    let (ops, _manager) = PollOperations::spawn(manager, triggers);

    match (config.schedule, &config.lifecycle.default_channel) {
        (Some(schedule), Some(_)) => {
            operations::spawn_weekly_polls(ops.clone(), schedule);
        }
        (Some(_), None) => warn!("No default channel configured, scheduled polls are disabled"),
        (None, _) => info!("Scheduled polls are disabled"),
    }

    let app = move || {
        App::new()
            .app_data(Data::new(ops.clone()))
            .configure(service::config::<PollOperations>)
    };
    HttpServer::new(app).bind(config.bind.as_str())
        .expect("Failed to bind HTTP server.")
        .run()
        .await
        .expect("HTTP Server failed to run.");
}
