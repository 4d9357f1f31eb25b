use std::sync::Arc;

use actix_web::web;
use dotenvy::dotenv;
use storefront_checkout::config::AppConfig;
use storefront_checkout::infrastructure::order_repo::DieselOrderRepository;
use storefront_checkout::infrastructure::voucher_repo::DieselVoucherRepository;
use storefront_checkout::{build_server, create_pool, run_migrations, sweeper, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env().expect("invalid configuration");

    let pool = create_pool(&config.database_url).expect("Failed to create database pool");
    run_migrations(&pool).expect("Failed to run database migrations");

    let state = web::Data::new(AppState::new(
        Arc::new(DieselOrderRepository::new(pool.clone())),
        Arc::new(DieselVoucherRepository::new(pool)),
        config.gateway.clone(),
        config.checkout_result_url.clone(),
        config.callback_timeout,
    ));

    sweeper::spawn(
        state.clone(),
        config.sweep_interval,
        config.pending_payment_timeout,
    );

    log::info!("Starting server at http://{}:{}", config.host, config.port);

    build_server(state, &config.host, config.port)?.await
}
