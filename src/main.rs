use actix_web::web::Data;
use actix_web::{App, HttpServer, middleware::Logger};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;

use bugtrack::cache::FileCache;
use bugtrack::config::Config;
use bugtrack::{db, handlers};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    env_logger::init();

    let config = Config::from_env();

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to DB");

    db::init(&pool)
        .await
        .expect("Failed to initialize database schema");
    db::seed(&pool, &config)
        .await
        .expect("Failed to seed default users");

    let cache = FileCache::new(&config.cache_dir).expect("Failed to initialize file cache");

    let bind_addr = config.bind_addr.clone();
    log::info!("Listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(cache.clone()))
            .wrap(Logger::default())
            .configure(handlers::config)
    })
    .bind(bind_addr)?
    .run()
    .await
}
