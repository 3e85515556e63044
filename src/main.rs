#![feature(proc_macro_hygiene, decl_macro)]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate rocket_contrib;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate lazy_static;
extern crate dotenv;

mod api;
mod db;
mod item;
mod schema;
mod tokens;
mod user;
mod validation;


use db::DB_LOCK;
use dotenv::dotenv;
use rocket::Rocket;
use rocket::config::{Config, Environment, Value};
use rocket::fairing::AdHoc;
use std::collections::HashMap;
use std::env;

embed_migrations!();

#[database("db")]
pub struct DbConn(db::StoreConnection);

fn db_path() -> String {
    env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set")
}

fn db_config() -> HashMap<&'static str, Value> {
    let mut database_config = HashMap::new();
    let mut databases = HashMap::new();

    database_config.insert("url", Value::from(db_path()));
    databases.insert("db", Value::from(database_config));

    databases
}

fn get_environment() -> Environment {
    let v = env::var("STOCKROOM_ENV").unwrap_or_else(|_| "development".to_string());

    if v == "development" {
        Environment::Development
    } else {
        Environment::Production
    }
}

fn build_config() -> Config {
    let mut builder = Config::build(get_environment())
        .extra("databases", db_config());

    if let Ok(address) = env::var("STOCKROOM_ADDRESS") {
        builder = builder.address(address);
    }

    if let Some(port) = env::var("STOCKROOM_PORT").ok().and_then(|p| p.parse().ok()) {
        builder = builder.port(port);
    }

    builder.finalize()
        .expect("Invalid server configuration")
}

fn run_db_migrations(rocket: Rocket) -> Result<Rocket, Rocket> {
    let db = match DbConn::get_one(&rocket) {
        Some(db) => db,
        None => {
            tracing::error!("could not connect to database at {}", db_path());
            return Err(rocket);
        }
    };
    match embedded_migrations::run(&**db) {
        Ok(()) => Ok(rocket),
        Err(e) => {
            // We should not do anything if database failed to migrate
            tracing::error!("failed to run database migrations: {:?}", e);
            Err(rocket)
        }
    }
}

pub fn build_rocket() -> Rocket {
    let cors = rocket_cors::CorsOptions::default()
        .to_cors()
        .expect("Invalid CORS options");

    rocket::custom(build_config())
        .attach(DbConn::fairing())
        .attach(AdHoc::on_attach("Database Migrations", run_db_migrations))
        .attach(cors)
        .mount("/", api::routes())
        .register(api::catchers())
}

fn main() {
    dotenv().ok();
    let err = build_rocket().launch();
    tracing::error!("server stopped: {}", err);
}
