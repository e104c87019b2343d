mod config;
mod database;
mod error;
mod handlers;
mod model;
mod server;
mod storage;

use std::process;

use clap::Parser;
use iron::Iron;
use log::{error, info};
use logger::Logger;

use crate::config::Config;
use crate::database::Database;
use crate::storage::JsonFile;

// RUST_LOG=debug blog_backend --data-file posts.json
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Config::parse();

    let database = Database::new(JsonFile::new(&config.data_file));
    if database.is_empty() {
        info!("no posts in {}, starting empty", config.data_file.display());
    } else {
        info!("serving {} posts from {}", database.len(), config.data_file.display());
    }

    let (logger_before, logger_after) = Logger::new(None);
    let mut chain = server::app(database);
    chain.link_before(logger_before); // Should be first!
    chain.link_after(logger_after); // Should be last!

    match Iron::new(chain).http(config.listen) {
        Ok(_) => info!("listening on http://{}", config.listen),
        Err(e) => {
            error!("could not bind {}: {}", config.listen, e);
            process::exit(1);
        }
    }
}
