use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// JSON API for a small collection of blog posts.
#[derive(Parser, Debug, Clone)]
#[command(name = "blog_backend", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "BLOG_LISTEN", default_value = "0.0.0.0:5002")]
    pub listen: SocketAddr,

    /// JSON document holding the posts. Created on the first write.
    #[arg(long, env = "BLOG_DATA_FILE", default_value = "data/posts.json")]
    pub data_file: PathBuf,
}
