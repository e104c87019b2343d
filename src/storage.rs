use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, error, warn};
use rustc_serialize::json::{self, Json, ParserError, ToJson};
use thiserror::Error;

use crate::model::{self, Post};

/// Durable home of the post collection.
///
/// Implementations never fail from the caller's point of view: a collection
/// that cannot be read comes back empty and a write that cannot be completed
/// is logged and dropped.
pub trait Storage: Send + Sync {
    fn load(&self) -> Vec<Post>;
    fn save(&self, posts: &[Post]);
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON: {0}")]
    Parse(#[from] ParserError),
    #[error("malformed document: {0}")]
    Malformed(&'static str),
}

/// The whole collection as a single JSON array in one file.
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> JsonFile {
        JsonFile { path: path.into() }
    }

    fn read(&self) -> Result<Vec<Post>, StorageError> {
        let text = fs::read_to_string(&self.path)?;
        if !model::within_depth(&text, model::MAX_JSON_DEPTH) {
            return Err(StorageError::Malformed("nested too deeply"));
        }
        let document = Json::from_str(&text)?;
        let items = document
            .as_array()
            .ok_or(StorageError::Malformed("top level is not an array"))?;

        let posts = items
            .iter()
            .map(|item| Post::from_json(item).ok_or(StorageError::Malformed("invalid post entry")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for post in &posts {
            if post.id == 0 {
                return Err(StorageError::Malformed("post id must be positive"));
            }
            if !seen.insert(post.id) {
                return Err(StorageError::Malformed("duplicate post id"));
            }
        }
        Ok(posts)
    }

    fn write(&self, posts: &[Post]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = Json::Array(posts.iter().map(ToJson::to_json).collect());
        let text = json::as_pretty_json(&document).to_string();

        // Replace the document in one step so readers never see half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for JsonFile {
    fn load(&self) -> Vec<Post> {
        match self.read() {
            Ok(posts) => {
                debug!("loaded {} posts from {}", posts.len(), self.path.display());
                posts
            }
            Err(StorageError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, starting empty", self.path.display());
                Vec::new()
            }
            Err(e @ StorageError::Io(_)) => {
                error!("could not read {}: {}", self.path.display(), e);
                Vec::new()
            }
            Err(e) => {
                warn!("ignoring {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, posts: &[Post]) {
        if let Err(e) = self.write(posts) {
            error!("could not save posts to {}: {}", self.path.display(), e);
        }
    }
}
