use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;
use once_cell::sync::OnceCell;

use crate::error::PostError;
use crate::model::{self, Direction, NewPost, Post, PostPatch, SearchFilters, SortField};
use crate::storage::Storage;

/// Take the read side of the cache. A poisoned lock still guards a whole
/// collection, so it is recovered instead of propagated.
macro_rules! read_lock {
    ( $e:expr ) => {
        $e.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    };
}

macro_rules! write_lock {
    ( $e:expr ) => {
        $e.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    };
}

/// The post collection: an in-memory cache over a `Storage` backend.
///
/// The backend is read once, on first access. Every mutation holds the write
/// lock until the full collection has been handed back to the backend, which
/// serializes writers and id assignment.
pub struct Database {
    storage: Box<dyn Storage>,
    posts: OnceCell<RwLock<Vec<Post>>>,
}

impl Database {
    pub fn new<S: Storage + 'static>(storage: S) -> Database {
        Database {
            storage: Box::new(storage),
            posts: OnceCell::new(),
        }
    }

    fn cache(&self) -> &RwLock<Vec<Post>> {
        self.posts.get_or_init(|| {
            let posts = self.storage.load();
            info!("post cache loaded with {} posts", posts.len());
            RwLock::new(posts)
        })
    }

    fn posts(&self) -> RwLockReadGuard<'_, Vec<Post>> {
        read_lock!(self.cache())
    }

    fn posts_mut(&self) -> RwLockWriteGuard<'_, Vec<Post>> {
        write_lock!(self.cache())
    }

    pub fn len(&self) -> usize {
        self.posts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fetch(&self, id: u64) -> Result<Post, PostError> {
        self.posts()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or(PostError::NotFound(id))
    }

    /// All posts, optionally sorted. An empty `sort` keeps insertion order.
    pub fn list(
        &self,
        sort: Option<&str>,
        direction: Option<&str>,
    ) -> Result<Vec<Post>, PostError> {
        let field = match sort {
            Some(name) if !name.is_empty() => Some(name.parse::<SortField>()?),
            _ => None,
        };

        let mut posts = self.posts().clone();
        if let Some(field) = field {
            model::sort_posts(&mut posts, field, Direction::parse(direction));
        }
        Ok(posts)
    }

    pub fn insert(&self, new_post: NewPost) -> Result<Post, PostError> {
        let (title, content, author) = match new_post {
            NewPost {
                title: Some(title),
                content: Some(content),
                author: Some(author),
            } => (title, content, author),
            _ => {
                return Err(PostError::Validation(
                    "Title, content and author are required.".to_string(),
                ))
            }
        };

        let mut posts = self.posts_mut();
        let id = posts
            .iter()
            .map(|post| post.id)
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(PostError::IdsExhausted)?;
        let post = Post::new(id, &title, &content, &author, &model::today());
        posts.push(post.clone());
        self.storage.save(&posts);

        info!("created post {}", id);
        Ok(post)
    }

    /// Apply `patch` to the post with `id`. `None` means the request carried no data.
    pub fn update(&self, id: u64, patch: Option<PostPatch>) -> Result<Post, PostError> {
        let mut posts = self.posts_mut();
        let post = posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or(PostError::NotFound(id))?;
        let patch = patch.ok_or_else(|| PostError::Validation("No data provided".to_string()))?;

        post.apply(patch);
        let updated = post.clone();
        self.storage.save(&posts);

        info!("updated post {}", id);
        Ok(updated)
    }

    pub fn delete(&self, id: u64) -> Result<(), PostError> {
        let mut posts = self.posts_mut();
        let index = posts
            .iter()
            .position(|post| post.id == id)
            .ok_or(PostError::NotFound(id))?;

        posts.remove(index);
        self.storage.save(&posts);

        info!("deleted post {}", id);
        Ok(())
    }

    pub fn search(&self, filters: &SearchFilters) -> Vec<Post> {
        let posts = self.posts();
        if filters.is_empty() {
            return posts.clone();
        }
        posts.iter().filter(|post| filters.matches(post)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonFile;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records every saved collection instead of touching the disk.
    #[derive(Clone, Default)]
    struct Memory {
        initial: Vec<Post>,
        saves: Arc<Mutex<Vec<Vec<Post>>>>,
        loads: Arc<Mutex<usize>>,
    }

    impl Storage for Memory {
        fn load(&self) -> Vec<Post> {
            *self.loads.lock().unwrap() += 1;
            self.initial.clone()
        }

        fn save(&self, posts: &[Post]) {
            self.saves.lock().unwrap().push(posts.to_vec());
        }
    }

    struct Broken;

    impl Storage for Broken {
        fn load(&self) -> Vec<Post> {
            Vec::new()
        }

        fn save(&self, _: &[Post]) {}
    }

    fn new_post(title: &str, content: &str, author: &str) -> NewPost {
        let field = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };
        NewPost {
            title: field(title),
            content: field(content),
            author: field(author),
        }
    }

    fn seeded() -> (Database, Memory) {
        let memory = Memory {
            initial: vec![
                Post::new(3, "banana", "yellow fruit", "Jane", "2024-01-02"),
                Post::new(1, "Apple", "red fruit", "john", "2024-01-01"),
                Post::new(7, "cherry", "small and RED", "Janet", "2024-01-03"),
            ],
            ..Memory::default()
        };
        (Database::new(memory.clone()), memory)
    }

    fn ids(posts: &[Post]) -> Vec<u64> {
        posts.iter().map(|post| post.id).collect()
    }

    #[test]
    fn loads_storage_once() {
        let (database, memory) = seeded();
        assert_eq!(*memory.loads.lock().unwrap(), 0);

        assert_eq!(database.len(), 3);
        database.fetch(1).unwrap();
        database.search(&SearchFilters::default());
        assert_eq!(*memory.loads.lock().unwrap(), 1);
    }

    #[test]
    fn insert_assigns_next_id_and_saves() {
        let (database, memory) = seeded();

        let post = database.insert(new_post("T", "C", "A")).unwrap();
        assert_eq!(post.id, 8);
        assert_eq!(post.date, model::today());
        assert_eq!(database.len(), 4);
        assert_eq!(database.fetch(8), Ok(post));

        let saves = memory.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(ids(&saves[0]), [3, 1, 7, 8]);
    }

    #[test]
    fn first_insert_gets_id_one() {
        let database = Database::new(Memory::default());
        assert!(database.is_empty());
        assert_eq!(database.insert(new_post("A", "B", "C")).unwrap().id, 1);
        assert_eq!(database.insert(new_post("D", "E", "F")).unwrap().id, 2);
    }

    #[test]
    fn insert_refuses_to_wrap_ids() {
        let memory = Memory {
            initial: vec![Post::new(u64::MAX, "last", "C", "A", "2024-01-01")],
            ..Memory::default()
        };
        let database = Database::new(memory.clone());

        assert_eq!(
            database.insert(new_post("T", "C", "A")),
            Err(PostError::IdsExhausted)
        );
        assert_eq!(ids(&database.list(None, None).unwrap()), [u64::MAX]);
        assert!(memory.saves.lock().unwrap().is_empty());

        // The lock is released cleanly, so later requests still work.
        assert_eq!(database.delete(u64::MAX), Ok(()));
        assert_eq!(database.insert(new_post("T", "C", "A")).unwrap().id, 1);
    }

    #[test]
    fn insert_requires_every_field() {
        let (database, memory) = seeded();
        for payload in vec![
            new_post("", "C", "A"),
            new_post("T", "", "A"),
            new_post("T", "C", ""),
            NewPost::default(),
        ] {
            assert!(matches!(database.insert(payload), Err(PostError::Validation(_))));
        }
        assert_eq!(database.len(), 3);
        assert!(memory.saves.lock().unwrap().is_empty());
    }

    #[test]
    fn fetch_unknown_id() {
        let (database, _) = seeded();
        assert_eq!(database.fetch(2), Err(PostError::NotFound(2)));
    }

    #[test]
    fn delete_removes_post() {
        let (database, memory) = seeded();
        let post = database.insert(new_post("T", "C", "A")).unwrap();

        database.delete(post.id).unwrap();
        assert_eq!(ids(&database.list(None, None).unwrap()), [3, 1, 7]);
        assert_eq!(memory.saves.lock().unwrap().len(), 2);
    }

    #[test]
    fn delete_unknown_id_changes_nothing() {
        let (database, memory) = seeded();
        assert_eq!(database.delete(42), Err(PostError::NotFound(42)));
        assert_eq!(database.len(), 3);
        assert!(memory.saves.lock().unwrap().is_empty());
    }

    #[test]
    fn update_overwrites_supplied_fields() {
        let (database, memory) = seeded();
        let patch = PostPatch {
            title: Some("Blueberry".to_string()),
            date: Some("1999-12-31".to_string()),
            ..PostPatch::default()
        };

        let post = database.update(3, Some(patch)).unwrap();
        assert_eq!(post, Post::new(3, "Blueberry", "yellow fruit", "Jane", "1999-12-31"));
        assert_eq!(database.fetch(3), Ok(post));
        assert_eq!(memory.saves.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_patch_returns_unchanged_post() {
        let (database, _) = seeded();
        let before = database.fetch(7).unwrap();
        assert_eq!(database.update(7, Some(PostPatch::default())), Ok(before));
    }

    #[test]
    fn update_checks_id_before_body() {
        let (database, memory) = seeded();
        assert_eq!(database.update(99, None), Err(PostError::NotFound(99)));
        assert!(matches!(database.update(1, None), Err(PostError::Validation(_))));
        assert!(memory.saves.lock().unwrap().is_empty());
    }

    #[test]
    fn list_keeps_cache_order_without_sort() {
        let (database, _) = seeded();
        assert_eq!(ids(&database.list(None, None).unwrap()), [3, 1, 7]);
        assert_eq!(ids(&database.list(Some(""), Some("desc")).unwrap()), [3, 1, 7]);
    }

    #[test]
    fn list_sorts_without_touching_cache() {
        let (database, _) = seeded();
        assert_eq!(ids(&database.list(Some("id"), None).unwrap()), [1, 3, 7]);
        assert_eq!(ids(&database.list(Some("id"), Some("desc")).unwrap()), [7, 3, 1]);
        assert_eq!(ids(&database.list(Some("title"), Some("desc")).unwrap()), [7, 3, 1]);
        assert_eq!(ids(&database.list(Some("author"), Some("asc")).unwrap()), [3, 7, 1]);
        assert_eq!(ids(&database.list(None, None).unwrap()), [3, 1, 7]);
    }

    #[test]
    fn list_rejects_unknown_sort_field() {
        let (database, _) = seeded();
        assert!(matches!(
            database.list(Some("likes"), None),
            Err(PostError::Validation(_))
        ));
    }

    #[test]
    fn search_is_or_across_fields() {
        let (database, _) = seeded();

        let by_author = SearchFilters {
            author: "jane".to_string(),
            ..SearchFilters::default()
        };
        assert_eq!(ids(&database.search(&by_author)), [3, 7]);

        let mixed = SearchFilters {
            content: "red".to_string(),
            title: "banana".to_string(),
            ..SearchFilters::default()
        };
        assert_eq!(ids(&database.search(&mixed)), [3, 1, 7]);

        let nothing = SearchFilters {
            title: "kiwi".to_string(),
            ..SearchFilters::default()
        };
        assert!(database.search(&nothing).is_empty());
    }

    #[test]
    fn search_without_filters_returns_everything() {
        let (database, _) = seeded();
        assert_eq!(ids(&database.search(&SearchFilters::default())), [3, 1, 7]);
    }

    #[test]
    fn failed_save_still_updates_cache() {
        let database = Database::new(Broken);
        let post = database.insert(new_post("A", "B", "C")).unwrap();
        assert_eq!(database.fetch(post.id), Ok(post));
    }

    #[test]
    fn writes_through_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posts.json");

        let database = Database::new(JsonFile::new(&path));
        database.insert(new_post("A", "B", "C")).unwrap();
        database.insert(new_post("D", "E", "F")).unwrap();
        database.delete(1).unwrap();

        let reopened = Database::new(JsonFile::new(&path));
        let posts = reopened.list(None, None).unwrap();
        assert_eq!(ids(&posts), [2]);
        assert_eq!(posts[0].title, "D");
    }

    #[test]
    fn concurrent_inserts_get_unique_ids() {
        let database = Arc::new(Database::new(Memory::default()));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let database = database.clone();
                std::thread::spawn(move || {
                    let title = format!("post {}", n);
                    database.insert(new_post(&title, "C", "A")).unwrap().id
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }
}
