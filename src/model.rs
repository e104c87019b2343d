use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Local;
use rustc_serialize::json::{Json, Object, ToJson};

use crate::error::PostError;

#[derive(Clone, Debug, PartialEq)]
pub struct Post {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub author: String,
    pub date: String,
}

impl Post {
    pub fn new(id: u64, title: &str, content: &str, author: &str, date: &str) -> Post {
        Post {
            id,
            title: title.to_string(),
            content: content.to_string(),
            author: author.to_string(),
            date: date.to_string(),
        }
    }

    /// Decode a stored post. Every key must be present with the right type.
    pub fn from_json(json: &Json) -> Option<Post> {
        let object = json.as_object()?;
        let text = |key: &str| object.get(key).and_then(|v| v.as_string()).map(str::to_string);

        Some(Post {
            id: object.get("id").and_then(Json::as_u64)?,
            title: text("title")?,
            content: text("content")?,
            author: text("author")?,
            date: text("date")?,
        })
    }

    fn field(&self, field: SortField) -> &str {
        match field {
            SortField::Id => "",
            SortField::Title => &self.title,
            SortField::Content => &self.content,
            SortField::Author => &self.author,
            SortField::Date => &self.date,
        }
    }

    fn compare(&self, other: &Post, field: SortField) -> Ordering {
        match field {
            SortField::Id => self.id.cmp(&other.id),
            _ => self
                .field(field)
                .to_lowercase()
                .cmp(&other.field(field).to_lowercase()),
        }
    }

    /// Overwrite every field the patch carries.
    pub fn apply(&mut self, patch: PostPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(author) = patch.author {
            self.author = author;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
    }
}

impl ToJson for Post {
    fn to_json(&self) -> Json {
        let mut object = BTreeMap::new();
        object.insert("id".to_string(), self.id.to_json());
        object.insert("title".to_string(), self.title.to_json());
        object.insert("content".to_string(), self.content.to_json());
        object.insert("author".to_string(), self.author.to_json());
        object.insert("date".to_string(), self.date.to_json());
        Json::Object(object)
    }
}

/// Today's local date as `YYYY-MM-DD`.
pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Deepest array/object nesting accepted from outside. The JSON parser
/// recurses once per level, so anything deeper could exhaust the stack.
pub const MAX_JSON_DEPTH: usize = 128;

/// True when `text` never opens more than `limit` arrays or objects at once.
/// Brackets inside string literals are not counted.
pub fn within_depth(text: &str, limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for byte in text.bytes() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                if depth > limit {
                    return false;
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    true
}

/// Loose truthiness of a JSON value: empty strings and containers,
/// zero, `false` and `null` are falsy.
pub fn is_truthy(value: &Json) -> bool {
    match *value {
        Json::String(ref s) => !s.is_empty(),
        Json::I64(n) => n != 0,
        Json::U64(n) => n != 0,
        Json::F64(n) => n != 0.0,
        Json::Boolean(b) => b,
        Json::Array(ref items) => !items.is_empty(),
        Json::Object(ref object) => !object.is_empty(),
        Json::Null => false,
    }
}

/// Body of a create request. Fields stay `None` unless they hold a non-empty string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewPost {
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
}

impl NewPost {
    pub fn from_json(json: &Json) -> NewPost {
        match json.as_object() {
            Some(object) => NewPost {
                title: truthy_string(object, "title"),
                content: truthy_string(object, "content"),
                author: truthy_string(object, "author"),
            },
            None => NewPost::default(),
        }
    }
}

/// Partial update. Only truthy string values survive decoding, so a
/// field can never be cleared through an update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
}

impl PostPatch {
    pub fn from_object(object: &Object) -> PostPatch {
        PostPatch {
            title: truthy_string(object, "title"),
            content: truthy_string(object, "content"),
            author: truthy_string(object, "author"),
            date: truthy_string(object, "date"),
        }
    }
}

fn truthy_string(object: &Object, key: &str) -> Option<String> {
    match object.get(key) {
        Some(value) if is_truthy(value) => value.as_string().map(str::to_string),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    Id,
    Title,
    Content,
    Author,
    Date,
}

impl FromStr for SortField {
    type Err = PostError;

    fn from_str(s: &str) -> Result<SortField, PostError> {
        match s {
            "id" => Ok(SortField::Id),
            "title" => Ok(SortField::Title),
            "content" => Ok(SortField::Content),
            "author" => Ok(SortField::Author),
            "date" => Ok(SortField::Date),
            other => Err(PostError::Validation(format!(
                "Invalid sort field '{}'. Use one of: id, title, content, author, date.",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Only the exact string `desc` reverses the order.
    pub fn parse(s: Option<&str>) -> Direction {
        match s {
            Some("desc") => Direction::Desc,
            _ => Direction::Asc,
        }
    }
}

/// Stable sort of `posts` by `field`. Descending keeps equal posts in
/// their original relative order.
pub fn sort_posts(posts: &mut [Post], field: SortField, direction: Direction) {
    match direction {
        Direction::Asc => posts.sort_by(|a, b| a.compare(b, field)),
        Direction::Desc => posts.sort_by(|a, b| b.compare(a, field)),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchFilters {
    pub title: String,
    pub content: String,
    pub author: String,
    pub date: String,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.content.is_empty()
            && self.author.is_empty()
            && self.date.is_empty()
    }

    /// True when any non-empty filter is a case-insensitive substring of its field.
    pub fn matches(&self, post: &Post) -> bool {
        let hit = |needle: &str, haystack: &str| {
            !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
        };

        hit(&self.title, &post.title)
            || hit(&self.content, &post.content)
            || hit(&self.author, &post.author)
            || hit(&self.date, &post.date)
    }
}
