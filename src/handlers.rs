use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;

use iron::headers::{AccessControlAllowMethods, AccessControlAllowOrigin, ContentType};
use iron::method::Method;
use iron::status::{self, Status};
use iron::{AfterMiddleware, Handler, IronError, IronResult, Request, Response};
use log::{debug, warn};
use router::{NoRoute, Router};
use rustc_serialize::json::{Json, ToJson};
use url::form_urlencoded;

use crate::database::Database;
use crate::error::PostError;
use crate::model::{self, NewPost, PostPatch, SearchFilters};

const SWAGGER_DOCUMENT: &str = include_str!("../static/swagger.json");

/// Match a `Result` into its inner value or
/// return `500 Internal Server Error` with a JSON error body.
macro_rules! try_handler {
    ( $e:expr ) => {
        match $e {
            Ok(x) => x,
            Err(e) => return error_response(status::InternalServerError, &e.to_string()),
        }
    };
}

/// Get the value of a parameter in the URI.
/// If the parameter was absent, return `400 Bad Request`.
/// If we could not obtain the parameter list, return `500 Internal Server Error`.
macro_rules! get_http_param {
    ( $r:expr, $e:expr ) => {
        match $r.extensions.get::<Router>() {
            Some(router) => match router.find($e) {
                Some(val) => val.to_string(),
                None => return error_response(status::BadRequest, "Missing path parameter"),
            },
            None => return error_response(status::InternalServerError, "Router unavailable"),
        }
    };
}

/// Build an object from key/value pairs.
fn object(pairs: Vec<(&str, Json)>) -> Json {
    let map: BTreeMap<String, Json> = pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    Json::Object(map)
}

fn json_response(status: Status, value: &Json) -> IronResult<Response> {
    Ok(Response::with((status, value.to_string())))
}

fn error_response(status: Status, message: &str) -> IronResult<Response> {
    json_response(status, &object(vec![("error", message.to_json())]))
}

fn post_error(err: &PostError) -> IronResult<Response> {
    match *err {
        PostError::NotFound(id) => debug!("no post with id {}", id),
        PostError::InvalidId(ref raw) => debug!("{:?} is not a post id", raw),
        _ => {}
    }
    error_response(err.status(), &err.to_string())
}

/// Decoded query string. The first occurrence of a key wins.
fn query_params(req: &Request) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = req.url.query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()).into_owned() {
            params.entry(key).or_insert(value);
        }
    }
    params
}

/// Largest request body read; anything longer is rejected unparsed.
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// The request body as JSON, or `None` when it is empty or unparsable.
fn json_body(req: &mut Request) -> Result<Option<Json>, std::io::Error> {
    let mut payload = Vec::new();
    req.body
        .by_ref()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut payload)?;

    if payload.len() as u64 > MAX_BODY_BYTES {
        warn!("rejecting request body over {} bytes", MAX_BODY_BYTES);
        return Ok(None);
    }
    Ok(decode_body(&payload))
}

fn decode_body(payload: &[u8]) -> Option<Json> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            warn!("rejecting request body: {}", e);
            return None;
        }
    };

    if text.trim().is_empty() {
        return None;
    }
    if !model::within_depth(text, model::MAX_JSON_DEPTH) {
        warn!("rejecting request body nested deeper than {}", model::MAX_JSON_DEPTH);
        return None;
    }
    match Json::from_str(text) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("rejecting request body: {}", e);
            None
        }
    }
}

/// A path id that is not a number can never name a post.
fn post_id(raw: &str) -> Result<u64, PostError> {
    raw.parse::<u64>().map_err(|_| PostError::InvalidId(raw.to_string()))
}

pub struct Handlers {
    pub list: ListPostsHandler,
    pub create: CreatePostHandler,
    pub update: UpdatePostHandler,
    pub delete: DeletePostHandler,
    pub search: SearchPostsHandler,
}

impl Handlers {
    pub fn new(database: Database) -> Handlers {
        let database = Arc::new(database);
        Handlers {
            list: ListPostsHandler::new(database.clone()),
            create: CreatePostHandler::new(database.clone()),
            update: UpdatePostHandler::new(database.clone()),
            delete: DeletePostHandler::new(database.clone()),
            search: SearchPostsHandler::new(database),
        }
    }
}

pub struct ListPostsHandler {
    database: Arc<Database>,
}

impl ListPostsHandler {
    fn new(database: Arc<Database>) -> ListPostsHandler {
        ListPostsHandler { database }
    }
}

impl Handler for ListPostsHandler {
    fn handle(&self, req: &mut Request) -> IronResult<Response> {
        let params = query_params(req);
        let sort = params.get("sort").map(String::as_str);
        let direction = params.get("direction").map(String::as_str);

        match self.database.list(sort, direction) {
            Ok(posts) => json_response(status::Ok, &posts.to_json()),
            Err(e) => post_error(&e),
        }
    }
}

pub struct CreatePostHandler {
    database: Arc<Database>,
}

impl CreatePostHandler {
    fn new(database: Arc<Database>) -> CreatePostHandler {
        CreatePostHandler { database }
    }
}

impl Handler for CreatePostHandler {
    fn handle(&self, req: &mut Request) -> IronResult<Response> {
        let new_post = match try_handler!(json_body(req)) {
            Some(body) => NewPost::from_json(&body),
            None => NewPost::default(),
        };

        match self.database.insert(new_post) {
            Ok(post) => json_response(
                status::Created,
                &object(vec![
                    ("message", "Post created".to_json()),
                    ("post", post.to_json()),
                ]),
            ),
            Err(e) => post_error(&e),
        }
    }
}

pub struct UpdatePostHandler {
    database: Arc<Database>,
}

impl UpdatePostHandler {
    fn new(database: Arc<Database>) -> UpdatePostHandler {
        UpdatePostHandler { database }
    }
}

impl Handler for UpdatePostHandler {
    fn handle(&self, req: &mut Request) -> IronResult<Response> {
        let raw_id = get_http_param!(req, "id");
        let id = match post_id(&raw_id) {
            Ok(id) => id,
            Err(e) => return post_error(&e),
        };

        // An empty object carries no data, same as a missing body.
        let patch = match try_handler!(json_body(req)) {
            Some(Json::Object(ref fields)) if !fields.is_empty() => {
                Some(PostPatch::from_object(fields))
            }
            _ => None,
        };

        match self.database.update(id, patch) {
            Ok(post) => json_response(
                status::Ok,
                &object(vec![
                    ("message", "Post updated".to_json()),
                    ("post", post.to_json()),
                ]),
            ),
            Err(e) => post_error(&e),
        }
    }
}

pub struct DeletePostHandler {
    database: Arc<Database>,
}

impl DeletePostHandler {
    fn new(database: Arc<Database>) -> DeletePostHandler {
        DeletePostHandler { database }
    }
}

impl Handler for DeletePostHandler {
    fn handle(&self, req: &mut Request) -> IronResult<Response> {
        let raw_id = get_http_param!(req, "id");
        let result = post_id(&raw_id).and_then(|id| self.database.delete(id).map(|_| id));

        match result {
            Ok(id) => {
                let message = format!("Post with ID {} has been deleted successfully.", id);
                json_response(status::Ok, &object(vec![("message", message.to_json())]))
            }
            Err(e) => post_error(&e),
        }
    }
}

pub struct SearchPostsHandler {
    database: Arc<Database>,
}

impl SearchPostsHandler {
    fn new(database: Arc<Database>) -> SearchPostsHandler {
        SearchPostsHandler { database }
    }
}

impl Handler for SearchPostsHandler {
    fn handle(&self, req: &mut Request) -> IronResult<Response> {
        let mut params = query_params(req);
        let mut take = |key: &str| params.remove(key).unwrap_or_default();
        let filters = SearchFilters {
            title: take("title"),
            content: take("content"),
            author: take("author"),
            date: take("date"),
        };

        json_response(status::Ok, &self.database.search(&filters).to_json())
    }
}

/// Answers CORS preflight requests; the headers come from `CorsAfterMiddleware`.
pub struct PreflightHandler;

impl Handler for PreflightHandler {
    fn handle(&self, _: &mut Request) -> IronResult<Response> {
        json_response(status::Ok, &object(vec![]))
    }
}

/// Serves the Swagger description of this API.
pub struct DocsHandler;

impl Handler for DocsHandler {
    fn handle(&self, _: &mut Request) -> IronResult<Response> {
        Ok(Response::with((status::Ok, SWAGGER_DOCUMENT)))
    }
}

pub struct JsonAfterMiddleware;

impl AfterMiddleware for JsonAfterMiddleware {
    fn after(&self, _: &mut Request, mut res: Response) -> IronResult<Response> {
        res.headers.set(ContentType::json());
        Ok(res)
    }

    fn catch(&self, req: &mut Request, err: IronError) -> IronResult<Response> {
        if err.error.is::<NoRoute>() {
            let res = error_response(status::NotFound, "Not found")?;
            return self.after(req, res);
        }
        Err(err)
    }
}

pub struct CorsAfterMiddleware;

impl AfterMiddleware for CorsAfterMiddleware {
    fn after(&self, _: &mut Request, mut res: Response) -> IronResult<Response> {
        res.headers.set(AccessControlAllowOrigin::Any);
        res.headers.set(AccessControlAllowMethods(vec![
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
        ]));
        res.headers
            .set_raw("Access-Control-Allow-Headers", vec![b"Content-Type".to_vec()]);
        Ok(res)
    }
}
