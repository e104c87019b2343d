use iron::Chain;
use router::Router;

use crate::database::Database;
use crate::handlers::{
    CorsAfterMiddleware, DocsHandler, Handlers, JsonAfterMiddleware, PreflightHandler,
};

/// Route table plus the response middlewares every route shares.
pub fn app(database: Database) -> Chain {
    let handlers = Handlers::new(database);

    let mut router = Router::new();
    router.get("/api/posts", handlers.list, "list_posts");
    router.post("/api/posts", handlers.create, "create_post");
    router.get("/api/posts/search", handlers.search, "search_posts");
    router.put("/api/posts/:id", handlers.update, "update_post");
    router.delete("/api/posts/:id", handlers.delete, "delete_post");
    router.options("/api/posts", PreflightHandler, "posts_preflight");
    router.options("/api/posts/:id", PreflightHandler, "post_preflight");
    router.get("/static/swagger.json", DocsHandler, "swagger");

    let mut chain = Chain::new(router);
    chain.link_after(JsonAfterMiddleware);
    chain.link_after(CorsAfterMiddleware);
    chain
}
