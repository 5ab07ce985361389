//! In-memory todo service with admission control.
//!
//! Run with:
//!   RUST_LOG=turnstile=debug,todos=info cargo run --example todos
//!
//! Optionally point `TODOS_CONFIG` at a TOML file (see `ServerConfig`).
//!
//! Try:
//!   curl -X POST http://localhost:3000/todos -d '{"title":"write docs"}'
//!   curl http://localhost:3000/todos
//!   curl http://localhost:3000/todos/<id>
//!   curl -X PATCH http://localhost:3000/todos/<id> -d '{"done":true}'
//!   curl -X DELETE http://localhost:3000/todos/<id>
//!   curl http://localhost:3000/todos/not-a-uuid      → 400

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use turnstile::decode::{body, path, query_opt, segment};
use turnstile::endpoint::{delete, get, patch, post};
use turnstile::{Admission, Dispatcher, Failure, GlobalStats, Output, Router, Server, ServerConfig};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
struct Todo {
    id: Uuid,
    title: String,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct NewTodo {
    title: String,
}

#[derive(Debug, Deserialize)]
struct TodoPatch {
    title: Option<String>,
    done: Option<bool>,
}

type Store = Arc<Mutex<BTreeMap<Uuid, Todo>>>;

fn routes(store: Store) -> Router {
    let list = {
        let store = store.clone();
        get(path("todos")).then(query_opt::<bool>("done")).map(|((), done)| done).handle(
            move |done: Option<bool>| {
                let store = store.clone();
                async move {
                    let todos = store.lock().unwrap_or_else(PoisonError::into_inner);
                    let todos: Vec<Todo> = todos
                        .values()
                        .filter(|t| done.is_none_or(|d| t.done == d))
                        .cloned()
                        .collect();
                    Output::ok(todos)
                }
            },
        )
    };

    let show = {
        let store = store.clone();
        get(path("todos").with(segment::<Uuid>())).handle(move |id: Uuid| {
            let store = store.clone();
            async move {
                let todos = store.lock().unwrap_or_else(PoisonError::into_inner);
                match todos.get(&id) {
                    Some(todo) => Ok(Output::ok(todo)),
                    None => Err(Failure::not_found(format!("no todo with id {id}"))),
                }
            }
        })
    };

    let create = {
        let store = store.clone();
        post(path("todos"))
            .with(body::<NewTodo>())
            .should("title must not be blank", |t: &NewTodo| !t.title.trim().is_empty())
            .handle(move |new: NewTodo| {
                let store = store.clone();
                async move {
                    let todo = Todo { id: Uuid::new_v4(), title: new.title, done: false };
                    store
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(todo.id, todo.clone());
                    Output::created(todo)
                }
            })
    };

    let update = {
        let store = store.clone();
        patch(path("todos").with(segment::<Uuid>())).then(body::<TodoPatch>()).handle(
            move |(id, change): (Uuid, TodoPatch)| {
                let store = store.clone();
                async move {
                    let mut todos = store.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(todo) = todos.get_mut(&id) else {
                        return Err(Failure::not_found(format!("no todo with id {id}")));
                    };
                    if let Some(title) = change.title {
                        todo.title = title;
                    }
                    if let Some(done) = change.done {
                        todo.done = done;
                    }
                    Ok(Output::ok(todo.clone()))
                }
            },
        )
    };

    let remove = delete(path("todos").with(segment::<Uuid>())).handle(move |id: Uuid| {
        let store = store.clone();
        async move {
            match store.lock().unwrap_or_else(PoisonError::into_inner).remove(&id) {
                Some(_) => Ok(Output::no_content()),
                None => Err(Failure::not_found(format!("no todo with id {id}"))),
            }
        }
    });

    Router::new().route(list).route(show).route(create).route(update).route(remove)
}

#[tokio::main]
async fn main() -> Result<(), turnstile::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("TODOS_CONFIG") {
        Ok(path) => ServerConfig::load(path)?,
        Err(_) => ServerConfig::default(),
    };

    let stats = Arc::new(GlobalStats);
    let admission = Admission::new(config.admission.clone(), stats.clone());
    let dispatcher = Dispatcher::new(routes(Store::default()).into_endpoint(), admission, stats);

    Server::new(&config).await?.serve(dispatcher).await
}
