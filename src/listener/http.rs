//! HTTP listener for browsing the shared directory.
//!
//! Files are served by `tower-http`'s `ServeDir`; directories get an HTML
//! index rendered from an embedded minijinja template.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path as UrlPath, Request, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use minijinja::{Environment, Error as JinjaError, ErrorKind};
use rust_embed::Embed;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;
use tower::util::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use super::{Listener, ListenerError, ListenerHandle, ListenerResult, ListenerSpec, ServiceKind};

/// Embedded HTML templates.
#[derive(Embed)]
#[folder = "templates/"]
struct Templates;

const LISTING_TEMPLATE: &str = "listing.html";

/// Renders directory listings.
pub struct ListingTemplates {
    env: Environment<'static>,
}

impl ListingTemplates {
    /// Create a template engine with the embedded templates.
    pub fn new() -> Result<Self, JinjaError> {
        let mut env = Environment::new();

        for file in Templates::iter() {
            let filename = file.to_string();
            if let Some(content) = Templates::get(&filename) {
                let template_str = std::str::from_utf8(content.data.as_ref())
                    .map_err(|_| JinjaError::from(ErrorKind::InvalidOperation))?;
                env.add_template_owned(filename, template_str.to_string())?;
            }
        }

        Ok(Self { env })
    }

    /// Render a directory listing to HTML.
    pub fn render_listing(&self, listing: &ListingView) -> Result<String, JinjaError> {
        let template = self.env.get_template(LISTING_TEMPLATE)?;
        template.render(minijinja::context! { listing => listing })
    }
}

/// A view model for one directory.
#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    /// URL path of the directory, always ending in `/`
    pub path: String,
    pub has_parent: bool,
    pub entries: Vec<EntryView>,
}

/// A view model for one directory entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntryView {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

impl ListingView {
    /// Read `dir` and build its listing; directories sort before files.
    pub fn read(dir: &Path, url_path: &str) -> std::io::Result<Self> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(entry = ?entry.path(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            entries.push(EntryView {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        Ok(Self {
            path: url_path.to_string(),
            has_parent: url_path != "/",
            entries,
        })
    }
}

/// Shared state for the browse routes.
pub struct BrowseState {
    pub root: PathBuf,
    pub templates: ListingTemplates,
}

/// Build the router with all routes.
pub fn build_router(state: Arc<BrowseState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/*path", get(browse_handler))
        .with_state(state)
}

async fn root_handler(State(state): State<Arc<BrowseState>>) -> Response {
    render_directory(&state, &state.root, "/")
}

async fn browse_handler(
    State(state): State<Arc<BrowseState>>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    let Some(relative) = confine(&path) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    let target = state.root.join(&relative);

    if target.is_dir() {
        let uri_path = request.uri().path();
        if !uri_path.ends_with('/') {
            return Redirect::permanent(&format!("{}/", uri_path)).into_response();
        }
        return render_directory(&state, &target, uri_path);
    }

    match ServeDir::new(&state.root).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

fn render_directory(state: &BrowseState, dir: &Path, url_path: &str) -> Response {
    let listing = match ListingView::read(dir, url_path) {
        Ok(listing) => listing,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Directory not readable");
            return (StatusCode::NOT_FOUND, "Not found").into_response();
        }
    };

    match state.templates.render_listing(&listing) {
        Ok(html) => Html(html).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Template error: {}", e),
        )
            .into_response(),
    }
}

/// Turn a decoded URL path into a relative path that cannot leave the root.
fn confine(path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let mut confined = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(confined)
}

/// Browsable HTTP view of the shared directory
#[derive(Debug, Clone, Default)]
pub struct HttpListener;

impl HttpListener {
    /// Create a new HTTP listener
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Listener for HttpListener {
    fn kind(&self) -> ServiceKind {
        ServiceKind::WebBrowsing
    }

    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self, spec: ListenerSpec) -> ListenerResult<ListenerHandle> {
        let templates =
            ListingTemplates::new().map_err(|e| ListenerError::Fault(e.to_string()))?;
        let state = Arc::new(BrowseState {
            root: spec.root.clone(),
            templates,
        });
        let app = build_router(state);

        let listener = TokioTcpListener::bind(spec.bind)
            .await
            .map_err(|e| ListenerError::bind(spec.bind, e))?;
        let bound = listener
            .local_addr()
            .map_err(|e| ListenerError::bind(spec.bind, e))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| ListenerError::Fault(e.to_string()))
        });

        info!(address = %bound, root = %spec.root.display(), "HTTP server listening");
        Ok(ListenerHandle::new(
            ServiceKind::WebBrowsing,
            bound,
            shutdown_tx,
            task,
        ))
    }
}
