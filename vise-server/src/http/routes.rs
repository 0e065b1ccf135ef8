//! Request routing
//!
//! Maps one framed request to one response. Handlers either serve static or
//! derived content, mutate the engine (and possibly start the training
//! worker), or block on the event queue for the long-poll channel.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use vise_common::{util, EventQueue};

use crate::config::ServerConfig;
use crate::engine::{SearchEngine, Stage};
use crate::resources::{ResourceCache, ENGINE_LIST_PLACEHOLDER, HOME_HTML, MAIN_HTML, NOT_FOUND_HTML};

use super::request::{Method, Request};
use super::response::{Response, Status};

/// How long one long-poll request waits for an event before returning an
/// empty body. The browser re-issues the request immediately either way.
const MESSAGE_POLL_WAIT: Duration = Duration::from_millis(997);

/// Placeholder in the Info panel replaced with the training cost overview.
const ENGINE_OVERVIEW_PLACEHOLDER: &str = "__ENGINE_OVERVIEW__";

/// Shared handles given to every connection.
pub struct ServerContext {
    pub config: ServerConfig,
    pub engine: Arc<SearchEngine>,
    pub queue: Arc<EventQueue>,
    pub resources: Arc<ResourceCache>,
}

/// Reply to engine management POSTs on `/`.
#[derive(Debug, Serialize)]
struct PostReply {
    id: &'static str,
    http_post_data: String,
    result: String,
}

fn post_reply(http_post_data: String, result: String) -> Response {
    let reply = PostReply {
        id: "http_post_response",
        http_post_data,
        result,
    };
    match serde_json::to_string(&reply) {
        Ok(json) => Response::json(json),
        Err(e) => {
            warn!("failed to serialize post reply: {}", e);
            Response::text("")
        }
    }
}

pub async fn dispatch(req: &Request, ctx: &ServerContext) -> Response {
    match req.method {
        Method::Get => dispatch_get(req, ctx).await,
        Method::Post => dispatch_post(req, ctx),
    }
}

async fn dispatch_get(req: &Request, ctx: &ServerContext) -> Response {
    let path = req.path();
    match path {
        "/" => Response::html(ctx.resources.get_text(MAIN_HTML)),
        "/favicon.ico" | "/vise.css" | "/vise.js" => {
            let name = path.trim_start_matches('/');
            let content_type = util::content_type_for(&PathBuf::from(name));
            Response::ok(content_type, ctx.resources.get(name).to_vec())
        }
        "/_state" => state_snapshot(ctx),
        "/_vise_home.html" => Response::html(home_html(ctx)),
        _ if path.starts_with("/_message") => long_poll(ctx).await,
        _ if path.starts_with("/_static/") => serve_engine_image(req, ctx),
        _ => stage_panel(path, ctx),
    }
}

fn dispatch_post(req: &Request, ctx: &ServerContext) -> Response {
    let path = req.path();
    match path {
        "/" => engine_command(req, ctx),
        "/Setting" => setting_post(req, ctx),
        "/Info" => info_post(req, ctx),
        _ => match Stage::from_name(path.trim_start_matches('/')) {
            Some(stage) => Response::not_found(format!("no POST handler for {}", stage.name())),
            None => Response::not_found("unknown resource"),
        },
    }
}

/// GET /_state - JSON snapshot of the pipeline state.
fn state_snapshot(ctx: &ServerContext) -> Response {
    match serde_json::to_string(&ctx.engine.state_snapshot()) {
        Ok(json) => Response::json(json),
        Err(e) => {
            warn!("failed to serialize state snapshot: {}", e);
            Response::json("{}".to_string())
        }
    }
}

/// GET /_vise_home.html - engine list rendered into the home template.
fn home_html(ctx: &ServerContext) -> String {
    let rendered: String = ctx
        .engine
        .engine_list()
        .iter()
        .map(|name| {
            format!(
                "<li><a title=\"load search engine {name}\" \
                 onclick=\"_vise_load_search_engine('{name}')\">{name}</a></li>\n"
            )
        })
        .collect();
    ctx.resources
        .get_text(HOME_HTML)
        .replace(ENGINE_LIST_PLACEHOLDER, &rendered)
}

/// GET /_message - deliver the next event, or an empty body on timeout.
///
/// Blocks the handling task for up to the poll wait; this is the deliberate
/// cost of server push over a connectionless protocol.
async fn long_poll(ctx: &ServerContext) -> Response {
    match ctx.queue.pop_timeout(MESSAGE_POLL_WAIT).await {
        Some(event) => Response::text(event.to_line()),
        None => Response::text(""),
    }
}

/// GET /_static/<engine>/<path>[?variant=original] - image resource,
/// transcoded to JPEG on the fly.
fn serve_engine_image(req: &Request, ctx: &ServerContext) -> Response {
    let rest = match req.path().strip_prefix("/_static/") {
        Some(rest) => rest,
        None => return Response::not_found("unknown resource"),
    };
    let (engine_name, rel) = match rest.split_once('/') {
        Some(parts) => parts,
        None => return Response::not_found("missing image path"),
    };
    if !SearchEngine::validate_name(engine_name) {
        return Response::not_found("invalid engine name");
    }
    let rel = util::http_unescape(rel);
    if rel.split('/').any(|component| component == "..") {
        return Response::not_found("invalid image path");
    }

    let params = util::parse_key_value(req.query(), '&');
    let want_original = params.get("variant").map(String::as_str) == Some("original");

    // Preferred directory by variant, with the other as fallback; the
    // original image dir is only known for the loaded engine.
    let transformed = ctx.config.engine_dir().join(engine_name).join("img");
    let original = if ctx.engine.name() == engine_name {
        Some(ctx.engine.original_imgdir())
    } else {
        None
    };

    let mut candidates: Vec<PathBuf> = Vec::new();
    if want_original {
        if let Some(original) = &original {
            candidates.push(original.join(&rel));
        }
        candidates.push(transformed.join(&rel));
    } else {
        candidates.push(transformed.join(&rel));
        if let Some(original) = &original {
            candidates.push(original.join(&rel));
        }
    }

    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match transcode_jpeg(&path) {
            Ok(bytes) => return Response::ok("image/jpeg", bytes),
            Err(e) => {
                warn!("failed to transcode {}: {}", path.display(), e);
                return Response::not_found("image not readable");
            }
        }
    }
    Response::not_found("no such image")
}

fn transcode_jpeg(path: &std::path::Path) -> crate::error::Result<Vec<u8>> {
    let img = image::open(path)?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

/// GET /<StageName> - the stage's HTML panel.
fn stage_panel(path: &str, ctx: &ServerContext) -> Response {
    let name = path.trim_start_matches('/');
    match Stage::from_name(name) {
        Some(stage) => {
            let mut html = ctx.resources.get_text(stage.html_resource());
            if stage == Stage::Info {
                html = html.replace(ENGINE_OVERVIEW_PLACEHOLDER, &ctx.engine.overview_html());
            }
            Response::html(html)
        }
        None => Response::new(
            Status::NotFound,
            "text/html",
            ctx.resources.get_text(NOT_FOUND_HTML).into_bytes(),
        ),
    }
}

/// POST / - engine management commands: `create_search_engine <name>`,
/// `load_search_engine <name>`, `delete_search_engine <name>`.
fn engine_command(req: &Request, ctx: &ServerContext) -> Response {
    let body = req.body_text();
    let mut tokens = body.split_whitespace();
    let command = tokens.next().unwrap_or("");
    let name = tokens.next().unwrap_or("");

    let outcome = match command {
        "create_search_engine" => ctx.engine.create(name),
        "load_search_engine" => ctx.engine.load(name),
        "delete_search_engine" => ctx.engine.delete(name),
        other => Err(crate::error::Error::BadRequest(format!(
            "unknown command: {other}"
        ))),
    };

    let result = match outcome {
        Ok(()) => "OK".to_string(),
        Err(e) => {
            debug!("engine command failed: {}", e);
            format!("ERR: {e}")
        }
    };
    post_reply(body, result)
}

/// POST /Setting - apply user configuration (`key=value` lines).
fn setting_post(req: &Request, ctx: &ServerContext) -> Response {
    ctx.engine.apply_user_config(&req.body_text());
    if ctx.engine.advance() {
        // The state update is pushed twice; the browser treats the second
        // one as a refresh of the same view.
        ctx.engine.send_command("SearchEngine", "_state update_now");
        ctx.engine.send_command("SearchEngine", "_state update_now");
        Response::text("OK")
    } else {
        Response::bad_request("configuration not accepted")
    }
}

/// POST /Info - literal `proceed` starts the training worker.
fn info_post(req: &Request, ctx: &ServerContext) -> Response {
    if req.body_text().trim() != "proceed" {
        return Response::bad_request("expected proceed");
    }
    if !ctx.engine.advance() {
        return Response::bad_request("engine is not ready to train");
    }
    ctx.engine.send_command("SearchEngine", "_state update_now");
    ctx.engine.clone().start_training();
    Response::text("OK")
}
