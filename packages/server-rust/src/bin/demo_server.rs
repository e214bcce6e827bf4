//! Demo HTTP server exercising filters, controllers, exception mappers,
//! flags and warmup.
//!
//! ```text
//! trellis-demo --port 8888 --flag magicNum=42
//! curl localhost:8888/headers        # -> 1,2
//! curl localhost:8888/magicNum       # -> 42
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http::{Method, StatusCode};
use tracing::{info, warn};
use trellis_core::{AppKind, Failure, FailureKind, HttpRequest, HttpResponse};
use trellis_server::network::{HttpTransport, NetworkConfig};
use trellis_server::service::middleware::{
    common_filters, AppendHeaderFilter, LoadShedFilter, TimeoutFilter,
};
use trellis_server::service::{
    http_defaults, mapper_fn, service_fn, Application, Controller, ExceptionMappers, FilterChain,
    HttpMatcher, Route, RouterBuilder, Server, ServerConfig, WarmupSample,
};
use trellis_server::telemetry::{init_tracing, LogFormat};
use trellis_server::Http;

const DEMO_FAILURE: AppKind = AppKind::new("DEMO_FAILURE");

#[derive(Debug, Parser)]
#[command(name = "trellis-demo", about = "Trellis demo HTTP server")]
struct Args {
    /// Server name used in logs.
    #[arg(long, env = "TRELLIS_NAME", default_value = "trellis-demo")]
    name: String,

    #[arg(long, env = "TRELLIS_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "TRELLIS_PORT", default_value_t = 8888)]
    port: u16,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Warmup passes over the sample requests.
    #[arg(long, default_value_t = 2)]
    warmup_iterations: usize,

    /// Flag assignment, `name=value`. Repeatable.
    #[arg(long = "flag", value_name = "NAME=VALUE")]
    flags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Controllers
// ---------------------------------------------------------------------------

struct DoEverythingController {
    magic_num: u32,
}

impl Controller<Http> for DoEverythingController {
    fn routes(&self) -> Result<Vec<Route<Http>>, Failure> {
        let magic_num = self.magic_num;
        Ok(vec![
            Route::new(
                HttpMatcher::new(Method::GET, "/ping")?,
                service_fn(|_req: HttpRequest| async {
                    Ok::<_, Failure>(HttpResponse::ok().with_body("pong"))
                }),
            ),
            Route::new(
                HttpMatcher::new(Method::GET, "/magicNum")?,
                service_fn(move |_req: HttpRequest| async move {
                    Ok::<_, Failure>(HttpResponse::ok().with_body(magic_num.to_string()))
                }),
            ),
            Route::new(
                HttpMatcher::new(Method::GET, "/users/:id")?,
                service_fn(|req: HttpRequest| async move {
                    let id = req.param("id").unwrap_or_default().to_string();
                    HttpResponse::json(StatusCode::OK, &serde_json::json!({ "id": id }))
                        .map_err(Failure::handler)
                }),
            ),
            Route::new(
                HttpMatcher::new(Method::GET, "/fail")?,
                service_fn(|_req: HttpRequest| async {
                    Err::<HttpResponse, _>(Failure::app(DEMO_FAILURE, "failed on purpose"))
                }),
            ),
        ])
    }
}

#[derive(Clone)]
struct HelloService;

impl HelloService {
    fn greet(&self, name: &str) -> String {
        format!("Hello {name}")
    }
}

/// Built by hand with its collaborator rather than by the application.
struct HelloController {
    hello: Arc<HelloService>,
}

impl Controller<Http> for HelloController {
    fn routes(&self) -> Result<Vec<Route<Http>>, Failure> {
        let hello = Arc::clone(&self.hello);
        Ok(vec![Route::new(
            HttpMatcher::new(Method::GET, "/hello")?,
            service_fn(move |req: HttpRequest| {
                let hello = Arc::clone(&hello);
                async move {
                    let name = req.query_param("name").unwrap_or("world");
                    Ok::<_, Failure>(HttpResponse::ok().with_body(hello.greet(name)))
                }
            }),
        )])
    }
}

/// Echoes every `test` header value, comma-joined.
struct ReadHeadersController;

impl Controller<Http> for ReadHeadersController {
    fn routes(&self) -> Result<Vec<Route<Http>>, Failure> {
        Ok(vec![Route::new(
            HttpMatcher::new(Method::GET, "/headers")?,
            service_fn(|req: HttpRequest| async move {
                let joined = req.metadata.joined("test").unwrap_or_default();
                Ok::<_, Failure>(HttpResponse::ok().with_body(joined))
            }),
        )])
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

struct DemoApp {
    request_timeout: Duration,
    max_concurrent: usize,
}

impl Application<Http> for DemoApp {
    fn configure_filters(
        &self,
        filters: &mut FilterChain<Http>,
        mappers: &ExceptionMappers<Http>,
    ) -> Result<(), Failure> {
        filters.extend(&common_filters(mappers));
        filters.push(Arc::new(LoadShedFilter::new(self.max_concurrent)));
        filters.push(Arc::new(TimeoutFilter::new(self.request_timeout)));
        filters.push(Arc::new(AppendHeaderFilter::new("test", "1")));
        Ok(())
    }

    fn configure_routes(
        &self,
        router: &mut RouterBuilder<Http>,
        config: &ServerConfig,
    ) -> Result<(), Failure> {
        let magic_num = config.flags.parse::<u32>("magicNum")?;
        router
            .add_controller(&DoEverythingController { magic_num })?
            .add_controller(&HelloController {
                hello: Arc::new(HelloService),
            })?
            .add_controller_filtered(
                FilterChain::new().and_then(AppendHeaderFilter::new("test", "2")),
                &ReadHeadersController,
            )?;
        Ok(())
    }

    fn configure_exception_mappers(&self, mappers: &ExceptionMappers<Http>) -> Result<(), Failure> {
        http_defaults(mappers)?;
        mappers.register(
            FailureKind::App(DEMO_FAILURE),
            mapper_fn(|failure: &Failure| {
                HttpResponse::text(StatusCode::BAD_REQUEST, failure.message())
            }),
        )?;
        Ok(())
    }
}

fn warmup_samples() -> Vec<WarmupSample<Http>> {
    vec![
        WarmupSample::new("ping", HttpRequest::get("/ping")).expect_status(StatusCode::OK),
        WarmupSample::new("hello", HttpRequest::get("/hello?name=warmup"))
            .expect_status(StatusCode::OK),
        WarmupSample::new("headers", HttpRequest::get("/headers")).with_check(
            |response: &HttpResponse| {
                if response.body_text() == "1,2" {
                    Ok(())
                } else {
                    Err(format!("unexpected header echo `{}`", response.body_text()))
                }
            },
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let mut config = ServerConfig {
        name: args.name,
        network: NetworkConfig {
            host: args.host,
            port: args.port,
            ..NetworkConfig::default()
        },
        warmup_iterations: args.warmup_iterations,
        ..ServerConfig::default()
    };
    config
        .flags
        .define("magicNum", 26, "number returned by GET /magicNum")?;
    config.flags.apply_assignments(&args.flags)?;

    let mut transport = HttpTransport::new(config.network.clone());
    let port = transport.start().await?;

    let app = DemoApp {
        request_timeout: config.default_request_timeout,
        max_concurrent: config.max_concurrent_requests,
    };
    let server = Server::bootstrap(config, &app, &warmup_samples()).await?;
    info!(port, "demo server ready");

    transport
        .serve(server, shutdown_signal(tokio::signal::ctrl_c()))
        .await
}

/// Resolves once `signal` fires. A signal listener that cannot be installed
/// still triggers shutdown rather than leaving the server unstoppable.
async fn shutdown_signal(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal, shutting down"),
    }
}
