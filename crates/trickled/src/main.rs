//! trickled: serves, checks and renders progressive templates.
//!
//! # Usage
//!
//! ```text
//! trickled serve --port 3000 --templates views --config trickle.toml
//! trickled check --templates views
//! trickled render posts/index --templates views --user-agent "MSIE 8.0"
//! ```

mod load;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use trickle_core::{RequestInfo, WireTransport};

#[derive(Parser)]
#[command(name = "trickled", about = "Progressive template server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the templates over HTTP.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Template directory.
        #[arg(long, default_value = "views")]
        templates: PathBuf,

        /// trickle.toml with controller and padding settings.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Chunks a render may run ahead of a slow client.
        #[arg(long, default_value_t = trickle_http::DEFAULT_CHANNEL_CAPACITY)]
        channel_capacity: usize,
    },
    /// Parse every template and list the routes they serve.
    Check {
        #[arg(long, default_value = "views")]
        templates: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Render one request to stdout as raw HTTP/1.1.
    Render {
        /// `controller/action`, or a bare controller for its index.
        target: String,

        #[arg(long, default_value = "views")]
        templates: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// User-Agent header sent with the request.
        #[arg(long)]
        user_agent: Option<String>,

        /// Print the response summary as JSON on stderr.
        #[arg(long)]
        summary: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `render` output stays clean.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trickle=debug,trickled=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            host,
            templates,
            config,
            channel_capacity,
        } => {
            let app = load::load_app(&templates, config.as_deref())?;
            serve(app, SocketAddr::new(host, port), channel_capacity).await
        }
        Command::Check { templates, config } => check(templates, config),
        Command::Render {
            target,
            templates,
            config,
            user_agent,
            summary,
        } => render(target, templates, config, user_agent, summary),
    }
}

async fn serve(app: trickle_core::App, addr: SocketAddr, channel_capacity: usize) -> anyhow::Result<()> {
    let routes = app.routes().len();
    let router = trickle_http::build_router_with_capacity(Arc::new(app), channel_capacity);

    info!(%addr, routes, "trickled listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            info!("shutdown signal received");
        })
        .await?;

    info!("trickled stopped");
    Ok(())
}

fn check(templates: PathBuf, config: Option<PathBuf>) -> anyhow::Result<()> {
    let app = load::load_app(&templates, config.as_deref())?;
    for name in app.registry().names() {
        println!("template  {name}");
    }
    for (controller, action) in app.routes() {
        println!("route     GET /{controller}/{action}");
    }
    Ok(())
}

fn render(
    target: String,
    templates: PathBuf,
    config: Option<PathBuf>,
    user_agent: Option<String>,
    summary: bool,
) -> anyhow::Result<()> {
    let (controller, action) = load::parse_target(&target)?;
    let app = load::load_app(&templates, config.as_deref())?;

    let mut request = RequestInfo::get(format!("/{controller}/{action}"));
    if let Some(agent) = user_agent.as_deref() {
        request = request.with_user_agent(agent);
    }

    let transport = WireTransport::new(std::io::stdout());
    let result = app.dispatch(&request, &controller, &action, Box::new(transport))?;
    if summary {
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
