//! A demo server.
//!
//! Configured through the environment:
//! - `HEARTH_PORT`: the port, `8080` by default
//! - `HEARTH_CERT` and `HEARTH_KEY`: PEM certificate chain and private key; serves HTTPS if both are set
//! - `HEARTH_PUBLIC`: a directory to serve static files from
//! - `HEARTH_LOG`: the `env_logger` filter, `info` by default
use hearth::prelude::*;
use std::env;

struct Upload {
    name: String,
    filename: String,
    length: u64,
}
impl Row for Upload {
    const LAYOUT: Layout = Layout {
        name: "Uploads",
        fields: &["name", "filename", "length"],
        key: 0,
    };
    fn cells(&self) -> Vec<Value> {
        vec![
            self.name.as_str().into(),
            self.filename.as_str().into(),
            self.length.into(),
        ]
    }
}

struct Whoami {
    session: i64,
    principal: i64,
    flags: u64,
}
impl Row for Whoami {
    const LAYOUT: Layout = Layout {
        name: "Session",
        fields: &["session", "principal", "flags"],
        key: 0,
    };
    fn cells(&self) -> Vec<Value> {
        vec![self.session.into(), self.principal.into(), self.flags.into()]
    }
}

fn routes() -> Routes {
    let mut routes = Routes::new();
    routes
        .add(
            "/hello",
            Route::public(routing::handler(|ctx: Context| async move {
                let name = ctx.request().parameter_str("name").unwrap_or("world");
                let mut result = ResultBuilder::new();
                result.add_success(format_compact!("Hello, {name}!"));
                Ok::<_, Error>(result.into())
            })),
        )
        .add(
            "/login",
            Route::public(routing::handler(|ctx: Context| async move {
                let principal: i64 = ctx.request().parameter("user")?;
                let flags: u64 = ctx.request().optional_parameter("flags")?.unwrap_or(0);
                ctx.authenticate(principal, flags)?;
                let mut result = ResultBuilder::new();
                result.add_success("logged in");
                Ok::<_, Error>(result.into())
            })),
        )
        .add(
            "/logout",
            Route::new(
                routing::handler(|ctx: Context| async move {
                    ctx.logout()?;
                    let mut result = ResultBuilder::new();
                    result.add_success("logged out");
                    Ok::<_, Error>(result.into())
                }),
                Access::Session,
            ),
        )
        .add(
            "/whoami",
            Route::new(
                routing::handler(|ctx: Context| async move {
                    let session = ctx.session();
                    let mut result = ResultBuilder::new();
                    result.add_struct(&Whoami {
                        session: session.id(),
                        principal: session.principal(),
                        flags: session.flags(),
                    })?;
                    Ok::<_, Error>(result.into())
                }),
                Access::Authenticated,
            ),
        )
        .add(
            "/upload",
            Route::public(routing::handler(|ctx: Context| async move {
                let sections = ctx
                    .request()
                    .sections()
                    .ok_or_else(|| Error::invalid_parameters("expected a multipart body"))?;
                let uploads: Vec<_> = sections
                    .iter()
                    .map(|section| Upload {
                        name: section.name.clone().unwrap_or_default(),
                        filename: section.filename.clone().unwrap_or_default(),
                        length: section.content.len() as u64,
                    })
                    .collect();
                let mut result = ResultBuilder::new();
                result.add_rows(&uploads)?;
                result.add_success(format_compact!("received {} sections", uploads.len()));
                Ok::<_, Error>(result.into())
            })),
        );
    routes
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .parse_filters("info")
        .parse_env("HEARTH_LOG")
        .init();

    let port = env::var("HEARTH_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080);

    let options = Options {
        public_dir: env::var_os("HEARTH_PUBLIC").map(PathBuf::from),
        directory_listing: true,
        ..Options::default()
    };
    let server = Arc::new(Server::new(routes()).with_options(options));

    let descriptor = match (env::var_os("HEARTH_CERT"), env::var_os("HEARTH_KEY")) {
        (Some(cert), Some(key)) => match encryption::server_config(&cert, &key) {
            Ok(config) => PortDescriptor::secure(port, server, Arc::new(config)),
            Err(err) => {
                error!("Failed to load certificate: {err}");
                std::process::exit(1);
            }
        },
        _ => PortDescriptor::new(port, server),
    };

    let manager = match RunConfig::new().bind(descriptor).execute().await {
        Ok(manager) => manager,
        Err(err) => {
            error!("Failed to bind port {port}: {err}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        () = manager.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Failed to listen for Ctrl-C: {err}");
            }
            manager.shutdown();
            manager.wait().await;
        }
    }
}
