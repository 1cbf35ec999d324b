// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of confab.
//
// confab is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// confab is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with confab.  If not,
// see <http://www.gnu.org/licenses/>.

//! # confabd
//!
//! The confab node daemon. Runs in the foreground (container-style); point it at zero or more
//! seed peers & it will fork itself an identity, pull down the chat history & start gossiping.

use std::{
    future::IntoFuture, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc, time::Duration,
};

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};
use uuid::Uuid;

use confab::{
    api::make_router,
    client::{self, HttpTransport},
    join,
    node::{gossip_round, Node},
    peer::{self, PeerAddr, Protocol},
};

/// The confabd application error type
///
/// As elsewhere in this codebase, built with [Snafu]; at the application level the variants are
/// deliberately fine-grained in the hopes of helping operators. [Debug] is implemented in terms
/// of [Display] because `main()` returns `Result<(), Error>` & the Rust runtime prints the
/// `Debug` representation on the error path.
///
/// [Snafu]: https://docs.rs/snafu/latest/snafu/index.html
/// [Display]: std::fmt::Display
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("{text} is not a usable advertised origin: {source}"))]
    Origin { text: String, source: peer::Error },
    #[snafu(display("{text} is not a usable seed address: {source}"))]
    Seed { text: String, source: peer::Error },
    #[snafu(display("Failed to serve HTTP: {source}"))]
    Serve { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
    #[snafu(display("Failed to create the HTTP transport: {source}"))]
    Transport { source: client::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     command-line options                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment); anything here overrides the
/// configuration file.
struct CliOpts {
    pub instance_id: Uuid,
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    pub port: Option<u16>,
    pub seeds: Vec<String>,
    pub gossip_interval_ms: Option<u64>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            instance_id: matches
                .get_one::<Uuid>("instance-id")
                .cloned()
                .unwrap_or(Uuid::new_v4()),
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
            port: matches.get_one::<u16>("port").cloned(),
            seeds: matches
                .get_many::<String>("seed")
                .map(|seeds| seeds.cloned().collect())
                .unwrap_or_default(),
            gossip_interval_ms: matches.get_one::<u64>("gossip-interval-ms").cloned(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          configuration                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// confab configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    #[serde(rename = "listen-address")]
    listen_address: SocketAddr,
    /// The address at which *peers* can reach this node; defaults to `http://127.0.0.1` at the
    /// listen port, which is only right on a single host. Set this in any real deployment.
    #[serde(rename = "advertised-origin")]
    advertised_origin: Option<String>,
    /// Interval between liveness gossip rounds, in milliseconds
    #[serde(rename = "gossip-interval-ms")]
    gossip_interval_ms: u64,
    /// Upper bound on concurrently outstanding per-peer calls within one fan-out round
    fanout: usize,
    /// Timeout on each outbound peer call, in milliseconds
    #[serde(rename = "request-timeout-ms")]
    request_timeout_ms: u64,
    /// Seed peers to fork from at startup
    seeds: Vec<String>,
    #[serde(rename = "user-agent")]
    user_agent: String,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            listen_address: format!("0.0.0.0:{}", PeerAddr::DEFAULT_PORT)
                .parse::<SocketAddr>()
                .unwrap(/* known good */),
            advertised_origin: None,
            gossip_interval_ms: 10000,
            fanout: 8,
            request_timeout_ms: 5000,
            seeds: Vec::new(),
            user_agent: format!("confab/{}; +sp1ff@pobox.com", crate_version!()),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the confab configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/confab.toml").unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Serve confab
#[tracing::instrument(
    skip(opts, cfg),
    fields(instance_id = %opts.instance_id)
)]
async fn serve(opts: CliOpts, mut cfg: ConfigV1) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sigterm = signal(SignalKind::terminate()).unwrap(/* known good */);

    // Apply CLI overrides:
    if let Some(port) = opts.port {
        cfg.listen_address.set_port(port);
    }
    if let Some(ms) = opts.gossip_interval_ms {
        cfg.gossip_interval_ms = ms;
    }
    cfg.seeds.extend(opts.seeds.iter().cloned());

    let origin = match &cfg.advertised_origin {
        Some(text) => PeerAddr::canonical(text, cfg.listen_address.port()).context(OriginSnafu {
            text: text.clone(),
        })?,
        None => PeerAddr::new(
            Protocol::Http,
            "127.0.0.1".parse::<peer::Host>().unwrap(/* known good */),
            cfg.listen_address.port(),
        ),
    };

    let seeds = cfg
        .seeds
        .iter()
        .map(|text| {
            PeerAddr::canonical(text, PeerAddr::DEFAULT_PORT).context(SeedSnafu {
                text: text.clone(),
            })
        })
        .collect::<Result<Vec<PeerAddr>>>()?;

    let transport = HttpTransport::new(
        Duration::from_millis(cfg.request_timeout_ms),
        &cfg.user_agent,
    )
    .context(TransportSnafu)?;

    let node = Arc::new(Node::new(origin, Arc::new(transport), cfg.fanout));

    // Bootstrap *before* serving: until the fork has settled, this node's (seed) identity is
    // provisional & must not stamp anything.
    let phase = join::bootstrap(&node, &seeds).await;
    info!("Join protocol concluded: {:?}.", phase);

    // The gossip timer. Note that there's no queueing here: if a round is still draining when
    // the timer next fires, the engine drops the new round & we just wait for the tick after.
    let gossip_nfy = Arc::new(Notify::new());
    let timer = {
        let node = node.clone();
        let nfy = gossip_nfy.clone();
        let period = Duration::from_millis(cfg.gossip_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = interval.tick() => gossip_round(node.clone()).await,
                    _ = nfy.notified() => break,
                }
            }
        })
    };

    let listener = TcpListener::bind(&cfg.listen_address)
        .await
        .context(BindSnafu {
            addr: cfg.listen_address,
        })?;
    info!("confab listening on http://{}.", cfg.listen_address);

    let server_nfy = Arc::new(Notify::new());
    let mut server = std::pin::pin!(axum::serve(listener, make_router(node.clone()))
        .with_graceful_shutdown(shutdown_signal(server_nfy.clone()))
        .into_future());

    tokio::select! {
        result = &mut server => {
            // The server *should* never shut down on its own.
            error!("The HTTP server exited early.");
            result.context(ServeSnafu)?;
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM; shutting down.");
            // Signal the server & the gossip timer to stop, & wait for each:
            server_nfy.notify_one();
            gossip_nfy.notify_one();
            if let Err(err) = (&mut server).await {
                error!("While draining the HTTP server: {:?}", err);
            }
            if let Err(err) = timer.await {
                error!("Failed to stop the gossip timer: {:?}", err);
            }
        }
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Configure confabd logging: human-readable to stdout with `--plain`, JSON/structured
/// otherwise. Can only be invoked once (it calls tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(std::io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stdout),
        )
    };

    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

async fn go_async(opts: CliOpts) -> Result<()> {
    let cfg = parse_config(&opts.cfg)?;
    configure_logging(&opts.log_opts)?;

    info!(
        "confab version {}, instance {} starting.",
        crate_version!(),
        opts.instance_id
    );
    debug!("{:?}", cfg);

    serve(opts, cfg).await
}

fn main() -> Result<()> {
    // Most of confabd's configuration is read from file; the command-line options cover the
    // things one wants to vary per-invocation when standing up a little cluster by hand: the
    // port, the seeds & the gossip cadence. They all have corresponding environment variables
    // for the sake of convenience when running confab in a container.
    let opts = CliOpts::new(
        Command::new("confabd")
            .version(crate_version!())
            .author("Michael Herstine <sp1ff@pobox.com>")
            .about("A peer-to-peer replicated chat log")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("CONFAB_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                       configuration file",
                    ),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .num_args(1)
                    .value_parser(value_parser!(u16))
                    .env("CONFAB_PORT")
                    .help("port on which to listen (default 1975)"),
            )
            .arg(
                Arg::new("seed")
                    .short('s')
                    .long("seed")
                    .num_args(1)
                    .action(ArgAction::Append)
                    .value_delimiter(',')
                    .env("CONFAB_SEEDS")
                    .help("seed peer to fork from at startup; may be given more than once"),
            )
            .arg(
                Arg::new("gossip-interval-ms")
                    .short('g')
                    .long("gossip-interval-ms")
                    .num_args(1)
                    .value_parser(value_parser!(u64))
                    .env("CONFAB_GOSSIP_INTERVAL_MS")
                    .help("interval between liveness gossip rounds, in milliseconds"),
            )
            .arg(
                Arg::new("instance-id")
                    .short('I')
                    .long("instance-id")
                    .num_args(1)
                    .value_parser(value_parser!(Uuid))
                    .env("CONFAB_INSTANCE_ID")
                    .help("instance ID used to tag this node's log output; random if not given"),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CONFAB_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CONFAB_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CONFAB_VERBOSE")
                    .help("produce prolix output"),
            )
            .arg(
                Arg::new("plain")
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CONFAB_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .get_matches(),
    );

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts))
}
