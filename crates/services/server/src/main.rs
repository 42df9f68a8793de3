//! FastRTC server binary entry point.
//!
//! Starts the HTTP/WebRTC/telephony transport, serving an echo handler by
//! default.
//!
//! ```bash
//! cargo run -p fastrtc-server -- --bind 0.0.0.0:8080 --max-sessions 20
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fastrtc_core::handler::StreamHandler;
use fastrtc_core::types::{AudioFrame, EmitType, Layout};
use fastrtc_webrtc::offer::WebRtcTransportConfig;
use fastrtc_webrtc::session::SessionManager;

/// FastRTC media-plane server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP/WebRTC/telephony listener on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "FASTRTC_BIND")]
    bind: SocketAddr,

    /// Maximum concurrent peer connections before `handle_offer` returns 429.
    #[arg(long, default_value_t = 10, env = "FASTRTC_MAX_SESSIONS")]
    max_sessions: usize,

    /// STUN/TURN servers (comma-separated).
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "FASTRTC_ICE_SERVERS"
    )]
    ice_servers: Vec<String>,

    /// Maximum seconds a single session may stay open, unlimited if unset.
    #[arg(long, env = "FASTRTC_TIME_LIMIT_SECS")]
    time_limit_secs: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct EchoHandler;

#[async_trait::async_trait]
impl StreamHandler for EchoHandler {
    fn expected_layout(&self) -> Layout {
        Layout::Mono
    }

    async fn receive(&mut self, _frame: AudioFrame) -> fastrtc_core::Result<()> {
        Ok(())
    }

    async fn emit(&mut self) -> fastrtc_core::Result<EmitType> {
        Ok(EmitType::Empty)
    }

    fn copy(&self) -> Box<dyn StreamHandler> {
        Box::new(EchoHandler)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
        eprintln!("ctrl-c received, shutting down");
        std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_secs(5));
            eprintln!("graceful shutdown timed out, forcing exit");
            std::process::exit(0);
        });
    })
    .expect("failed to set ctrl-c handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("fastrtc-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), bind = %args.bind, "fastrtc-server starting");

    let webrtc_config = Arc::new(WebRtcTransportConfig {
        ice_servers: args.ice_servers,
        time_limit: args.time_limit_secs.map(std::time::Duration::from_secs),
    });

    let sessions = Arc::new(SessionManager::new(
        args.max_sessions,
        Arc::new(|| -> fastrtc_core::Result<Box<dyn StreamHandler>> { Ok(Box::new(EchoHandler)) }),
    ));

    let watchdog_cancel = tokio_util::sync::CancellationToken::new();
    let watchdog = tokio::spawn(fastrtc_webrtc::watchdog::run(
        sessions.clone(),
        std::time::Duration::from_secs(5),
        watchdog_cancel.clone(),
    ));

    let state = fastrtc_http::AppState {
        sessions,
        webrtc_config,
        telephony_handler_factory: Arc::new(|| -> fastrtc_core::Result<Box<dyn StreamHandler>> {
            Ok(Box::new(EchoHandler))
        }),
    };
    let router = fastrtc_http::build_router(state);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "listening");

    let serve = axum::serve(listener, router);
    tokio::select! {
        result = serve => result?,
        _ = wait_for_shutdown(shutdown_flag) => {
            info!("shutdown signal observed, stopping");
        }
    }

    watchdog_cancel.cancel();
    let _ = watchdog.await;
    Ok(())
}

async fn wait_for_shutdown(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
