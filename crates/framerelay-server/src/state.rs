use crate::relay::RelayActivation;
use crate::rtc::RtcEngine;
use crate::session::{
    DataChannelEcho, SessionContext, SessionRegistry, ShutdownCoordinator, SignalingHandshake,
};
use clap::{Parser, ValueEnum};
use framerelay_media::FrameSourceFactory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Relay one upstream video file to WebRTC peers
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1", env = "FRAMERELAY_HOST")]
    pub host: String,

    /// Port for the HTTP server
    #[arg(long, default_value_t = 8080, env = "FRAMERELAY_PORT")]
    pub port: u16,

    /// IVF (VP8/VP9) file relayed to every peer
    #[arg(long, default_value = "media/video.ivf", env = "FRAMERELAY_SOURCE")]
    pub source: PathBuf,

    /// Restart the source from the first frame when it ends
    #[arg(long, env = "FRAMERELAY_LOOP_SOURCE")]
    pub loop_source: bool,

    /// When to start relaying frames to a new peer
    #[arg(
        long,
        value_enum,
        default_value = "immediate",
        env = "FRAMERELAY_RELAY_ACTIVATION"
    )]
    pub relay_activation: ActivationMode,

    /// Delay used by `--relay-activation fixed-delay`
    #[arg(long, default_value_t = 5000, env = "FRAMERELAY_ACTIVATION_DELAY_MS")]
    pub activation_delay_ms: u64,

    /// Upper bound on ICE gathering before the answer is returned
    #[arg(long, default_value_t = 5000, env = "FRAMERELAY_GATHER_TIMEOUT_MS")]
    pub gather_timeout_ms: u64,

    /// Upper bound on draining sessions at exit
    #[arg(long, default_value_t = 5000, env = "FRAMERELAY_SHUTDOWN_TIMEOUT_MS")]
    pub shutdown_timeout_ms: u64,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "STUN_SERVERS"
    )]
    pub stun_servers: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActivationMode {
    /// Start relaying as soon as negotiation succeeds
    Immediate,
    /// Wait for the peer to send a video track
    OnInboundTrack,
    /// Start after `--activation-delay-ms`
    FixedDelay,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub source_path: PathBuf,
    pub loop_source: bool,
    pub relay_activation: RelayActivation,
    pub gather_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub stun_servers: Vec<String>,
    pub verbose: bool,
}

impl Config {
    /// Load from the command line, falling back to environment variables and `.env`
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_args(Args::parse()))
    }

    /// Tracing filter used when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "framerelay_server=debug,framerelay_media=debug,tower_http=debug"
        } else {
            "framerelay_server=info,framerelay_media=info,tower_http=info"
        }
    }

    pub fn from_args(args: Args) -> Self {
        let relay_activation = match args.relay_activation {
            ActivationMode::Immediate => RelayActivation::Immediate,
            ActivationMode::OnInboundTrack => RelayActivation::OnInboundTrack,
            ActivationMode::FixedDelay => {
                RelayActivation::FixedDelay(Duration::from_millis(args.activation_delay_ms))
            }
        };

        Config {
            bind_address: format!("{}:{}", args.host, args.port),
            source_path: args.source,
            loop_source: args.loop_source,
            relay_activation,
            gather_timeout: Duration::from_millis(args.gather_timeout_ms),
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
            stun_servers: args.stun_servers,
            verbose: args.verbose,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: "127.0.0.1:8080".to_string(),
            source_path: PathBuf::from("media/video.ivf"),
            loop_source: false,
            relay_activation: RelayActivation::Immediate,
            gather_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            verbose: false,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub handshake: Arc<SignalingHandshake>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl AppState {
    pub fn new(config: &Config, sources: Arc<dyn FrameSourceFactory>) -> anyhow::Result<Self> {
        let engine = Arc::new(RtcEngine::new(config.stun_servers.clone())?);
        let registry = Arc::new(SessionRegistry::new());

        let context = Arc::new(SessionContext {
            registry: registry.clone(),
            sources,
            activation: config.relay_activation,
            echo: Arc::new(DataChannelEcho::new()),
        });
        let handshake = Arc::new(SignalingHandshake::new(
            engine,
            context,
            config.gather_timeout,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(
            registry.clone(),
            config.shutdown_timeout,
        ));

        Ok(Self {
            registry,
            handshake,
            shutdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_args() {
        let args = Args::try_parse_from(["framerelay-server"]).unwrap();
        let config = Config::from_args(args);

        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.relay_activation, RelayActivation::Immediate);
        assert!(!config.loop_source);
    }

    #[test]
    fn test_fixed_delay_activation_flag() {
        let args = Args::try_parse_from([
            "framerelay-server",
            "--port",
            "3000",
            "--relay-activation",
            "fixed-delay",
            "--activation-delay-ms",
            "250",
        ])
        .unwrap();
        let config = Config::from_args(args);

        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert_eq!(
            config.relay_activation,
            RelayActivation::FixedDelay(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_on_inbound_track_flag() {
        let args =
            Args::try_parse_from(["framerelay-server", "--relay-activation", "on-inbound-track"])
                .unwrap();
        assert_eq!(
            Config::from_args(args).relay_activation,
            RelayActivation::OnInboundTrack
        );
    }

    #[test]
    fn test_verbose_flag_selects_debug_filter() {
        let quiet = Config::from_args(Args::try_parse_from(["framerelay-server"]).unwrap());
        assert_eq!(
            quiet.log_filter(),
            "framerelay_server=info,framerelay_media=info,tower_http=info"
        );

        let verbose = Config::from_args(Args::try_parse_from(["framerelay-server", "-v"]).unwrap());
        assert!(verbose.verbose);
        assert!(verbose.log_filter().contains("framerelay_server=debug"));
    }
}
