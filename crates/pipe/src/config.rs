use std::time::Duration;

/// Command line arguments of the `httppipe` binary.
#[derive(Debug, clap::Parser)]
#[command(version, about = "A named one-shot pipe over HTTP: PUT a body on a path, GET it from the same path")]
pub struct Arguments {
    /// Socket address to bind to
    #[arg(short, long, default_value = "localhost:8080")]
    pub bind: String,

    /// Seconds a request waits for its peer, 0 waits until the client goes away
    #[arg(short, long, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub wait_timeout: u64,

    /// Seconds a producer waits for the consumer's acknowledgement after the handoff, 0 waits
    /// until the client goes away
    #[arg(short, long, default_value_t = 0)]
    pub ack_timeout: u64,
}

const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60;

/// Deadlines applied by the HTTP adapter. `None` means no deadline besides the client leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    pub wait_timeout: Option<Duration>,
    pub ack_timeout: Option<Duration>,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { wait_timeout: Some(Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS)), ack_timeout: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub pipe: PipeOptions,
}

impl From<Arguments> for ServerConfig {
    fn from(args: Arguments) -> Self {
        Self {
            bind: args.bind,
            pipe: PipeOptions { wait_timeout: seconds(args.wait_timeout), ack_timeout: seconds(args.ack_timeout) },
        }
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
