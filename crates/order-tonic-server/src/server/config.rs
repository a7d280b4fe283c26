use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use order_tonic_core::types::DEFAULT_BATCH_SIZE;

/// Runtime configuration for the `order-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults matching the stock deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "order-tonic-server",
    version,
    about = "A gRPC service for managing orders and streaming combined shipments"
)]
pub struct CliArgs {
    /// Number of orders a `ProcessOrders` stream collects before flushing
    /// every open combined shipment.
    ///
    /// Each flushed window contains exactly this many orders. Orders left
    /// over when the client closes its stream are drained as a final,
    /// smaller window.
    ///
    /// Environment variable: `ORDER_BATCH_SIZE`
    #[arg(long, env = "ORDER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Capacity of the response buffer between a streaming feed task and the
    /// gRPC response stream.
    ///
    /// Lower values increase backpressure responsiveness; higher values let a
    /// feed run further ahead of a slow client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight streams to finish on shutdown before
    /// they are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:9091" or "/tmp/order-tonic.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:9091"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub batch_size: usize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            stream_buffer_size: 8,
            shutdown_timeout: Duration::from_secs(3),
            server_addr: String::from("0.0.0.0:9091"),
            uds: false,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("ORDER_BATCH_SIZE must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            batch_size: args.batch_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(core::iter::once("order-tonic-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn explicit_flags_are_applied() {
        let config = ServerConfig::try_from(parse(&[
            "--batch-size",
            "5",
            "--stream-buffer-size",
            "16",
            "--shutdown-timeout",
            "10",
            "--server-addr",
            "127.0.0.1:7000",
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.stream_buffer_size, 16);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.server_addr, "127.0.0.1:7000");
        assert!(!config.uds);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ServerConfig::try_from(parse(&["--batch-size", "0"])).unwrap_err();
        assert!(err.to_string().contains("ORDER_BATCH_SIZE"));
    }

    #[test]
    fn zero_stream_buffer_is_rejected() {
        let err = ServerConfig::try_from(parse(&["--stream-buffer-size", "0"])).unwrap_err();
        assert!(err.to_string().contains("STREAM_BUFFER_SIZE"));
    }
}
