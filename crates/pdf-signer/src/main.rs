use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use simple_pdf_signer::{
    RetryPolicy, ServiceConfig,
    config::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_TSA_URL},
    run,
};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser)]
struct Args {
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    #[clap(long, env = "PORT", default_value = "8000")]
    port: u16,
    /// Upper bound on the whole multipart body, in bytes.
    #[clap(long, env = "MAX_CONTENT_LENGTH", default_value_t = DEFAULT_MAX_CONTENT_LENGTH)]
    max_content_length: usize,
    #[clap(long, env = "TSA_URL", default_value = DEFAULT_TSA_URL)]
    tsa_url: Url,

    // Retry schedule for the signing step
    /// Total signing attempts per request.
    #[clap(long, env = "MAX_RETRIES", default_value = "5", value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: u32,
    /// Seconds to wait before the second attempt.
    #[clap(long, env = "INITIAL_DELAY", default_value = "2")]
    initial_delay: u64,
    /// Ceiling, in seconds, for the doubled delay.
    #[clap(long, env = "MAX_DELAY", default_value = "30")]
    max_delay: u64,

    #[clap(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_content_length: self.max_content_length,
            tsa_url: self.tsa_url.clone(),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_secs(self.initial_delay),
                Duration::from_secs(self.max_delay),
            ),
        }
    }
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().with_current_span(true).init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_format);

    run(args.host.clone(), args.port, args.service_config()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["pdf-signer"]).unwrap();
        let config = args.service_config();
        assert_eq!(config.max_content_length, 10 * 1024 * 1024);
        assert_eq!(config.tsa_url.as_str(), "http://freetsa.org/tsr");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn zero_retries_is_rejected() {
        assert!(Args::try_parse_from(["pdf-signer", "--max-retries", "0"]).is_err());
    }
}
