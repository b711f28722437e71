//! Command line and environment configuration.

use std::time::Duration;

use assetuploader_scheduler::BucketGranularity;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "assetuploader")]
#[command(about = "Asset upload service with deferred upload confirmation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and the confirmation scheduler
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Bucket holding the assets
    #[arg(long, env = "ASSETUPLOADER_BUCKET", default_value = "dmc-asset-uploader-test")]
    pub bucket: String,

    /// Storage region
    #[arg(long, env = "ASSETUPLOADER_REGION", default_value = "us-west-2")]
    pub region: String,

    /// HTTP server port
    #[arg(long, env = "ASSETUPLOADER_PORT", default_value = "8080")]
    pub port: u16,

    /// Seconds between scheduler ticks
    #[arg(long, default_value = "30")]
    pub tick_interval_secs: u64,

    /// Lifetime of signed upload URLs in seconds
    #[arg(long, default_value = "30")]
    pub put_expiration_secs: u64,

    /// Width of the job store's time buckets (millis, seconds or minutes)
    #[arg(long, default_value_t = BucketGranularity::Minutes)]
    pub bucket_granularity: BucketGranularity,
}

impl ServeArgs {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn put_expiration(&self) -> Duration {
        Duration::from_secs(self.put_expiration_secs)
    }
}
