//! Background compositing service
//!
//! HTTP service that segments an uploaded portrait and places it onto a team
//! background, plus a `fetch-model` command to provision the model file.

#[cfg(feature = "cli")]
use bg_composite::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
