use std::net::SocketAddr;
use std::time::Duration;

use scorefinder_service::config::Config;

pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    let addr = match addr {
        Some(addr) => addr,
        None => config.bind.parse()?,
    };

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("OK");
            Ok(())
        }
        Ok(response) => {
            println!("ERROR");
            anyhow::bail!(
                "Score Finder ({addr}) is unhealthy. Status: {}",
                response.status()
            )
        }
        Err(error) => {
            println!("ERROR");
            anyhow::bail!("Failed to check Score Finder ({addr}) health: {error}")
        }
    }
}
