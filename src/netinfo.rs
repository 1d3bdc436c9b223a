// One-shot address lookups shown alongside the traffic table

use anyhow::{Context, Result};
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask an echo service for our public address
pub async fn fetch_public_ip(endpoint: &str) -> Result<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(LOOKUP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let body = client
        .get(endpoint)
        .send()
        .await
        .context("Public IP request failed")?
        .error_for_status()
        .context("Public IP endpoint returned an error")?
        .text()
        .await
        .context("Failed to read public IP response")?;

    parse_ip(&body)
}

fn parse_ip(body: &str) -> Result<IpAddr> {
    body.trim()
        .parse()
        .with_context(|| format!("Not an IP address: {:?}", body.trim()))
}

/// Address of the interface holding the default route.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind probe socket")?;
    socket
        .connect("192.0.2.1:9")
        .context("No route to the outside world")?;
    let addr = socket.local_addr().context("Failed to read probe address")?.ip();

    if addr.is_unspecified() || addr.is_loopback() {
        anyhow::bail!("No non-loopback IPv4 address");
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip() {
        assert_eq!(parse_ip("203.0.113.7\n").unwrap(), "203.0.113.7".parse::<IpAddr>().unwrap());
        assert!(parse_ip("<html>rate limited</html>").is_err());
    }
}
