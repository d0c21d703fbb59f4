//! lanpin - private CA, TLS front, mDNS announcement and pairing code.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lanpin::run().await
}
