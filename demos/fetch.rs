use std::{sync::Arc, time::Duration};

use fluent_http::{ClientContext, HttpClient, Method, ReqwestTransport, TransportOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://www.rust-lang.org".to_owned());

    let options = TransportOptions::from_env().map_err(anyhow::Error::msg)?;
    let transport = ReqwestTransport::with_options(options)?;
    let context = Arc::new(ClientContext::new(transport));

    let mut client = HttpClient::new(context, url, Method::GET)
        .user_agent("fluent-http-demo/0.1")
        .retries(2, Duration::from_millis(400))
        .gzip(true)
        .enable_cookies(true);

    let status = client.response().await?.status;
    let body = client.text().await?;
    println!("{status}: {} bytes", body.len());

    let quick = fluent_http::get("https://www.rust-lang.org").text().await?;
    println!("{} bytes via the global context", quick.len());

    Ok(())
}
