use anyhow::Context;
use bitex::{RequestOptions, Session};
use reqwest::Method;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut session = Session::new(None).context("failed to create session")?;
    println!("Loaded plugins: {:?}", session.registry().exchanges());

    // Public endpoint, addressed with an absolute URL
    let response = session
        .request(
            Method::GET,
            "https://api.kraken.com/0/public/Ticker?pair=XBTUSD",
            RequestOptions::new().exchange("kraken"),
        )
        .await
        .context("ticker request failed")?;

    println!(
        "{} {} (received {})",
        response
            .status_code
            .map_or_else(|| "-".to_string(), |status| status.to_string()),
        response.url.as_deref().unwrap_or_default(),
        response.received_timestamp()
    );
    println!("{}", response.text()?);

    match response.key_value_dict() {
        Ok(fields) => println!("{:#?}", fields),
        Err(e) => println!("No projection available: {}", e),
    }

    Ok(())
}
