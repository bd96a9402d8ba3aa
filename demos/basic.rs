//! Fetches an order, then updates it with a cancellable PUT.
//!
//! Point `ORDERS_URL` at a running service:
//! `ORDERS_URL=http://127.0.0.1:8080/orders/7 cargo run --example basic --features tracing`

use std::time::Duration;

use resilient_http::{encoding_rs, media_type, CancellationToken, ResilientClient};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: u64,
    state: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("ORDERS_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/orders/7".to_owned());
    let client = ResilientClient::from_env().map_err(anyhow::Error::msg)?;

    let mut order: Order = client.get_resilient(&url).send_as().await?;
    println!("fetched {order:?}");

    order.state = "shipped".to_owned();
    let token = CancellationToken::new();
    let deadline = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        deadline.cancel();
    });

    let response = client
        .put_resilient(&url)
        .body(&order)
        .max_attempts(3)
        .cancellation(token.clone())
        .send()
        .await;
    match response {
        Ok(response) => println!("update returned {}", response.status()),
        Err(err) => eprintln!("{}", err.diagnostics()),
    }

    let response = client
        .patch_resilient(format!("{url}/note"))
        .encoding(encoding_rs::WINDOWS_1252)
        .text("livré", media_type::PLAIN)
        .cancellation(token)
        .send()
        .await?;
    println!("note returned {}", response.status());

    Ok(())
}
