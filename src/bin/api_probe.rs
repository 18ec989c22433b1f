//! Issue one authenticated GET through the full client pipeline.
//!
//! Uses the stored credentials and the environment in `QIVR_ENV`.
//!
//! ```sh
//! export QIVR_ENV=production
//! RUST_LOG=qivr_api_client=debug cargo run --bin api-probe -- /appointments
//! ```

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: api-probe <path>");
        eprintln!();
        eprintln!("  Example: api-probe /patients");
        std::process::exit(2);
    });

    let client = qivr_api::default_client().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    println!("GET {}\n", client.url(&path));

    match client.get_json::<serde_json::Value>(&path).await {
        Ok(body) => {
            let rendered = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            println!("{rendered}");
        }
        Err(e) => {
            eprintln!("{} ({})", e.message, e.kind.as_str());
            if let Some(status) = e.status {
                eprintln!("  HTTP status: {status}");
            }
            std::process::exit(1);
        }
    }
}
