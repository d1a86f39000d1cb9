//! Fetch a URL twice through the cache and print where each answer came
//! from.
//!
//! ```sh
//! RUST_LOG=hcache=debug cargo run -p hcache --example cached_fetch --features http,fjall \
//!     -- https://httpbin.org/cache/60
//! ```
use hcache::config::http::{HttpClientParams, build_http_client};
use hcache::{CacheProvenance, CacheSettings, Configurable, build_transport};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "https://httpbin.org/cache/60";

struct App {
    config: serde_yaml::Value,
}

impl Configurable for App {
    fn config(&self) -> &serde_yaml::Value {
        &self.config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hcache=debug")),
        )
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let config_path = concat!(env!("CARGO_MANIFEST_DIR"), "/../demos/config.yml");
    let app = App {
        config: App::load_config(config_path)?,
    };

    let settings = CacheSettings::from_config(&app)?;

    let params = HttpClientParams::from_config(&app.config["http"], "hcache-demo/0.1")?;
    let client = build_http_client(params)?;
    let transport = build_transport(client, &settings).await?;

    for attempt in 1..=2 {
        let request = http::Request::get(url.as_str()).body(bytes::Bytes::new())?;
        let response = transport.intercept(request).await?;
        let provenance = response
            .extensions()
            .get::<CacheProvenance>()
            .copied()
            .unwrap_or(CacheProvenance::NotFromCache);
        tracing::info!(
            attempt,
            status = %response.status(),
            bytes = response.body().len(),
            %provenance,
            "Fetched {url}"
        );
    }
    Ok(())
}
