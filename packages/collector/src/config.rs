use serde::Deserialize;
use std::env;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub listen_url: String,
    pub max_body_size: usize,
    pub cors_allowed_origins: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    /// Maximum payloads retained per endpoint; the oldest is evicted beyond this.
    pub history_capacity: usize,
    /// Maximum number of live endpoints; creation is rejected past this.
    pub endpoint_ceiling: usize,
    /// Allowed actions per client per rate window.
    pub rate_limit_max: u32,
    pub rate_limit_window_seconds: u64,
    /// Per-subscriber buffered payloads before a laggard starts dropping.
    pub sse_buffer_size: usize,
}

impl Settings {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        let server_port: u16 = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let settings = Settings {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: server_port,
                listen_url: env::var("LISTEN_URL")
                    .unwrap_or_else(|_| format!("http://localhost:{}", server_port)),
                max_body_size: env::var("MAX_BODY_SIZE")
                    .unwrap_or_else(|_| "10485760".to_string())
                    .parse()
                    .unwrap_or(10_485_760), // 10 MB
                cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string()),
            },
            capture: CaptureSettings {
                history_capacity: env::var("HISTORY_CAPACITY")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                endpoint_ceiling: env::var("ENDPOINT_CEILING")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
                rate_limit_max: env::var("RATE_LIMIT_MAX")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                rate_limit_window_seconds: env::var("RATE_LIMIT_WINDOW_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                sse_buffer_size: env::var("SSE_BUFFER_SIZE")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .unwrap_or(256),
            },
        };

        Ok(settings)
    }
}
