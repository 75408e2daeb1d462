use std::env;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_PROJECT_KEY: &str = "UAAS";

/// Runtime configuration, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Base URL of the relay the pipeline talks to. Defaults to the
    /// colocated relay served by this process.
    pub backend_url: String,
    pub xray_base_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Jira project key used as the filename prefix and test-key prefix.
    pub project_key: String,
}

impl AppConfig {
    pub fn from_env() -> AppConfig {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        AppConfig {
            port,
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            xray_base_url: non_empty(env::var("XRAY_BASE_URL").ok()),
            client_id: non_empty(env::var("XRAY_CLIENT_ID").ok()),
            client_secret: non_empty(env::var("XRAY_CLIENT_SECRET").ok()),
            project_key: non_empty(env::var("PROJECT_KEY").ok())
                .unwrap_or_else(|| DEFAULT_PROJECT_KEY.to_string()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.xray_base_url.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_credentials_do_not_count() {
        let config = AppConfig {
            port: DEFAULT_PORT,
            backend_url: "http://localhost:3001".to_string(),
            xray_base_url: Some("https://xray.cloud.getxray.app".to_string()),
            client_id: Some("id".to_string()),
            client_secret: None,
            project_key: DEFAULT_PROJECT_KEY.to_string(),
        };
        assert!(!config.has_credentials());
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }
}
