//! Session bootstrap.
//!
//! Before the game connection can be opened the client needs the current
//! game version, which is scraped from the web client's scripts, and a
//! session issued by the server-list servlet.

use crate::chain::Chain;
use crate::error::RequestError;
use crate::http::{HttpClient, HttpConfig, HttpResponse};
use warbot_protocol::{Session, ValueExt};

/// Generates a random device temp id (RFC 4122 version 4, lowercase).
pub fn generate_temp_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Bootstrap calls against the web origin and the server list.
#[derive(Clone)]
pub struct Bootstrap {
    http: HttpClient,
    web_origin: String,
    server_list_url: String,
}

impl Bootstrap {
    /// Creates a bootstrapper. Requests carry `<web_origin>/index.html` as referer.
    pub fn new(
        config: HttpConfig,
        web_origin: impl Into<String>,
        server_list_url: impl Into<String>,
    ) -> Self {
        let web_origin = web_origin.into().trim_end_matches('/').to_string();
        let config = config.with_referer(format!("{}/index.html", web_origin));
        Self {
            http: HttpClient::new(config),
            web_origin,
            server_list_url: server_list_url.into(),
        }
    }

    pub fn web_origin(&self) -> &str {
        &self.web_origin
    }

    /// Resolves the game version: index page, settings script, main script.
    pub fn request_game_version(&self) -> Chain<String> {
        let origin = self.web_origin.clone();
        let http = self.http.clone();
        let index_url = format!(
            "{}/index.html?t={}",
            origin,
            chrono::Utc::now().timestamp() / 120
        );

        let settings_origin = origin.clone();
        let main_http = http.clone();
        self.http
            .get(index_url)
            .and_then(move |response| {
                let body = response.text();
                let settings = extract_settings_script(&body)
                    .ok_or_else(|| RequestError::api("settings script not found in index page"))?;
                Ok(format!("{}/src/{}", settings_origin, settings))
            })
            .then_request(move |settings_url| {
                tracing::debug!("Settings script: {}", settings_url);
                http.get(settings_url).and_then(|response| {
                    extract_main_version(&response.text())
                        .map(str::to_string)
                        .ok_or_else(|| RequestError::api("main script version not found"))
                })
            })
            .then_request(move |main_version| {
                tracing::debug!("Main script version: {}", main_version);
                main_http
                    .get(format!("{}/assets/main/index.{}.js", origin, main_version))
                    .and_then(|response| {
                        extract_app_version(&response.text())
                            .map(str::to_string)
                            .ok_or_else(|| RequestError::api("app_version not found"))
                    })
            })
    }

    /// Exchanges a login token for a game session.
    pub fn request_session(&self, version: &str, token: &str) -> Chain<Session> {
        let query = [
            ("__ts__", chrono::Utc::now().timestamp_millis().to_string()),
            ("token", token.to_string()),
            ("pf", "web_pc".to_string()),
            ("platform", "webgame".to_string()),
            ("channel", "webgame_webgameCn".to_string()),
            ("appVersion", version.to_string()),
            ("tag", "1".to_string()),
            ("rvflag", "0".to_string()),
            ("lang", "zh_cn".to_string()),
            ("systemCountryCode", "CN".to_string()),
            ("systemLang", "zh_cn".to_string()),
            ("code", token.to_string()),
        ];
        self.http
            .get_with_query(&self.server_list_url, &query)
            .and_then(parse_session)
    }
}

fn parse_session(response: HttpResponse) -> Result<Session, RequestError> {
    let doc = response.document();
    let token = doc.get("serverInfoToken").text();
    if token.is_empty() {
        return Err(RequestError::api("serverInfoToken missing from server list"));
    }
    Ok(Session {
        server_id: doc.get("serverId").int() as i32,
        server_url: doc.get("url").text().to_string(),
        auth_token: token.to_string(),
        device_temp_id: generate_temp_id(),
    })
}

fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_lowercase()
}

/// Finds `"src/(settings.<id>.js)"` and returns the captured file name.
pub fn extract_settings_script(content: &str) -> Option<&str> {
    const PREFIX: &str = "\"src/";
    let mut rest = content;
    while let Some(pos) = rest.find(PREFIX) {
        let start = pos + PREFIX.len();
        let candidate = &rest[start..];
        if let Some(tail) = candidate.strip_prefix("settings.") {
            let id_len = tail.find(|c: char| !is_lower_alnum(c)).unwrap_or(tail.len());
            if id_len > 0 && tail[id_len..].starts_with(".js\"") {
                let len = "settings.".len() + id_len + ".js".len();
                return Some(&candidate[..len]);
            }
        }
        rest = &rest[start..];
    }
    None
}

/// Finds `main"?\s*:\s*"([0-9a-z]+)"`.
pub fn extract_main_version(content: &str) -> Option<&str> {
    extract_keyed(content, "main", is_lower_alnum)
}

/// Finds `app_version"?\s*:\s*"([^"]+)"`.
pub fn extract_app_version(content: &str) -> Option<&str> {
    extract_keyed(content, "app_version", |c| c != '"')
}

/// Matches `<key>"?\s*:\s*"(<accept>+)"` at the first position where it fits.
fn extract_keyed<'a>(content: &'a str, key: &str, accept: fn(char) -> bool) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(pos) = content[offset..].find(key) {
        let after_key = offset + pos + key.len();
        if let Some(value) = match_value(&content[after_key..], accept) {
            return Some(value);
        }
        offset = after_key;
    }
    None
}

fn match_value(s: &str, accept: fn(char) -> bool) -> Option<&str> {
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.trim_start().strip_prefix(':')?;
    let s = s.trim_start().strip_prefix('"')?;
    let len = s.find(|c: char| !accept(c)).unwrap_or(s.len());
    if len == 0 || !s[len..].starts_with('"') {
        return None;
    }
    Some(&s[..len])
}
