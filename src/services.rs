//! Outside services behind the built-in commands.
//!
//! The command router only sees the [`Collaborators`] trait: each operation
//! takes a request and returns a plain value or a [`ServiceError`]. The
//! production implementation, [`OnlineServices`], calls public web APIs with
//! `reqwest`, hands URLs to the default browser and launches desktop
//! applications.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::launcher::{self, App};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} is not configured")]
    MissingKey(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("could not launch {app}: {reason}")]
    Launch { app: &'static str, reason: String },
    #[error("email failed: {0}")]
    Email(String),
    #[error("{0} is not available")]
    Unsupported(&'static str),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub description: String,
    pub temperature: String,
    pub feels_like: String,
}

/// Everything the command router and the chat search step may call.
///
/// Every method defaults to [`ServiceError::Unsupported`] so partial
/// implementations only provide what they can do.
#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn public_ip(&self) -> ServiceResult<String> {
        Err(ServiceError::Unsupported("IP lookup"))
    }

    async fn weather(&self) -> ServiceResult<WeatherReport> {
        Err(ServiceError::Unsupported("weather"))
    }

    async fn news_headlines(&self) -> ServiceResult<Vec<String>> {
        Err(ServiceError::Unsupported("news"))
    }

    async fn trending_movies(&self) -> ServiceResult<Vec<String>> {
        Err(ServiceError::Unsupported("trending movies"))
    }

    async fn joke(&self) -> ServiceResult<String> {
        Err(ServiceError::Unsupported("jokes"))
    }

    async fn advice(&self) -> ServiceResult<String> {
        Err(ServiceError::Unsupported("advice"))
    }

    async fn wikipedia_summary(&self, _topic: &str) -> ServiceResult<String> {
        Err(ServiceError::Unsupported("Wikipedia"))
    }

    async fn web_search(&self, _query: &str) -> ServiceResult<String> {
        Err(ServiceError::Unsupported("web search"))
    }

    async fn play_on_youtube(&self, _query: &str) -> ServiceResult<()> {
        Err(ServiceError::Unsupported("YouTube"))
    }

    async fn send_message(&self, _number: &str, _message: &str) -> ServiceResult<()> {
        Err(ServiceError::Unsupported("messaging"))
    }

    async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> ServiceResult<()> {
        Err(ServiceError::Unsupported("email"))
    }

    async fn launch(&self, _app: App) -> ServiceResult<()> {
        Err(ServiceError::Unsupported("application launching"))
    }
}

#[derive(Debug, Clone)]
pub struct EmailAccount {
    pub address: String,
    pub password: String,
    pub relay: String,
}

/// API keys and per-user settings.
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub openweather_key: Option<String>,
    pub news_key: Option<String>,
    pub news_country: String,
    pub tmdb_key: Option<String>,
    pub serpapi_key: Option<String>,
    pub whatsapp_country_code: String,
    pub email: Option<EmailAccount>,
}

/// Base URLs of the web APIs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ip: String,
    pub ip_city: String,
    pub weather: String,
    pub news: String,
    pub movies: String,
    pub joke: String,
    pub advice: String,
    pub wikipedia: String,
    pub search: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ip: "https://api64.ipify.org?format=json".into(),
            ip_city: "https://ipapi.co".into(),
            weather: "https://api.openweathermap.org/data/2.5/weather".into(),
            news: "https://newsapi.org/v2/top-headlines".into(),
            movies: "https://api.themoviedb.org/3/trending/movie/day".into(),
            joke: "https://icanhazdadjoke.com/".into(),
            advice: "https://api.adviceslip.com/advice".into(),
            wikipedia: "https://en.wikipedia.org/api/rest_v1/page/summary".into(),
            search: "https://serpapi.com/search".into(),
        }
    }
}

const HEADLINE_LIMIT: usize = 5;
const SEARCH_RESULTS: usize = 3;

#[derive(Deserialize)]
struct IpReply {
    ip: String,
}

#[derive(Deserialize)]
struct WeatherReply {
    weather: Vec<WeatherCondition>,
    main: WeatherMain,
}

#[derive(Deserialize)]
struct WeatherCondition {
    main: String,
}

#[derive(Deserialize)]
struct WeatherMain {
    temp: f64,
    feels_like: f64,
}

#[derive(Deserialize)]
struct NewsReply {
    articles: Vec<Article>,
}

#[derive(Deserialize)]
struct Article {
    title: String,
}

#[derive(Deserialize)]
struct MoviesReply {
    results: Vec<Movie>,
}

#[derive(Deserialize)]
struct Movie {
    original_title: String,
}

#[derive(Deserialize)]
struct JokeReply {
    joke: String,
}

#[derive(Deserialize)]
struct AdviceReply {
    slip: Slip,
}

#[derive(Deserialize)]
struct Slip {
    advice: String,
}

#[derive(Deserialize)]
struct WikiSummary {
    extract: String,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    title: Option<String>,
    snippet: Option<String>,
    link: Option<String>,
}

pub struct OnlineServices {
    client: reqwest::Client,
    settings: ServiceSettings,
    endpoints: Endpoints,
}

impl OnlineServices {
    pub fn new(settings: ServiceSettings) -> anyhow::Result<Self> {
        Self::with_endpoints(settings, Endpoints::default())
    }

    pub fn with_endpoints(settings: ServiceSettings, endpoints: Endpoints) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("jarvis/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            settings,
            endpoints,
        })
    }

    /// Send `request` and decode the body as JSON regardless of the
    /// advertised content type.
    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ServiceResult<T> {
        let body = request.send().await?.error_for_status()?.text().await?;
        serde_json::from_str(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    async fn city_of(&self, ip: &str) -> ServiceResult<String> {
        let url = format!("{}/{ip}/city/", self.endpoints.ip_city.trim_end_matches('/'));
        let city = self
            .client
            .get(url)
            .timeout(Duration::from_secs(3))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let city = city.trim();
        if city.is_empty() {
            return Err(ServiceError::Malformed("empty city".into()));
        }
        Ok(city.to_string())
    }

    fn open_url(url: &str) -> ServiceResult<()> {
        log::info!("Opening {url}");
        open::that_detached(url).map_err(|e| ServiceError::Launch {
            app: "the web browser",
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Collaborators for OnlineServices {
    async fn public_ip(&self) -> ServiceResult<String> {
        let reply: IpReply = self
            .fetch(self.client.get(&self.endpoints.ip).timeout(Duration::from_secs(3)))
            .await?;
        Ok(reply.ip)
    }

    async fn weather(&self) -> ServiceResult<WeatherReport> {
        let key = self
            .settings
            .openweather_key
            .as_deref()
            .ok_or(ServiceError::MissingKey("OPENWEATHER_APP_ID"))?;
        let ip = self.public_ip().await?;
        let city = self.city_of(&ip).await?;
        let reply: WeatherReply = self
            .fetch(self.client.get(&self.endpoints.weather).query(&[
                ("q", city.as_str()),
                ("appid", key),
                ("units", "metric"),
            ]))
            .await?;
        let description = reply
            .weather
            .into_iter()
            .next()
            .map(|w| w.main)
            .ok_or_else(|| ServiceError::Malformed("no weather conditions".into()))?;
        Ok(WeatherReport {
            city,
            description,
            temperature: format!("{}℃", reply.main.temp),
            feels_like: format!("{}℃", reply.main.feels_like),
        })
    }

    async fn news_headlines(&self) -> ServiceResult<Vec<String>> {
        let key = self
            .settings
            .news_key
            .as_deref()
            .ok_or(ServiceError::MissingKey("NEWS_API_KEY"))?;
        let reply: NewsReply = self
            .fetch(self.client.get(&self.endpoints.news).query(&[
                ("country", self.settings.news_country.as_str()),
                ("category", "general"),
                ("apiKey", key),
            ]))
            .await?;
        Ok(reply
            .articles
            .into_iter()
            .map(|a| a.title)
            .take(HEADLINE_LIMIT)
            .collect())
    }

    async fn trending_movies(&self) -> ServiceResult<Vec<String>> {
        let key = self
            .settings
            .tmdb_key
            .as_deref()
            .ok_or(ServiceError::MissingKey("TMDB_API_KEY"))?;
        let reply: MoviesReply = self
            .fetch(self.client.get(&self.endpoints.movies).query(&[("api_key", key)]))
            .await?;
        Ok(reply
            .results
            .into_iter()
            .map(|m| m.original_title)
            .take(HEADLINE_LIMIT)
            .collect())
    }

    async fn joke(&self) -> ServiceResult<String> {
        let reply: JokeReply = self
            .fetch(
                self.client
                    .get(&self.endpoints.joke)
                    .header(reqwest::header::ACCEPT, "application/json"),
            )
            .await?;
        Ok(reply.joke)
    }

    async fn advice(&self) -> ServiceResult<String> {
        let reply: AdviceReply = self.fetch(self.client.get(&self.endpoints.advice)).await?;
        Ok(reply.slip.advice)
    }

    async fn wikipedia_summary(&self, topic: &str) -> ServiceResult<String> {
        let title = topic.trim().replace(' ', "_");
        if title.is_empty() {
            return Err(ServiceError::Malformed("empty Wikipedia topic".into()));
        }
        let url = format!(
            "{}/{}",
            self.endpoints.wikipedia.trim_end_matches('/'),
            urlencoding::encode(&title)
        );
        let reply: WikiSummary = self.fetch(self.client.get(url)).await?;
        Ok(first_sentences(&reply.extract, 2))
    }

    async fn web_search(&self, query: &str) -> ServiceResult<String> {
        let key = self
            .settings
            .serpapi_key
            .as_deref()
            .ok_or(ServiceError::MissingKey("SERPAPI_KEY"))?;
        let num = SEARCH_RESULTS.to_string();
        let reply: SearchReply = self
            .fetch(self.client.get(&self.endpoints.search).query(&[
                ("q", query),
                ("api_key", key),
                ("engine", "google"),
                ("num", num.as_str()),
                ("hl", "en"),
            ]))
            .await?;
        Ok(format_search_results(&reply.organic_results))
    }

    async fn play_on_youtube(&self, query: &str) -> ServiceResult<()> {
        Self::open_url(&youtube_url(query))
    }

    async fn send_message(&self, number: &str, message: &str) -> ServiceResult<()> {
        Self::open_url(&whatsapp_url(
            &self.settings.whatsapp_country_code,
            number,
            message,
        ))
    }

    #[cfg(feature = "email")]
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ServiceResult<()> {
        use lettre::message::Mailbox;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let account = self
            .settings
            .email
            .as_ref()
            .ok_or(ServiceError::MissingKey("EMAIL/PASSWORD"))?;
        let from: Mailbox = account
            .address
            .parse()
            .map_err(|e| ServiceError::Email(format!("invalid sender address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| ServiceError::Email(format!("invalid recipient {to}: {e}")))?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| ServiceError::Email(e.to_string()))?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.relay)
            .map_err(|e| ServiceError::Email(e.to_string()))?
            .credentials(Credentials::new(
                account.address.clone(),
                account.password.clone(),
            ))
            .build();
        mailer
            .send(message)
            .await
            .map_err(|e| ServiceError::Email(e.to_string()))?;
        Ok(())
    }

    async fn launch(&self, app: App) -> ServiceResult<()> {
        tokio::task::spawn_blocking(move || launcher::launch(app))
            .await
            .map_err(|e| ServiceError::Launch {
                app: app.label(),
                reason: e.to_string(),
            })?
    }
}

/// The first `count` sentences of `text`.
fn first_sentences(text: &str, count: usize) -> String {
    let mut seen = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                seen += 1;
                if seen == count {
                    return text[..i + c.len_utf8()].trim().to_string();
                }
            }
        }
    }
    text.trim().to_string()
}

fn format_search_results(results: &[OrganicResult]) -> String {
    let formatted: Vec<String> = results
        .iter()
        .take(SEARCH_RESULTS)
        .map(|r| {
            format!(
                "{}\n{}\nLink: {}",
                r.title.as_deref().unwrap_or("No title"),
                r.snippet.as_deref().unwrap_or("No description"),
                r.link.as_deref().unwrap_or("No link"),
            )
        })
        .collect();
    if formatted.is_empty() {
        "No results found on Google.".to_string()
    } else {
        formatted.join("\n\n")
    }
}

fn youtube_url(query: &str) -> String {
    format!(
        "https://www.youtube.com/results?search_query={}",
        urlencoding::encode(query.trim())
    )
}

/// WhatsApp Web link for `number`, prefixed with `country_code` unless the
/// number already carries one.
fn whatsapp_url(country_code: &str, number: &str, message: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let phone = if number.trim_start().starts_with('+') {
        format!("+{digits}")
    } else {
        format!("{country_code}{digits}")
    };
    format!(
        "https://web.whatsapp.com/send?phone={}&text={}",
        urlencoding::encode(&phone),
        urlencoding::encode(message)
    )
}
