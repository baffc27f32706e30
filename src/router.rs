//! Built-in commands.
//!
//! Requests are matched against a fixed keyword table: the query is
//! lowercased and the first entry whose keyword appears anywhere in it wins.
//! Anything that matches no keyword is left for the chat fallback.

use std::sync::Arc;

use crate::launcher::App;
use crate::listener::Listener;
use crate::services::{Collaborators, ServiceError};
use crate::tts_engine::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Launch(App),
    IpAddress,
    Wikipedia,
    YouTube,
    GoogleSearch,
    SendMessage,
    SendEmail,
    Joke,
    Advice,
    TrendingMovies,
    News,
    Weather,
    Exit,
}

impl Command {
    /// What the command does, phrased to fit "I couldn't ...".
    fn describe(self) -> String {
        match self {
            Command::Launch(app) => format!("open {}", app.label()),
            Command::IpAddress => "find your IP address".into(),
            Command::Wikipedia => "search Wikipedia".into(),
            Command::YouTube => "play that on YouTube".into(),
            Command::GoogleSearch => "search Google".into(),
            Command::SendMessage => "send the message".into(),
            Command::SendEmail => "send the email".into(),
            Command::Joke => "think of a joke".into(),
            Command::Advice => "find any advice".into(),
            Command::TrendingMovies => "fetch the trending movies".into(),
            Command::News => "fetch the news".into(),
            Command::Weather => "get the weather report".into(),
            Command::Exit => "say goodbye".into(),
        }
    }
}

#[derive(Debug)]
pub struct Entry {
    pub keyword: &'static str,
    pub command: Command,
    /// Spoken as soon as the command is recognised. For commands that need
    /// more input this is the first follow-up question.
    pub announcement: Option<&'static str>,
}

const fn entry(keyword: &'static str, command: Command, announcement: Option<&'static str>) -> Entry {
    Entry {
        keyword,
        command,
        announcement,
    }
}

/// Checked top to bottom; the first keyword found in the query wins.
pub const TABLE: &[Entry] = &[
    entry("open notepad", Command::Launch(App::Notepad), Some("Opening notepad.")),
    entry("open discord", Command::Launch(App::Discord), Some("Opening Discord.")),
    entry(
        "open command prompt",
        Command::Launch(App::CommandPrompt),
        Some("Opening the command prompt."),
    ),
    entry("open cmd", Command::Launch(App::CommandPrompt), Some("Opening the command prompt.")),
    entry("open camera", Command::Launch(App::Camera), Some("Opening the camera.")),
    entry("open calculator", Command::Launch(App::Calculator), Some("Opening the calculator.")),
    entry("ip address", Command::IpAddress, None),
    entry(
        "wikipedia",
        Command::Wikipedia,
        Some("What do you want to search on Wikipedia?"),
    ),
    entry("youtube", Command::YouTube, Some("What do you want to play on YouTube?")),
    entry(
        "search on google",
        Command::GoogleSearch,
        Some("What do you want to search on Google?"),
    ),
    entry("send a message", Command::SendMessage, Some("Who should I send it to? Tell me the number.")),
    entry("send an email", Command::SendEmail, Some("What is the email address?")),
    entry("joke", Command::Joke, None),
    entry("advice", Command::Advice, None),
    entry("trending movies", Command::TrendingMovies, None),
    entry("news", Command::News, None),
    entry("weather", Command::Weather, Some("Getting the weather report for your city.")),
    entry(
        "screenshot",
        Command::Launch(App::Screenshot),
        Some("Opening the screenshot software."),
    ),
    entry("goodbye", Command::Exit, None),
    entry("bye", Command::Exit, None),
];

pub fn match_command(query: &str) -> Option<&'static Entry> {
    let query = query.to_lowercase();
    TABLE.iter().find(|entry| query.contains(entry.keyword))
}

/// Outcome of offering a request to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled,
    Unhandled,
    /// The user said goodbye; the caller should save the session and stop.
    Exit,
}

enum Failure {
    /// A follow-up question got no usable answer.
    NoAnswer,
    Service(ServiceError),
}

impl From<ServiceError> for Failure {
    fn from(e: ServiceError) -> Self {
        Failure::Service(e)
    }
}

pub struct Router {
    services: Arc<dyn Collaborators>,
    speaker: Speaker,
    user_name: String,
}

impl Router {
    pub fn new(services: Arc<dyn Collaborators>, speaker: Speaker, user_name: &str) -> Self {
        Self {
            services,
            speaker,
            user_name: user_name.to_string(),
        }
    }

    /// Run the first command matching `query`. Follow-up questions are
    /// answered through `input`.
    pub async fn route(&self, query: &str, input: &mut dyn Listener) -> Routed {
        let Some(entry) = match_command(query) else {
            return Routed::Unhandled;
        };
        log::info!("Command {:?} matched keyword {:?}", entry.command, entry.keyword);

        if let Some(announcement) = entry.announcement {
            self.speaker.speak(announcement).await;
        }
        match self.execute(entry.command, input).await {
            Ok(routed) => routed,
            Err(Failure::NoAnswer) => {
                self.speaker.speak("Sorry, I couldn't get that.").await;
                Routed::Handled
            }
            Err(Failure::Service(e)) => {
                log::warn!("Command {:?} failed: {e}", entry.command);
                let apology = format!("Sorry, I couldn't {} right now.", entry.command.describe());
                self.speaker.speak(&apology).await;
                Routed::Handled
            }
        }
    }

    async fn ask(&self, input: &mut dyn Listener, question: Option<&str>) -> Result<String, Failure> {
        if let Some(question) = question {
            self.speaker.speak(question).await;
        }
        let answer = input.listen().await.ok_or(Failure::NoAnswer)?;
        log::debug!("Follow-up answer: {answer:?}");
        Ok(answer)
    }

    async fn execute(&self, command: Command, input: &mut dyn Listener) -> Result<Routed, Failure> {
        let services = self.services.as_ref();
        let speaker = &self.speaker;
        match command {
            Command::Launch(app) => services.launch(app).await?,
            Command::IpAddress => {
                let ip = services.public_ip().await?;
                speaker.speak(&format!("Your IP Address is {ip}.")).await;
            }
            Command::Wikipedia => {
                let topic = self.ask(input, None).await?;
                let summary = services.wikipedia_summary(&topic).await?;
                speaker.speak(&format!("According to Wikipedia, {summary}")).await;
            }
            Command::YouTube => {
                let video = self.ask(input, None).await?;
                services.play_on_youtube(&video).await?;
            }
            Command::GoogleSearch => {
                let query = self.ask(input, None).await?;
                let results = services.web_search(&query).await?;
                speaker.speak("Here is what I found on Google.").await;
                println!("{results}");
            }
            Command::SendMessage => {
                let number = self.ask(input, None).await?;
                let message = self.ask(input, Some("What is the message?")).await?;
                services.send_message(&number, &message).await?;
                speaker.speak("Message sent.").await;
            }
            Command::SendEmail => {
                let to = spoken_address(&self.ask(input, None).await?);
                let subject = capitalize(&self.ask(input, Some("What should be the subject?")).await?);
                let body = capitalize(&self.ask(input, Some("What is the message?")).await?);
                services.send_email(&to, &subject, &body).await?;
                speaker.speak("Email sent.").await;
            }
            Command::Joke => speaker.speak(&services.joke().await?).await,
            Command::Advice => speaker.speak(&services.advice().await?).await,
            Command::TrendingMovies => {
                let movies = services.trending_movies().await?;
                speaker
                    .speak(&format!("Some trending movies are: {}", movies.join(", ")))
                    .await;
            }
            Command::News => {
                let headlines = services.news_headlines().await?;
                speaker.speak("Here are the latest news headlines.").await;
                for headline in &headlines {
                    speaker.speak(headline).await;
                }
            }
            Command::Weather => {
                let report = services.weather().await?;
                speaker
                    .speak(&format!(
                        "The current temperature in {} is {}, but it feels like {}. \
                         The weather report states: {}",
                        report.city, report.temperature, report.feels_like, report.description
                    ))
                    .await;
            }
            Command::Exit => {
                speaker
                    .speak(&format!("Bye bye {}, see you later!", self.user_name))
                    .await;
                return Ok(Routed::Exit);
            }
        }
        Ok(Routed::Handled)
    }
}

/// Turn a dictated address ("jane dot doe at example dot com") into a
/// usable one. Typed addresses pass through unchanged.
fn spoken_address(text: &str) -> String {
    let text = format!(" {} ", text.trim().to_lowercase());
    text.replace(" at ", "@")
        .replace(" dot ", ".")
        .split_whitespace()
        .collect()
}

/// Upper-case the first letter and lower-case the rest.
fn capitalize(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}
