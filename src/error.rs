use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Serenity error: {0}")]
    Serenity(Box<poise::serenity_prelude::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("QnA API error ({status}): {message}")]
    QnaApi {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<poise::serenity_prelude::Error> for BotError {
    fn from(err: poise::serenity_prelude::Error) -> Self {
        BotError::Serenity(Box::new(err))
    }
}

impl BotError {
    /// Returns a user-friendly error message suitable for displaying in Discord
    pub fn user_message(&self) -> String {
        match self {
            BotError::Serenity(_) => {
                "Sorry, I'm having trouble communicating with Discord right now. Please try again later.".to_string()
            }
            BotError::Config(_) | BotError::EnvVar(_) | BotError::Url(_) => {
                "Sorry, there's a configuration issue on my end. Please contact the bot administrator.".to_string()
            }
            BotError::QnaApi { status, .. } => match *status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    "Sorry, I can't reach my knowledge base right now. Please contact the bot administrator.".to_string()
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    "Sorry, I'm getting too many questions at once. Please try again in a few moments.".to_string()
                }
                status if status.is_server_error() => {
                    "Sorry, my knowledge base is having issues right now. Please try again later.".to_string()
                }
                _ => "Sorry, something went wrong while looking up your answer. Please try again.".to_string(),
            },
            BotError::Reqwest(_) => {
                "Sorry, I'm having network issues. Please try again in a moment.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
