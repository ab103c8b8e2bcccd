pub mod settings;

pub use settings::{
    ClassifierConfig, DefaultResponseMode, LlmConfig, LogFormat, LoggingConfig, PromptsConfig,
    ServerConfig, SessionConfig, Settings,
};
