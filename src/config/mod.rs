mod settings;

pub use settings::{
    api_token, CloudflareConfig, LoggingConfig, NotificationConfig, ResolverConfig, Settings,
    StateConfig, TOKEN_ENV,
};
