//! Backend endpoint paths and defaults

/// Refresh exchange path, appended to the auth base URL
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Default reauthentication entry point in the application
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Default credential file name, relative to the working directory
pub const DEFAULT_CREDENTIALS_FILE: &str = "kisan-session.json";
