use std::env;
use std::error::Error;
use std::str::FromStr;

/// Read an environment variable, treating blank values as unset
pub fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset
pub fn parse_env<T>(name: &str, default: T) -> Result<T, Box<dyn Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional_env(name)?.unwrap_or(default))
}

/// Parse an optional environment variable
pub fn parse_optional_env<T>(name: &str) -> Result<Option<T>, Box<dyn Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} ('{raw}'): {e}").into()),
        None => Ok(None),
    }
}
