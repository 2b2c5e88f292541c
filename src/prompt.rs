//! Interactive collection of sharing settings

use inquire::error::CustomUserError;
use inquire::validator::Validation;
use inquire::{CustomType, InquireError, Password, PasswordDisplayMode, Text};
use std::path::PathBuf;

use crate::config::ServerConfig;

/// Ask for every setting, pre-filled from `defaults`
///
/// Leaving the password empty keeps the current one.
pub fn prompt_config(defaults: &ServerConfig) -> Result<ServerConfig, InquireError> {
    let username = Text::new("FTP username:")
        .with_default(&defaults.username)
        .prompt()?;

    let password = Password::new("FTP password:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .with_help_message("leave empty to keep the current password")
        .without_confirmation()
        .prompt()?;

    let directory = Text::new("Directory to share:")
        .with_default(&defaults.directory.display().to_string())
        .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
            Ok(check_directory(input))
        })
        .prompt()?;

    let ftp_port = CustomType::<u16>::new("FTP port:")
        .with_default(defaults.ftp_port)
        .with_error_message("Enter a port number between 1024 and 65535")
        .prompt()?;

    let http_port = CustomType::<u16>::new("HTTP port:")
        .with_default(defaults.http_port)
        .with_error_message("Enter a port number between 1024 and 65535")
        .prompt()?;

    let mut config = defaults.clone();
    config.set_credentials(username, keep_or_replace(password, &defaults.password));
    config.set_directory(expand_directory(&directory));
    config.set_ports(ftp_port, http_port);
    Ok(config)
}

fn keep_or_replace(input: String, current: &str) -> String {
    if input.is_empty() {
        current.to_string()
    } else {
        input
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_directory(input: &str) -> PathBuf {
    let input = input.trim();
    if input == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(input)
}

fn check_directory(input: &str) -> Validation {
    let path = expand_directory(input);
    if path.is_dir() {
        Validation::Valid
    } else {
        Validation::Invalid(format!("{} is not an existing directory", path.display()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_password_keeps_current() {
        assert_eq!(keep_or_replace(String::new(), "pass"), "pass");
        assert_eq!(keep_or_replace("new".to_string(), "pass"), "new");
    }

    #[test]
    fn test_expand_directory() {
        assert_eq!(expand_directory(" /srv/share "), PathBuf::from("/srv/share"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_directory("~"), home);
            assert_eq!(expand_directory("~/music"), home.join("music"));
        }
    }

    #[test]
    fn test_check_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            check_directory(&dir.path().display().to_string()),
            Validation::Valid
        ));

        let missing = dir.path().join("missing");
        assert!(matches!(
            check_directory(&missing.display().to_string()),
            Validation::Invalid(_)
        ));
    }
}
