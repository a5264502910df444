//! Terminal input.

use std::io::{self, BufRead, Write};

use zeroize::Zeroizing;

use colter_core::auth::PasswordPrompt;
use colter_core::CredentialError;

/// Questions asked by the interactive setup
pub trait Ask {
    /// A line of text; blank input yields `default` (or an empty string)
    fn line(&self, question: &str, default: Option<&str>) -> io::Result<String>;

    /// Hidden input
    fn secret(&self, question: &str) -> io::Result<Zeroizing<String>>;

    fn confirm(&self, question: &str, default: bool) -> io::Result<bool>;
}

/// Reads from the controlling terminal
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self, message: &str) -> Result<Zeroizing<String>, CredentialError> {
        rpassword::prompt_password(message)
            .map(Zeroizing::new)
            .map_err(CredentialError::Prompt)
    }
}

fn read_line(prompt: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
    }
    Ok(input.trim().to_string())
}

impl Ask for TerminalPrompt {
    fn line(&self, question: &str, default: Option<&str>) -> io::Result<String> {
        let prompt = match default {
            Some(d) if !d.is_empty() => format!("{} [{}]: ", question, d),
            _ => format!("{}: ", question),
        };
        let answer = read_line(&prompt)?;
        if answer.is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer)
        }
    }

    fn secret(&self, question: &str) -> io::Result<Zeroizing<String>> {
        rpassword::prompt_password(format!("{}: ", question)).map(Zeroizing::new)
    }

    fn confirm(&self, question: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            let answer = read_line(&format!("{} [{}]: ", question, hint))?;
            match parse_yes_no(&answer, default) {
                Some(value) => return Ok(value),
                None => println!("Please answer y or n."),
            }
        }
    }
}

/// `None` for anything that is not a yes/no answer
pub fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("", true), Some(true));
        assert_eq!(parse_yes_no("", false), Some(false));
        assert_eq!(parse_yes_no(" YES ", false), Some(true));
        assert_eq!(parse_yes_no("n", true), Some(false));
        assert_eq!(parse_yes_no("maybe", true), None);
    }
}
