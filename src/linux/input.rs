//! Operator input: hostname, team addresses and domain controllers.

use crate::utils::error::HardenError;
use crate::utils::tools::prompt_line;
use log::debug;
use std::io;

/// Answers as the operator typed them. Nothing here has been validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawInput {
    pub hostname: String,
    pub team: String,
    pub domain_controllers: String,
}

pub trait InputSource {
    /// Gathers one run's input. `default_hostname` is what the host reports
    /// about itself; domain controllers are only asked for when the host is
    /// domain-joined.
    fn collect(
        &mut self,
        default_hostname: Option<&str>,
        domain_joined: bool,
    ) -> Result<RawInput, HardenError>;
}

/// Interactive questions on the terminal.
pub struct Prompt<F> {
    ask: F,
}

impl Prompt<fn(&str) -> io::Result<String>> {
    pub fn stdin() -> Self {
        Prompt { ask: prompt_line }
    }
}

impl<F> Prompt<F>
where
    F: FnMut(&str) -> io::Result<String>,
{
    pub fn with(ask: F) -> Self {
        Prompt { ask }
    }

    fn ask(&mut self, question: &str) -> Result<String, HardenError> {
        (self.ask)(question)
            .map(|answer| answer.trim().to_owned())
            .map_err(|e| HardenError::InvalidInput(format!("no answer to '{}': {}", question, e)))
    }
}

impl<F> InputSource for Prompt<F>
where
    F: FnMut(&str) -> io::Result<String>,
{
    fn collect(
        &mut self,
        default_hostname: Option<&str>,
        domain_joined: bool,
    ) -> Result<RawInput, HardenError> {
        let hostname = match default_hostname {
            Some(detected) => {
                let answer = self.ask(&format!("Hostname [{}]", detected))?;
                if answer.is_empty() {
                    detected.to_owned()
                } else {
                    answer
                }
            }
            None => self.ask("Hostname")?,
        };
        debug!("Using hostname {}", hostname);

        let domain_controllers = if domain_joined {
            self.ask("Domain controller IPs (space separated)")?
        } else {
            String::new()
        };
        let team = self.ask("Team IPs allowed to SSH (space separated)")?;

        Ok(RawInput {
            hostname,
            team,
            domain_controllers,
        })
    }
}

/// Hostnames name the rule store files, so only a conservative character
/// set is allowed.
pub fn validate_hostname(hostname: &str) -> Result<(), HardenError> {
    if hostname.is_empty() {
        return Err(HardenError::InvalidInput("hostname is empty".to_owned()));
    }
    if hostname.starts_with('.') {
        return Err(HardenError::InvalidInput(format!(
            "hostname '{}' starts with a dot",
            hostname
        )));
    }
    if let Some(bad) = hostname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(HardenError::InvalidInput(format!(
            "hostname '{}' contains '{}'",
            hostname, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Asked = Rc<RefCell<Vec<String>>>;

    fn scripted(answers: &[&str]) -> (Prompt<impl FnMut(&str) -> io::Result<String>>, Asked) {
        let asked: Asked = Rc::default();
        let log = asked.clone();
        let mut answers: Vec<String> = answers.iter().rev().map(|a| (*a).to_owned()).collect();
        let prompt = Prompt::with(move |question: &str| {
            log.borrow_mut().push(question.to_owned());
            answers
                .pop()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "closed"))
        });
        (prompt, asked)
    }

    #[test]
    fn test_empty_hostname_keeps_detected() {
        let (mut prompt, asked) = scripted(&["", "10.0.0.5 10.0.0.6"]);
        let input = prompt.collect(Some("web01"), false).unwrap();
        assert_eq!(
            input,
            RawInput {
                hostname: "web01".to_owned(),
                team: "10.0.0.5 10.0.0.6".to_owned(),
                domain_controllers: String::new(),
            }
        );
        assert_eq!(asked.borrow().len(), 2);
        assert_eq!(asked.borrow()[0], "Hostname [web01]");
    }

    #[test]
    fn test_domain_joined_asks_for_controllers() {
        let (mut prompt, asked) = scripted(&["  dc-web ", "10.0.0.10", "10.0.0.5"]);
        let input = prompt.collect(Some("web01"), true).unwrap();
        assert_eq!(input.hostname, "dc-web");
        assert_eq!(input.domain_controllers, "10.0.0.10");
        assert_eq!(input.team, "10.0.0.5");
        assert!(asked.borrow()[1].starts_with("Domain controller"));
    }

    #[test]
    fn test_closed_stdin_is_invalid_input() {
        let (mut prompt, _) = scripted(&["web01"]);
        assert!(matches!(
            prompt.collect(None, false),
            Err(HardenError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_hostname_rules() {
        for ok in ["web01", "db-2.corp.local", "host_a"] {
            assert!(validate_hostname(ok).is_ok(), "{}", ok);
        }
        for bad in ["", ".hidden", "../etc/passwd", "web 01", "wéb"] {
            assert!(
                matches!(validate_hostname(bad), Err(HardenError::InvalidInput(_))),
                "{}",
                bad
            );
        }
    }
}
