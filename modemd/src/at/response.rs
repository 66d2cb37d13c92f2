use std::fmt;

use super::AtErrorKind;

/// How the modem ended its reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Ok,
    Error,
}

impl Terminator {
    pub fn classify(line: &str) -> Option<Self> {
        match line {
            "OK" => Some(Terminator::Ok),
            "ERROR" => Some(Terminator::Error),
            l if l.starts_with("+CME ERROR") || l.starts_with("+CMS ERROR") => {
                Some(Terminator::Error)
            }
            _ => None,
        }
    }
}

/// Every non-empty line the modem sent for one command, terminator included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript(Vec<String>);

impl Transcript {
    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub(crate) fn push(&mut self, line: String) {
        self.0.push(line);
    }

    pub fn terminator(&self) -> Option<Terminator> {
        self.0.last().and_then(|l| Terminator::classify(l))
    }

    pub fn joined(&self) -> String {
        self.0.join("\n")
    }
}

impl<S: Into<String>> From<Vec<S>> for Transcript {
    fn from(lines: Vec<S>) -> Self {
        Self(lines.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "''"),
            [line] => write!(f, "'{line}'"),
            lines => {
                for line in lines {
                    write!(f, "\n  {line}")?;
                }

                Ok(())
            }
        }
    }
}

/// Successful reply to an AT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    /// The salient text: every line before `OK`, joined with `\n`. For the usual
    /// single-line replies this is the penultimate line.
    pub text: String,
    pub transcript: Transcript,
}

/// Interprets a transcript read up to (and including) its terminator.
///
/// Blank lines are ignored. Without a terminator the reply is incomplete, which is
/// what a per-attempt timeout looks like.
pub fn parse_transcript<S: AsRef<str>>(lines: &[S]) -> Result<AtResponse, AtErrorKind> {
    let mut transcript = Transcript::default();
    for line in lines.iter().map(|l| l.as_ref().trim()) {
        if line.is_empty() {
            continue;
        }
        transcript.push(line.to_string());

        match Terminator::classify(line) {
            Some(Terminator::Ok) => {
                let body = &transcript.lines()[..transcript.lines().len() - 1];
                return Ok(AtResponse {
                    text: body.join("\n"),
                    transcript,
                });
            }
            Some(Terminator::Error) => return Err(AtErrorKind::ErrorResponse),
            None => {}
        }
    }

    Err(AtErrorKind::ResponseTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salient_line_is_the_one_before_ok() {
        // Act
        let response = parse_transcript(&["+CSQ: 18,2", "OK"]).unwrap();

        // Assert
        assert_eq!(response.text, "+CSQ: 18,2");
        assert_eq!(
            response.transcript.lines(),
            &["+CSQ: 18,2".to_string(), "OK".to_string()]
        );
    }

    #[test]
    fn multi_line_bodies_are_joined() {
        let response = parse_transcript(&[
            "",
            "+CGDCONT: 1,\"IP\",\"internet\",\"0.0.0.0\",0,0",
            "+CGDCONT: 2,\"IPV4V6\",\"ims\",\"0.0.0.0\",0,0",
            "",
            "OK",
        ])
        .unwrap();

        assert_eq!(
            response.text,
            "+CGDCONT: 1,\"IP\",\"internet\",\"0.0.0.0\",0,0\n\
             +CGDCONT: 2,\"IPV4V6\",\"ims\",\"0.0.0.0\",0,0"
        );
    }

    #[test]
    fn bare_ok_has_empty_text() {
        assert_eq!(parse_transcript(&["OK"]).unwrap().text, "");
    }

    #[test]
    fn error_lines_are_error_responses() {
        for lines in [
            vec!["ERROR"],
            vec!["+CME ERROR: SIM not inserted"],
            vec!["+CMS ERROR: 500"],
        ] {
            assert_eq!(
                parse_transcript(lines.as_slice()),
                Err(AtErrorKind::ErrorResponse),
                "{lines:?}"
            );
        }
    }

    #[test]
    fn missing_terminator_is_a_timeout() {
        assert_eq!(
            parse_transcript(&["+CPIN: READY"]),
            Err(AtErrorKind::ResponseTimeout)
        );
    }

    #[test]
    fn multi_line_transcripts_display_indented() {
        let transcript = Transcript::from(vec!["ATE0", "OK"]);

        assert_eq!(transcript.to_string(), "\n  ATE0\n  OK");
    }
}
