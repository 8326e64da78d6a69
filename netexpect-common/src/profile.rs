use serde::{Deserialize, Serialize};

fn default_pager_continue() -> String {
    " ".into()
}

/// An error regex with a stable name so results can report which vendor
/// error fired.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

impl NamedPattern {
    pub fn new<N: Into<String>, P: Into<String>>(name: N, pattern: P) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Per-vendor CLI behavior, fed into the session engine as data.
///
/// All patterns are byte regexes. The prompt pattern is mandatory; a
/// `(?P<stable>...)` capture group inside it marks the part of the prompt
/// that stays fixed across modes, which the session uses to tighten
/// matching after discovery.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CliProfile {
    pub prompt: String,

    /// Pager interrupt such as `--More--`.
    #[serde(default)]
    pub pager: Option<String>,

    /// Vendor error vocabulary, e.g. `^% Invalid input`.
    #[serde(default)]
    pub errors: Vec<NamedPattern>,

    /// Interactive confirmation questions the device may ask mid-command.
    #[serde(default)]
    pub questions: Vec<String>,

    /// Telnet login dialog prompts. Unused by transports that authenticate
    /// in-protocol.
    #[serde(default)]
    pub login_prompt: Option<String>,
    #[serde(default)]
    pub password_prompt: Option<String>,

    /// Commands issued right after prompt discovery, e.g. `terminal length 0`.
    #[serde(default)]
    pub terminal_setup: Vec<String>,

    /// Bytes written in response to a pager match.
    #[serde(default = "default_pager_continue")]
    pub pager_continue: String,
}

impl CliProfile {
    pub fn new<P: Into<String>>(prompt: P) -> Self {
        Self {
            prompt: prompt.into(),
            pager: None,
            errors: Vec::new(),
            questions: Vec::new(),
            login_prompt: None,
            password_prompt: None,
            terminal_setup: Vec::new(),
            pager_continue: default_pager_continue(),
        }
    }

    pub fn with_pager<P: Into<String>>(mut self, pattern: P) -> Self {
        self.pager = Some(pattern.into());
        self
    }

    pub fn with_error(mut self, pattern: NamedPattern) -> Self {
        self.errors.push(pattern);
        self
    }

    pub fn with_question<P: Into<String>>(mut self, pattern: P) -> Self {
        self.questions.push(pattern.into());
        self
    }

    pub fn with_login_prompts<L: Into<String>, P: Into<String>>(
        mut self,
        login: L,
        password: P,
    ) -> Self {
        self.login_prompt = Some(login.into());
        self.password_prompt = Some(password.into());
        self
    }

    pub fn with_terminal_setup<C: Into<String>>(mut self, command: C) -> Self {
        self.terminal_setup.push(command.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_json() {
        let profile: CliProfile = serde_json::from_str(
            r#"{
                "prompt": "(?P<stable>router)[>#] $",
                "pager": " --More-- ",
                "errors": [{"name": "invalid", "pattern": "% Invalid input"}]
            }"#,
        )
        .unwrap();
        assert_eq!(profile.pager_continue, " ");
        assert_eq!(profile.errors[0].name, "invalid");
        assert!(profile.login_prompt.is_none());
    }
}
