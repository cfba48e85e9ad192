//! Command line arguments

use std::fmt;

use ricecoder_process::Environment;
use serde::{Deserialize, Serialize};

/// One argument of a command line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Argument {
    /// Quoted by the environment so the shell passes it through verbatim
    Escaped(String),
    /// Passed to the shell as written; the caller vouches for it
    Raw(String),
}

impl Argument {
    /// Render the argument for the shell
    pub fn render(&self, environment: &dyn Environment) -> String {
        match self {
            Argument::Escaped(value) => environment.escape_shell_arg(value),
            Argument::Raw(value) => value.clone(),
        }
    }

    /// The argument as supplied, before escaping
    pub fn value(&self) -> &str {
        match self {
            Argument::Escaped(value) | Argument::Raw(value) => value,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ricecoder_process::UnixEnvironment;

    #[test]
    fn test_render() {
        let env = UnixEnvironment::new();
        assert_eq!(Argument::Escaped("a b".into()).render(&env), "'a b'");
        assert_eq!(Argument::Raw("$HOME".into()).render(&env), "$HOME");
        assert_eq!(Argument::Escaped("a b".into()).value(), "a b");
    }
}
