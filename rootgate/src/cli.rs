//! Command-line surface

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rootgate",
    version,
    about = "Run an allow-listed command as root",
    override_usage = "rootgate <COMMAND> [ARGS]...\n       rootgate -l\n       rootgate -e"
)]
pub struct Cli {
    /// List the commands you are allowed to run
    #[arg(short = 'l', long = "list", conflicts_with_all = ["edit", "command"])]
    pub list: bool,

    /// Edit the policy file (root only)
    #[arg(short = 'e', long = "edit", conflicts_with = "command")]
    pub edit: bool,

    /// Absolute path (or bare name found in the secure path) followed by its arguments
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        required_unless_present_any = ["list", "edit"]
    )]
    pub command: Vec<String>,
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    List,
    Edit,
    Run { command: String, args: Vec<String> },
}

impl Cli {
    pub fn mode(self) -> Mode {
        if self.list {
            return Mode::List;
        }
        if self.edit {
            return Mode::Edit;
        }
        let mut words = self.command.into_iter();
        let command = words.next().unwrap_or_default();
        Mode::Run {
            command,
            args: words.collect(),
        }
    }
}
