use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Command, ShellState};
use crate::shell::{follow_link, is_directory};

pub struct CdCommand;

#[async_trait]
impl Command for CdCommand {
    fn name(&self) -> &str {
        "cd"
    }

    fn usage(&self) -> &str {
        "cd PATH - Change current directory"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        // cd with no args goes to root
        let path_str = args.first().map(String::as_str).unwrap_or("/");

        // Entering a symlink lands on what it points at
        let target = follow_link(state.resolve(path_str)?).map_err(|e| anyhow!("{path_str}: {e:#}"))?;

        // Verify the target is navigable
        if !is_directory(&target) {
            return Err(anyhow!("Not a directory: {path_str}"));
        }

        state.set_current(target);
        Ok(())
    }
}
