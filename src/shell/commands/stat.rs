use anyhow::{Result, anyhow};
use async_trait::async_trait;
use colored::*;

use super::ls::format_mode;
use super::output::print_line;
use super::{Command, ShellState};
use crate::vfs::info::{
    OWNER_GROUP, OWNER_USER, STANDARD_CONTENT_TYPE, STANDARD_SYMLINK_TARGET, TIME_ACCESS,
    TIME_CHANGED, TIME_CREATED, TIME_MODIFIED, UNIX_GID, UNIX_UID,
};
use crate::vfs::{AttributeValue, FileInfo, QueryFlags};

pub struct StatCommand;

#[async_trait]
impl Command for StatCommand {
    fn name(&self) -> &str {
        "stat"
    }

    fn usage(&self) -> &str {
        "stat [-L] PATH - Show entry metadata"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let mut follow = false;
        let mut path_arg = None;
        for arg in args {
            match arg.as_str() {
                "-L" => follow = true,
                _ if arg.starts_with('-') => return Err(anyhow!("stat: unknown option {arg}")),
                _ => path_arg = Some(arg.as_str()),
            }
        }
        let path_str = path_arg.ok_or_else(|| anyhow!("Usage: {}", self.usage()))?;

        let file = state.resolve(path_str)?;
        let flags = QueryFlags {
            nofollow_symlinks: !follow,
        };
        let info = file.query_info("*", flags)?;
        let path = file.path().map(|p| p.to_string()).unwrap_or_default();

        print_line!("{:>9}: {}", "File", path.bold());
        if let Some(target) = info.symlink_target() {
            print_line!("{:>9}: {}", "Link", target.cyan());
        }
        print_line!(
            "{:>9}: {}   {:>6}: {}",
            "Size",
            info.size().unwrap_or(0),
            "Type",
            info.file_kind()
                .map(|k| format!("{k:?}").to_lowercase())
                .unwrap_or_else(|| "-".to_string())
        );
        print_line!(
            "{:>9}: {:o} ({})",
            "Mode",
            info.mode().unwrap_or(0) & 0o7777,
            format_mode(info.mode().unwrap_or(0))
        );
        print_line!(
            "{:>9}: {} ({})   {:>6}: {} ({})",
            "Uid",
            number(&info, UNIX_UID),
            info.user().unwrap_or("-"),
            "Gid",
            number(&info, UNIX_GID),
            info.group().unwrap_or("-")
        );
        print_line!("{:>9}: {}", "Content", info.content_type().unwrap_or("-"));
        for (label, attribute) in [
            ("Access", TIME_ACCESS),
            ("Modify", TIME_MODIFIED),
            ("Change", TIME_CHANGED),
            ("Birth", TIME_CREATED),
        ] {
            let shown = info
                .time(attribute)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.9f UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            print_line!("{label:>9}: {shown}");
        }

        // Anything else the entry carries
        for (name, value) in info.attributes() {
            if is_shown(name) {
                continue;
            }
            print_line!("{:>9}  {} = {}", "", name.dimmed(), format_value(value));
        }
        Ok(())
    }
}

fn number(info: &FileInfo, attribute: &str) -> String {
    match info.get(attribute) {
        Some(AttributeValue::U64(v)) => v.to_string(),
        Some(AttributeValue::U32(v)) => v.to_string(),
        _ => "-".to_string(),
    }
}

fn is_shown(attribute: &str) -> bool {
    attribute.starts_with("time::")
        || attribute.starts_with("unix::")
        || matches!(
            attribute,
            OWNER_USER | OWNER_GROUP | STANDARD_CONTENT_TYPE | STANDARD_SYMLINK_TARGET
        )
        || matches!(attribute, "standard::name" | "standard::size" | "standard::type")
}

fn format_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::U32(v) => v.to_string(),
        AttributeValue::U64(v) => v.to_string(),
        AttributeValue::Kind(k) => format!("{k:?}").to_lowercase(),
    }
}
