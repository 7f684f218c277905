//! Built-in tool handlers: external helpers, sub-agents and user commands.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{
    CapabilityFlag, ToolContext, ToolDescriptor, ToolFuture, ToolHandler, ToolKind, ToolOutput,
};
use crate::config::{HelperConfig, SubAgentConfig};
use crate::shell::hide_console;

// ============================================================================
// Helpers
// ============================================================================

/// Runs a configured command with the arguments as JSON on stdin.
#[derive(Debug, Clone)]
pub struct HelperTool {
    config: HelperConfig,
}

impl HelperTool {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        let mut descriptor = ToolDescriptor::new(&self.config.name, ToolKind::Helper)
            .with_description(self.config.description.clone().unwrap_or_default());
        if let Some(schema) = &self.config.schema {
            descriptor = descriptor.with_schema(schema.clone());
        }
        descriptor.native_support = self.config.native_support.clone();
        descriptor
    }

    async fn run(
        &self,
        arguments: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> std::io::Result<ToolOutput> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(&ctx.project_root)
            .env("SWITCHBOARD_SESSION_ID", ctx.session_id.as_str())
            .env("SWITCHBOARD_ENGINE", ctx.engine_kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        hide_console(&mut cmd);

        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let payload = Value::Object(arguments.clone()).to_string();
            // A helper that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!("Helper {} did not read its arguments: {}", self.config.name, e);
            }
        }
        let output = child.wait_with_output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if output.status.success() {
            return Ok(ToolOutput::text(stdout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let detail = [stdout, stderr]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::error(format!(
            "{} exited with {}: {}",
            self.config.name, output.status, detail
        )))
    }
}

impl ToolHandler for HelperTool {
    fn invoke<'a>(
        &'a self,
        arguments: &'a Map<String, Value>,
        ctx: &'a ToolContext,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            match self.run(arguments, ctx).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Helper {} failed to run: {}", self.config.name, e);
                    ToolOutput::error(format!("failed to run {}: {}", self.config.command, e))
                }
            }
        })
    }
}

// ============================================================================
// Sub-agents
// ============================================================================

/// A named persona; calling it produces delegation instructions.
#[derive(Debug, Clone)]
pub struct SubAgentTool {
    config: SubAgentConfig,
}

impl SubAgentTool {
    pub fn new(config: SubAgentConfig) -> Self {
        Self { config }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        let description = self
            .config
            .description
            .clone()
            .unwrap_or_else(|| format!("Delegate a task to the {} agent", self.config.name));
        ToolDescriptor::new(&self.config.name, ToolKind::SubAgent)
            .with_description(description)
            .with_schema(json!({
                "type": "object",
                "properties": { "task": { "type": "string" } },
                "required": ["task"]
            }))
            .with_flag(CapabilityFlag::ReadOnly)
    }
}

impl ToolHandler for SubAgentTool {
    fn invoke<'a>(
        &'a self,
        arguments: &'a Map<String, Value>,
        _ctx: &'a ToolContext,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            match arguments.get("task").and_then(Value::as_str) {
                Some(task) if !task.trim().is_empty() => ToolOutput::structured(json!({
                    "agent": self.config.name,
                    "instructions": self.config.system_prompt,
                    "task": task,
                })),
                _ => ToolOutput::error(format!(
                    "{} needs a non-empty `task` argument",
                    self.config.name
                )),
            }
        })
    }
}

// ============================================================================
// User commands
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct CommandFrontmatter {
    description: Option<String>,
}

/// A markdown prompt template from a `.claude/commands` directory.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCommandTool {
    pub name: String,
    pub description: Option<String>,
    pub template: String,
    pub source: PathBuf,
}

impl UserCommandTool {
    /// Parse a command file; `base` is the commands directory it was found under.
    pub fn load(path: &Path, base: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let (frontmatter, body) = split_frontmatter(&content);
        Ok(Self {
            name: command_name(path, base),
            description: frontmatter.description,
            template: body,
            source: path.to_path_buf(),
        })
    }

    pub fn accepts_arguments(&self) -> bool {
        self.template.contains("$ARGUMENTS")
    }

    pub fn render(&self, arguments: &str) -> String {
        self.template.replace("$ARGUMENTS", arguments)
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        let description = self
            .description
            .clone()
            .unwrap_or_else(|| format!("Run the /{} command", self.name));
        ToolDescriptor::new(&self.name, ToolKind::UserCommand)
            .with_description(description)
            .with_schema(json!({
                "type": "object",
                "properties": { "arguments": { "type": "string" } }
            }))
            .with_flag(CapabilityFlag::ReadOnly)
    }
}

impl ToolHandler for UserCommandTool {
    fn invoke<'a>(
        &'a self,
        arguments: &'a Map<String, Value>,
        _ctx: &'a ToolContext,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let args = arguments
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ToolOutput::text(self.render(args).trim().to_string())
        })
    }
}

/// Split optional `---` frontmatter from the body. Unparseable frontmatter is kept as body.
fn split_frontmatter(content: &str) -> (CommandFrontmatter, String) {
    let lines: Vec<&str> = content.lines().collect();
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return (CommandFrontmatter::default(), content.to_string());
    }
    let Some(end) = lines.iter().skip(1).position(|l| l.trim_end() == "---").map(|i| i + 1) else {
        return (CommandFrontmatter::default(), content.to_string());
    };

    let yaml = lines[1..end].join("\n");
    match serde_yaml_ng::from_str::<Option<CommandFrontmatter>>(&yaml) {
        Ok(frontmatter) => (frontmatter.unwrap_or_default(), lines[end + 1..].join("\n")),
        Err(e) => {
            debug!("Ignoring unparseable command frontmatter: {}", e);
            (CommandFrontmatter::default(), content.to_string())
        }
    }
}

/// `frontend/component.md` under `base` becomes `frontend:component`.
fn command_name(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

fn find_markdown_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            find_markdown_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    Ok(())
}

/// Commands from `~/.claude/commands` and `<project>/.claude/commands`.
///
/// A project command shadows a user command with the same name.
pub fn discover_user_commands(project_root: &Path, home: Option<&Path>) -> Vec<UserCommandTool> {
    let mut by_name: BTreeMap<String, UserCommandTool> = BTreeMap::new();
    let roots = home
        .map(|h| h.join(".claude").join("commands"))
        .into_iter()
        .chain(std::iter::once(project_root.join(".claude").join("commands")));

    for base in roots {
        let mut files = Vec::new();
        if let Err(e) = find_markdown_files(&base, &mut files) {
            warn!("Failed to scan {}: {}", base.display(), e);
            continue;
        }
        for file in files {
            match UserCommandTool::load(&file, &base) {
                Ok(command) => {
                    by_name.insert(command.name.clone(), command);
                }
                Err(e) => warn!("Skipping command {}: {}", file.display(), e),
            }
        }
    }
    by_name.into_values().collect()
}
