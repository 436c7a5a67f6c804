use super::StackFile;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const STACK_FILE_NAMES: [&str; 2] = ["stack.yaml", "stack.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find a stack file starting from the current directory
    pub fn find_stack_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_stack_in_dir(&current_dir)
    }

    pub fn find_stack_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in STACK_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_stack_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find stack.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load a stack file from disk
    pub fn load_stack<P: AsRef<Path>>(&self, path: P) -> Result<StackFile> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read stack file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_stack(&content)
    }

    /// Parse and validate a stack file from a YAML string
    pub fn parse_stack(&self, content: &str) -> Result<StackFile> {
        let stack: StackFile = serde_yaml::from_str(content)?;

        Self::validate(&stack)?;
        Ok(stack)
    }

    fn validate(stack: &StackFile) -> Result<()> {
        if stack.stack.trim().is_empty() {
            return Err(Error::Config("`stack` name must not be empty".to_string()));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for node in &stack.nodes {
            if !ids.insert(node.id()) {
                return Err(Error::Config(format!("Duplicate node id '{}'", node.id())));
            }
            if node.has_outputs() {
                return Err(Error::Config(format!(
                    "Node '{}' declares outputs; outputs are recorded by the provider, not the stack file",
                    node.id()
                )));
            }
            if let Some(props) = node.content_props() {
                if props.port == 0 {
                    return Err(Error::Config(format!(
                        "Node '{}' must declare a non-zero port",
                        node.id()
                    )));
                }
                if !ports.insert(props.port) {
                    return Err(Error::Config(format!(
                        "Port {} is declared by more than one node",
                        props.port
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
