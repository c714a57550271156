use serde_json::{Map, Value};

use crate::models::{CoreError, CoreResult, TaskType};

const FORBIDDEN_COMMAND_SEQUENCES: &[&str] = &[";", "&&", "|"];

/// A task's parameters decoded into their typed form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskRequest {
    Command { command: String },
    Crawl { url: String },
    Scan { target: String },
    WhoisLookup { ip_address_or_domain: String },
}

impl TaskRequest {
    pub fn command(command: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
        }
    }

    pub fn crawl(url: impl Into<String>) -> Self {
        Self::Crawl { url: url.into() }
    }

    pub fn scan(target: impl Into<String>) -> Self {
        Self::Scan {
            target: target.into(),
        }
    }

    pub fn whois(ip_address_or_domain: impl Into<String>) -> Self {
        Self::WhoisLookup {
            ip_address_or_domain: ip_address_or_domain.into(),
        }
    }

    pub fn new(task_type: TaskType, input: impl Into<String>) -> Self {
        match task_type {
            TaskType::Command => Self::command(input),
            TaskType::Crawl => Self::crawl(input),
            TaskType::Scan => Self::scan(input),
            TaskType::WhoisLookup => Self::whois(input),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Command { .. } => TaskType::Command,
            Self::Crawl { .. } => TaskType::Crawl,
            Self::Scan { .. } => TaskType::Scan,
            Self::WhoisLookup { .. } => TaskType::WhoisLookup,
        }
    }

    pub fn input(&self) -> &str {
        match self {
            Self::Command { command } => command,
            Self::Crawl { url } => url,
            Self::Scan { target } => target,
            Self::WhoisLookup {
                ip_address_or_domain,
            } => ip_address_or_domain,
        }
    }

    pub fn parameters(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            self.task_type().subject_key().to_string(),
            Value::String(self.input().to_string()),
        );
        Value::Object(map)
    }

    pub fn from_parameters(task_type: TaskType, parameters: &Value) -> CoreResult<Self> {
        let object = parameters.as_object().ok_or_else(|| {
            CoreError::invalid_input(format!(
                "{task_type} parameters must be a JSON object, got {parameters}"
            ))
        })?;

        let key = task_type.subject_key();
        let value = object.get(key).or_else(|| match task_type {
            TaskType::WhoisLookup => object.get("ip_address"),
            _ => None,
        });

        match value {
            Some(Value::String(input)) => Ok(Self::new(task_type, input.clone())),
            Some(other) => Err(CoreError::invalid_input(format!(
                "{task_type} parameter '{key}' must be a string, got {other}"
            ))),
            None => Err(CoreError::invalid_input(format!(
                "{task_type} parameters are missing '{key}'"
            ))),
        }
    }

    /// Rejects malformed submissions before anything is recorded or dispatched.
    pub fn validate(&self) -> CoreResult<()> {
        let input = self.input();
        if input.trim().is_empty() {
            return Err(CoreError::invalid_input(format!(
                "{} is required",
                self.task_type().subject_key()
            )));
        }
        if input.contains('\0') {
            return Err(CoreError::invalid_input("input must not contain NUL bytes"));
        }

        match self {
            Self::Command { command } => {
                if let Some(sequence) = FORBIDDEN_COMMAND_SEQUENCES
                    .iter()
                    .find(|sequence| command.contains(**sequence))
                {
                    return Err(CoreError::invalid_input(format!(
                        "command must not contain '{sequence}'"
                    )));
                }
                if shlex::split(command).is_none() {
                    return Err(CoreError::invalid_input(
                        "command has unbalanced quotes or a trailing escape",
                    ));
                }
                Ok(())
            }
            Self::Crawl { url } => {
                let parsed = url::Url::parse(url)
                    .map_err(|error| CoreError::invalid_input(format!("invalid url: {error}")))?;
                match parsed.scheme() {
                    "http" | "https" => Ok(()),
                    scheme => Err(CoreError::invalid_input(format!(
                        "url scheme '{scheme}' is not supported; use http or https"
                    ))),
                }
            }
            Self::Scan { target } => validate_tool_argument("target", target),
            Self::WhoisLookup {
                ip_address_or_domain,
            } => validate_tool_argument("ip_address_or_domain", ip_address_or_domain),
        }
    }
}

fn validate_tool_argument(name: &str, value: &str) -> CoreResult<()> {
    if value.starts_with('-') {
        return Err(CoreError::invalid_input(format!(
            "{name} must not start with '-'"
        )));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid_input(format!(
            "{name} must not contain whitespace"
        )));
    }
    Ok(())
}
