//! Read-only lookup tools the model may call.
//!
//! The tool set is closed: every tool is a [`ToolKind`] variant, and
//! [`ToolRegistry::execute`] never fails. Unknown names and lookup misses come
//! back as plain text so the model can recover conversationally.

use std::sync::LazyLock;

use serde_json::{Value, json};

use crate::models::Tool;

pub mod profile;

use profile::{PROJECTS, REPOSITORIES, RESUME};

/// Every tool known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    GithubRepos,
    ProjectDetails,
    Resume,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [Self::GithubRepos, Self::ProjectDetails, Self::Resume];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GithubRepos => "get_github_repos",
            Self::ProjectDetails => "get_project_details",
            Self::Resume => "get_resume",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Self::GithubRepos => {
                "Returns a list of Dingkang Wang's public GitHub repositories with descriptions. \
                 Use this when the user asks about projects, repositories, or open-source work."
            }
            Self::ProjectDetails => {
                "Returns detailed information about a specific project by name. \
                 Use this when the user asks for details about a particular project."
            }
            Self::Resume => {
                "Returns Dingkang Wang's full resume and background information including \
                 work experience, education, skills, and publications. Use this when the user \
                 asks about experience, qualifications, education, or career history."
            }
        }
    }

    fn input_schema(self) -> Value {
        match self {
            Self::GithubRepos | Self::Resume => json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            Self::ProjectDetails => json!({
                "type": "object",
                "properties": {
                    "project_name": {
                        "type": "string",
                        "description": "The name of the project to look up."
                    }
                },
                "required": ["project_name"]
            }),
        }
    }

    fn definition(self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    fn run(self, input: &Value) -> String {
        match self {
            Self::GithubRepos => github_repos(),
            Self::ProjectDetails => project_details(optional_str(input, "project_name")),
            Self::Resume => RESUME.to_string(),
        }
    }
}

static CATALOGUE: LazyLock<Vec<Tool>> =
    LazyLock::new(|| ToolKind::ALL.into_iter().map(ToolKind::definition).collect());

/// Dispatches tool calls by name. Stateless; the catalogue is built once per process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRegistry;

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Tool definitions advertised to the model.
    #[must_use]
    pub fn list_tools(&self) -> &'static [Tool] {
        CATALOGUE.as_slice()
    }

    /// Run a tool. Never fails.
    #[must_use]
    pub fn execute(&self, name: &str, input: &Value) -> String {
        match ToolKind::from_name(name) {
            Some(kind) => kind.run(input),
            None => format!("Unknown tool: {name}"),
        }
    }
}

// === Tool bodies ===

fn github_repos() -> String {
    serde_json::to_string_pretty(REPOSITORIES).unwrap_or_else(|_| "[]".to_string())
}

fn project_details(requested: Option<&str>) -> String {
    let raw = requested.unwrap_or_default();
    let query = raw.trim().to_lowercase();

    if !query.is_empty() {
        let found = PROJECTS.iter().find(|project| {
            let key = project.name.to_lowercase();
            key.contains(&query) || query.contains(&key)
        });
        if let Some(project) = found {
            return project.details.to_string();
        }
    }

    let available = PROJECTS
        .iter()
        .map(|project| project.name)
        .collect::<Vec<_>>()
        .join(", ");
    format!("Project '{raw}' not found. Available projects: {available}")
}

fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}
