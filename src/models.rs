use std::fmt;

use crate::error::DeployResult;

pub type InlineFn<C> = Box<dyn Fn(&mut C) -> DeployResult<Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
    pub script: String,
    pub function: String,
}

impl ScriptRef {
    pub fn new(script: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            function: function.into(),
        }
    }
}

pub enum StepAction<C> {
    External(ScriptRef),
    Inline(InlineFn<C>),
}

impl<C> fmt::Debug for StepAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::External(script) => f.debug_tuple("External").field(script).finish(),
            StepAction::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

#[derive(Debug)]
pub struct Step<C> {
    pub label: String,
    pub action: StepAction<C>,
}

impl<C> Step<C> {
    pub fn script(
        label: impl Into<String>,
        script: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            action: StepAction::External(ScriptRef::new(script, function)),
        }
    }

    pub fn inline<F>(label: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut C) -> DeployResult<Vec<String>> + 'static,
    {
        Self {
            label: label.into(),
            action: StepAction::Inline(Box::new(body)),
        }
    }
}

#[derive(Debug)]
pub struct Section<C> {
    pub title: String,
    pub steps: Vec<Step<C>>,
}

impl<C> Section<C> {
    pub fn new(title: impl Into<String>, steps: Vec<Step<C>>) -> Self {
        Self {
            title: title.into(),
            steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub label: String,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(label: &str) -> Self {
        Self {
            label: label.to_string(),
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(label: &str, detail: String) -> Self {
        Self {
            label: label.to_string(),
            success: false,
            error_detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionResult {
    pub title: String,
    pub passed: bool,
}
