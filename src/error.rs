//! Error types with fix suggestions
//!
//! Error code ranges:
//! - DAG-010-019: Configuration errors (raised by `connect()` and block construction)
//! - DAG-020-029: Graph shape errors (cycles, duplicate wiring)
//! - DAG-030-039: Run control errors
//! - DAG-040-049: Block step and field value errors
//! - DAG-050-059: Instrumentation errors
//! - DAG-060-069: Config file errors

use thiserror::Error;

use crate::field::{Direction, FieldType};

pub type Result<T> = std::result::Result<T, DagError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum DagError {
    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[DAG-010] Block '{block}' has no field '{field}'")]
    UnknownField { block: String, field: String },

    #[error("[DAG-011] Field '{block}.{field}' is not an {expected} field")]
    WrongDirection {
        block: String,
        field: String,
        expected: Direction,
    },

    #[error(
        "[DAG-012] Cannot connect '{src_block}.{src_field}' ({src_type}) to '{dst_block}.{dst_field}' ({dst_type})"
    )]
    TypeMismatch {
        src_block: String,
        src_field: String,
        src_type: FieldType,
        dst_block: String,
        dst_field: String,
        dst_type: FieldType,
    },

    #[error("[DAG-013] Invalid connection '{spec}': {reason}")]
    InvalidConnection { spec: String, reason: String },

    #[error("[DAG-014] A different block named '{name}' is already in the dag")]
    DuplicateBlockName { name: String },

    #[error("[DAG-015] No connections given for '{src}' -> '{dst}'")]
    EmptyConnection { src: String, dst: String },

    #[error("[DAG-016] Invalid name '{name}'")]
    InvalidName { name: String },

    #[error("[DAG-017] Field '{field}' is declared more than once on block '{block}'")]
    DuplicateField { block: String, field: String },

    // ═══════════════════════════════════════════
    // GRAPH ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[DAG-020] Connecting '{src}' -> '{dst}' would create a cycle: {path}")]
    Cycle {
        src: String,
        dst: String,
        path: String,
    },

    #[error(
        "[DAG-021] Input '{block}.{field}' is already connected from '{existing_block}.{existing_field}'"
    )]
    DuplicateConnection {
        block: String,
        field: String,
        existing_block: String,
        existing_field: String,
    },

    // ═══════════════════════════════════════════
    // RUN CONTROL ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[DAG-030] Dag is already running")]
    AlreadyRunning,

    #[error("[DAG-031] Nothing to execute: the dag has no blocks")]
    NothingToExecute,

    #[error("[DAG-032] Block '{block}' is not paused waiting for input")]
    NotPaused { block: String },

    #[error("[DAG-033] Block '{block}' is not part of this dag")]
    UnknownBlock { block: String },

    #[error("[DAG-034] Block '{block}' was triggered while its own step is still running")]
    Reentrant { block: String },

    #[error("[DAG-035] Cannot change the dag while it is running")]
    MutationWhileRunning,

    // ═══════════════════════════════════════════
    // BLOCK ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[DAG-040] Block '{block}' failed: {source}")]
    Block {
        block: String,
        #[source]
        source: BlockError,
    },

    #[error("[DAG-041] Value for '{block}.{field}' does not match type {expected}: {found}")]
    FieldValue {
        block: String,
        field: String,
        expected: FieldType,
        found: String,
    },

    #[error("[DAG-042] Block '{block}' called without inputs: {missing}")]
    MissingInputs { block: String, missing: String },

    // ═══════════════════════════════════════════
    // INSTRUMENTATION ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[DAG-050] Instrumentation hook failed: {message}")]
    Instrumentation { message: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[DAG-060] Config error: {reason}")]
    Config { reason: String },

    #[error("[DAG-061] YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[DAG-062] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DagError {
    /// Shorthand for hooks reporting their own failure.
    pub fn instrumentation(message: impl Into<String>) -> Self {
        Self::Instrumentation {
            message: message.into(),
        }
    }

    /// Stable error code, e.g. `DAG-020`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownField { .. } => "DAG-010",
            Self::WrongDirection { .. } => "DAG-011",
            Self::TypeMismatch { .. } => "DAG-012",
            Self::InvalidConnection { .. } => "DAG-013",
            Self::DuplicateBlockName { .. } => "DAG-014",
            Self::EmptyConnection { .. } => "DAG-015",
            Self::InvalidName { .. } => "DAG-016",
            Self::DuplicateField { .. } => "DAG-017",
            Self::Cycle { .. } => "DAG-020",
            Self::DuplicateConnection { .. } => "DAG-021",
            Self::AlreadyRunning => "DAG-030",
            Self::NothingToExecute => "DAG-031",
            Self::NotPaused { .. } => "DAG-032",
            Self::UnknownBlock { .. } => "DAG-033",
            Self::Reentrant { .. } => "DAG-034",
            Self::MutationWhileRunning => "DAG-035",
            Self::Block { .. } => "DAG-040",
            Self::FieldValue { .. } => "DAG-041",
            Self::MissingInputs { .. } => "DAG-042",
            Self::Instrumentation { .. } => "DAG-050",
            Self::Config { .. } => "DAG-060",
            Self::Yaml(_) => "DAG-061",
            Self::Io(_) => "DAG-062",
        }
    }

    /// Errors caused by a bad `connect()` or block declaration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownField { .. }
                | Self::WrongDirection { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidConnection { .. }
                | Self::DuplicateBlockName { .. }
                | Self::EmptyConnection { .. }
                | Self::InvalidName { .. }
                | Self::DuplicateField { .. }
        )
    }

    /// The failing block's error, if this is a block step failure.
    pub fn block_error(&self) -> Option<&BlockError> {
        match self {
            Self::Block { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl FixSuggestion for DagError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            DagError::UnknownField { .. } => Some("Check the field name against the block's fields()"),
            DagError::WrongDirection { .. } => {
                Some("Connect an output field of the source to an input field of the destination")
            }
            DagError::TypeMismatch { .. } => {
                Some("Declare both fields with the same FieldType, or use FieldType::Any")
            }
            DagError::InvalidConnection { .. } => Some("Use 'src:dst' or a single field name"),
            DagError::DuplicateBlockName { .. } => Some("Give each block in a dag a unique name"),
            DagError::EmptyConnection { .. } => Some("Pass at least one Connection to connect()"),
            DagError::InvalidName { .. } => {
                Some("Names start with a letter or '_' and contain letters, digits, '_' or '-'")
            }
            DagError::DuplicateField { .. } => Some("Declare each field once in fields()"),
            DagError::Cycle { .. } => Some("Remove the connection that points back upstream"),
            DagError::DuplicateConnection { .. } => {
                Some("An input can only be fed by one output; connect a different input field")
            }
            DagError::AlreadyRunning => Some("Wait for the current execute() to return"),
            DagError::NothingToExecute => Some("Connect blocks before calling execute()"),
            DagError::NotPaused { .. } => {
                Some("Only resume a pause_execution block after execute() returned Outcome::Paused")
            }
            DagError::UnknownBlock { .. } => Some("Connect the block into this dag first"),
            DagError::Reentrant { .. } => {
                Some("A step must not trigger its own block again through downstream blocks")
            }
            DagError::MutationWhileRunning => Some("Build the whole dag before calling execute()"),
            DagError::Block { .. } => Some("Fix the failing block, then call unstop() and execute()"),
            DagError::FieldValue { .. } => Some("Assign a value matching the field's declared type"),
            DagError::MissingInputs { .. } => Some("Pass a value for every input field"),
            DagError::Instrumentation { .. } => Some("Check the installed instrumentation hook"),
            DagError::Config { .. } => Some("Check the config file path and YAML layout"),
            DagError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            DagError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

/// Error returned by a block's `prepare()` or `execute()`.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The step failed. Sets the dag's stop flag.
    #[error("{0}")]
    Failed(String),

    /// Input data was rejected. Does not set the stop flag.
    #[error("invalid input: {0}")]
    Validate(String),

    /// A downstream block failed while this step was assigning outputs.
    #[error(transparent)]
    Cascade(Box<DagError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlockError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn validate(message: impl Into<String>) -> Self {
        Self::Validate(message.into())
    }

    /// Whether this failure should stop further execution of the dag.
    pub fn stops_dag(&self) -> bool {
        !matches!(self, Self::Validate(_) | Self::Cascade(_))
    }
}

impl From<DagError> for BlockError {
    fn from(err: DagError) -> Self {
        Self::Cascade(Box::new(err))
    }
}
