//! Error types for tablebind operations.

use std::fmt;

/// The primary error type for all tablebind operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, lost handle)
    Connection(ConnectionError),
    /// Query execution errors reported by the driver
    Query(QueryError),
    /// Value conversion errors
    Type(TypeError),
    /// Invalid model configuration
    Config(ConfigError),
    /// A model requested by id does not exist
    NotFound(NotFoundError),
    /// Validation errors raised before persisting
    Validation(ValidationError),
    /// Collection invariant violations
    Collection(CollectionError),
    /// A field that is not part of the resolved model configuration
    UndefinedProperty {
        model: String,
        field: String,
    },
    /// I/O errors (metadata cache artifacts)
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// The handle is no longer usable
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database is busy or locked
    Busy,
    /// Transaction state misuse (commit without begin, nested begin)
    Transaction,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// What exactly is wrong with a model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// More than one relation declared on a single field
    DuplicateRelation,
    /// A relation declared on a scalar or otherwise non-model field
    ScalarRelation,
    /// An explicit relation target that disagrees with the field type
    RelationTargetMismatch,
    /// A to-many relation whose field is not a model collection (or the reverse)
    CollectionType,
    /// A relation factory method the model does not provide
    MissingFactoryMethod,
    /// A factory binding naming a factory that was never registered
    MissingFactory,
    /// An `instantiate` field whose type cannot be default-constructed
    Instantiate,
    /// The metadata cache artifact could not be written or read back
    Artifact,
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub model: String,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub model: String,
    pub table: String,
    pub id: Option<i64>,
}

/// Validation error for field-level validation.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// Model type name
    pub model: String,
    /// The field name that failed validation
    pub field: String,
    /// The kind of validation that failed
    pub kind: ValidationErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Value must be numeric
    Numeric,
    /// Non-nullable value is missing
    Required,
    /// Custom validation failed
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The model has no primary key yet
    Uninitialized { model: String },
    /// The model type differs from the collection's established type
    TypeMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error.
    pub fn add(
        &mut self,
        model: impl Into<String>,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            model: model.into(),
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Add an error reporting the offending value.
    pub fn add_with_value(
        &mut self,
        model: impl Into<String>,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: &str,
        value: impl fmt::Display,
    ) {
        self.add(model, field, kind, format!("{message} (value: {value})"));
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl Error {
    /// Build a configuration error.
    pub fn config(
        kind: ConfigErrorKind,
        model: impl Into<String>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Config(ConfigError {
            kind,
            model: model.into(),
            field: field.map(str::to_string),
            message: message.into(),
        })
    }

    /// Build a not-found error for a model lookup by id.
    pub fn not_found(model: impl Into<String>, table: impl Into<String>, id: Option<i64>) -> Self {
        Error::NotFound(NotFoundError {
            model: model.into(),
            table: table.into(),
            id,
        })
    }

    /// Build an undefined-property error.
    pub fn undefined_property(model: impl Into<String>, field: impl Into<String>) -> Self {
        Error::UndefinedProperty {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Build a query error without driver details.
    pub fn query(kind: QueryErrorKind, sql: Option<&str>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: sql.map(str::to_string),
            message: message.into(),
            source: None,
        })
    }

    /// Is this a not-found error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this a configuration error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Driver-level failures the persister swallows and reports as `false`.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Query(_) | Error::Connection(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::NotFound(e) => write!(f, "{}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Collection(e) => write!(f, "Collection error: {}", e),
            Error::UndefinedProperty { model, field } => {
                write!(f, "Undefined property {}::{}", model, field)
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (query: {})", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}::{}: {}", self.model, field, self.message),
            None => write!(f, "{}: {}", self.model, self.message),
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} model of ID {} was not found", self.model, id),
            None => write!(f, "{} model was not found", self.model),
        }
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Uninitialized { model } => {
                write!(f, "cannot add {} without a primary key", model)
            }
            CollectionError::TypeMismatch { expected, actual } => {
                write!(f, "collection holds {}, got {}", expected, actual)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "{}::{} {}", err.model, err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}::{}: {}", err.model, err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<CollectionError> for Error {
    fn from(err: CollectionError) -> Self {
        Error::Collection(err)
    }
}

/// Result type alias for tablebind operations.
pub type Result<T> = std::result::Result<T, Error>;
