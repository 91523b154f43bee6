//! Error types for the arcon core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("missing required environment variable: {var}")]
    MissingVar {
        /// The name of the missing variable.
        var: String,
    },

    /// An environment variable has an unacceptable value.
    #[error("invalid value for environment variable '{var}': {message}")]
    InvalidValue {
        /// The name of the invalid variable.
        var: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// JSON deserialization of the configuration file failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from loading or compiling a packaged JSON schema.
///
/// These are startup-fatal: a missing or broken schema means the deployment
/// itself is wrong, not the message being processed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// No packaged schema exists under the requested name.
    #[error("schema '{name}' not found")]
    NotFound {
        /// The requested schema name.
        name: String,
    },

    /// The packaged schema document is not valid JSON.
    #[error("schema '{name}' is malformed: {message}")]
    Malformed {
        /// The schema name.
        name: String,
        /// The underlying parse failure.
        message: String,
    },

    /// The schema parsed but did not compile into a validator.
    #[error("schema '{name}' failed to compile: {message}")]
    Compile {
        /// The schema name.
        name: String,
        /// The underlying compilation failure.
        message: String,
    },
}

/// A message instance did not conform to its schema.
#[derive(Debug, Clone, thiserror::Error)]
#[error("message failed validation against schema '{schema}': {detail}")]
pub struct ValidationError {
    /// The schema the instance was validated against.
    pub schema: String,
    /// The first validation failure reported.
    pub detail: String,
}

/// Errors from the DataCite-style DOI API.
#[derive(Debug, thiserror::Error)]
pub enum DoiError {
    /// Network-level failure communicating with the DOI API.
    #[error("DOI API network error: {source}")]
    Network {
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The DOI API returned a non-success HTTP status.
    #[error("DOI API error (HTTP {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The DOI API response could not be interpreted.
    #[error("failed to parse DOI API response: {message}")]
    Parse {
        /// Details about what is missing or malformed.
        message: String,
    },
}

/// Errors from the REMS-style access-registry API.
#[derive(Debug, thiserror::Error)]
pub enum RemsError {
    /// Network-level failure communicating with the access registry.
    #[error("access registry network error: {source}")]
    Network {
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The access registry returned a non-success HTTP status for a create.
    #[error("access registry error creating {resource} (HTTP {status}): {message}")]
    Api {
        /// The sub-resource endpoint that failed (e.g. `licenses`).
        resource: String,
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The create call returned 200 but `success` was not `true`.
    #[error("access registry rejected creation of {resource}")]
    CreateRejected {
        /// The sub-resource endpoint that failed.
        resource: String,
    },

    /// The create response carried no usable id.
    #[error("access registry response for {resource} carried no id")]
    MissingId {
        /// The sub-resource endpoint that failed.
        resource: String,
    },
}

/// Errors from the AMQP broker runtime.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Establishing the connection failed and retries are exhausted.
    #[error("broker unreachable after {attempts} attempts")]
    RetriesExhausted {
        /// How many connection attempts were made.
        attempts: u32,
    },

    /// TLS material could not be read.
    #[error("failed to read TLS file {path}: {source}")]
    Tls {
        /// The file that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An AMQP protocol operation failed.
    #[error("AMQP error: {source}")]
    Protocol {
        /// The underlying lapin error.
        #[source]
        source: lapin::Error,
    },

    /// Publishing an outbound message failed.
    #[error("failed to publish to queue '{queue}': {source}")]
    Publish {
        /// The routing key the publish targeted.
        queue: String,
        /// The underlying lapin error.
        #[source]
        source: lapin::Error,
    },

    /// The delivery stream ended without an explicit error.
    #[error("AMQP delivery stream ended")]
    SessionEnded,

    /// The error record could not be shaped or validated, so it was not
    /// published.
    #[error("error record could not be published: {source}")]
    ErrorRecordInvalid {
        /// What went wrong while shaping the record.
        #[source]
        source: StageError,
    },
}

/// Per-message failures raised by a stage handler.
///
/// These never kill the process: the broker runtime turns them into an error
/// record on the error queue and rejects the inbound message without requeue.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The message body was not valid JSON.
    #[error("message body is not valid JSON: {source}")]
    Json {
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A field needed to route the message is absent.
    #[error("message is missing required field '{field}'")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// The inbox message carried an operation this stage does not know.
    #[error("unknown inbox operation '{operation}'")]
    UnknownOperation {
        /// The operation value from the message.
        operation: String,
    },

    /// An uploaded filepath violates the path invariant.
    #[error("invalid inbox filepath '{filepath}': final component must not be empty, '.' or '..'")]
    InvalidPath {
        /// The offending filepath.
        filepath: String,
    },

    /// The message did not conform to its schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The schema itself could not be loaded or compiled.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// DOI drafting or publication failed.
    #[error(transparent)]
    Doi(#[from] DoiError),

    /// Access-registry registration failed.
    #[error(transparent)]
    Rems(#[from] RemsError),
}
