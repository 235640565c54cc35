use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SraGraphError {
    #[error("invalid search query: {0}")]
    InvalidQuery(String),

    #[error("unknown node label: {0}")]
    InvalidLabel(String),

    #[error("could not normalize date: {0}")]
    InvalidDate(String),

    #[error("missing config file {0}")]
    MissingConfig(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Entrez request failed: {0}")]
    EntrezHttp(String),

    #[error("Entrez returned status {status}: {message}")]
    EntrezStatus { status: u16, message: String },

    #[error("unexpected Entrez response: {0}")]
    EntrezResponse(String),

    #[error("failed to parse XML: {0}")]
    XmlParse(String),

    #[error("malformed experiment package: {0}")]
    MalformedRecord(String),

    #[error("statement references undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("statement variable `{0}` declared twice")]
    DuplicateVariable(String),

    #[error("graph request failed: {0}")]
    GraphHttp(String),

    #[error("graph store returned status {status}: {message}")]
    GraphStatus { status: u16, message: String },

    #[error("graph statement failed ({code}): {message}")]
    GraphStatement { code: String, message: String },

    #[error("unexpected graph response: {0}")]
    GraphResponse(String),

    #[error("pipeline aborted")]
    Aborted,
}
