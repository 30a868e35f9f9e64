use thiserror::Error;

#[derive(Debug, Error)]
pub enum TabError {
    #[error("syntax error at line {line}: {msg}")]
    Syntax { line: usize, msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, TabError>;
