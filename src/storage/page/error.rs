use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Record '{0}' already exists")]
    RecordExists(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Index name '{0}' exceeds the maximum length")]
    NameTooLong(String),

    #[error("Header page is full")]
    PageFull,
}
