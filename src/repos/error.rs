/*
 * Responsibility
 * - repo が上位に伝える意味の定義
 * - NotFound / Conflict は呼び出し側が分岐する。それ以外は 500 扱い
 */
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("stored data is invalid: {0}")]
    Corrupt(String),
    #[error("db error")]
    Db(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl RepoError {
    /// Unique violations become `Conflict`, everything else stays a db error.
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(dbe) = &e
            && dbe.code().as_deref() == Some("23505")
        {
            return RepoError::Conflict;
        }
        RepoError::Db(e)
    }
}
