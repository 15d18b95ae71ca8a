use crate::application::repos::RepoError;

/// MySQL error codes the repositories distinguish.
const ER_DUP_ENTRY: &str = "1062";
const ER_NO_REFERENCED_ROW: &str = "1452";
const ER_ROW_IS_REFERENCED: &str = "1451";
const ER_TRUNCATED_WRONG_VALUE: &str = "1292";
const ER_LOCK_WAIT_TIMEOUT: &str = "1205";
const ER_QUERY_INTERRUPTED: &str = "1317";
const ER_QUERY_TIMEOUT: &str = "3024";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            let message = db.message().to_string();
            match code.as_str() {
                ER_DUP_ENTRY => RepoError::Duplicate {
                    constraint: duplicate_key_name(&message),
                },
                ER_NO_REFERENCED_ROW | ER_ROW_IS_REFERENCED | ER_TRUNCATED_WRONG_VALUE => {
                    RepoError::InvalidInput { message }
                }
                ER_LOCK_WAIT_TIMEOUT | ER_QUERY_INTERRUPTED | ER_QUERY_TIMEOUT => {
                    RepoError::Timeout
                }
                _ if message.contains("Duplicate entry") => RepoError::Duplicate {
                    constraint: duplicate_key_name(&message),
                },
                _ if message.contains("constraint fails") => RepoError::Integrity { message },
                _ => RepoError::from_persistence(message),
            }
        }
        other => RepoError::from_persistence(other),
    }
}

/// `Duplicate entry 'x' for key 'wp_posts.PRIMARY'` -> `wp_posts.PRIMARY`.
fn duplicate_key_name(message: &str) -> String {
    message
        .rsplit_once("for key ")
        .map(|(_, key)| key.trim_matches(|ch| ch == '\'' || ch == '`').to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_extracted_from_message() {
        assert_eq!(
            duplicate_key_name("Duplicate entry '5' for key 'wp_posts.PRIMARY'"),
            "wp_posts.PRIMARY"
        );
        assert_eq!(duplicate_key_name("Duplicate entry"), "unknown");
    }

    #[test]
    fn non_database_errors_keep_their_message() {
        match map_sqlx_error(sqlx::Error::RowNotFound) {
            RepoError::NotFound => {}
            other => panic!("unexpected mapping: {other:?}"),
        }
        match map_sqlx_error(sqlx::Error::PoolTimedOut) {
            RepoError::Timeout => {}
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
