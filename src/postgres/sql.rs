//! SQL statements for managing extensions
//!
//! DDL statements do not accept bind parameters, so extension names and
//! versions are quoted here before being interpolated.

/// Query returning the installed version of an extension, if any
pub const OBSERVE_EXTENSION: &str = "SELECT extversion FROM pg_extension WHERE extname = $1";

/// PostgreSQL truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// `CREATE EXTENSION IF NOT EXISTS`, pinned to a version when one is given
pub fn create_extension(extension: &str, version: Option<&str>) -> String {
    let mut sql = format!(
        "CREATE EXTENSION IF NOT EXISTS {}",
        quote_identifier(extension)
    );
    if let Some(version) = version {
        sql.push_str(&format!(" WITH VERSION {}", quote_literal(version)));
    }
    sql
}

/// `ALTER EXTENSION ... UPDATE TO`, or nothing when no version is pinned
pub fn update_extension(extension: &str, version: Option<&str>) -> Option<String> {
    version.map(|v| {
        format!(
            "ALTER EXTENSION {} UPDATE TO {}",
            quote_identifier(extension),
            quote_literal(v)
        )
    })
}

/// `DROP EXTENSION IF EXISTS`
pub fn drop_extension(extension: &str) -> String {
    format!("DROP EXTENSION IF EXISTS {}", quote_identifier(extension))
}

/// Quote a SQL identifier (table name, column name, etc.)
/// Uses PostgreSQL's standard double-quote escaping
///
/// This prevents SQL injection by ensuring special characters in identifiers
/// are properly escaped. For example:
/// - `pgcrypto` -> `"pgcrypto"`
/// - `uuid-ossp` -> `"uuid-ossp"`
/// - `ext"name` -> `"ext""name"`
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL string literal by doubling single quotes
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Check that a name can be used as an extension name
///
/// Extension names are arbitrary identifiers (e.g. `uuid-ossp`), so only the
/// empty string, NUL bytes and over-long names are rejected.
pub fn is_valid_extension_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_IDENTIFIER_LEN && !name.contains('\0')
}
