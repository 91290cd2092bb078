//! SQL file migrations.
//!
//! A directory source turns files named like
//!
//! - `0001_create_users.sql`
//! - `0001_create_users.down.sql`
//! - `0002_add_posts.sql`
//!
//! into migration units. The numeric prefix is the version, the rest of the
//! stem (underscores read as spaces) is the description. Every statement of a
//! file becomes one raw SQL operation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sluice_core::error::{Result, SluiceError};
use sluice_core::migration::{MigrationSource, MigrationUnit};
use sluice_core::schema::SchemaOperation;
use sluice_core::services::{SchemaName, ServiceRegistry};
use tracing::debug;

/// Placeholder replaced by the bound [`SchemaName`].
pub const SCHEMA_TOKEN: &str = "{{schema}}";

const DOWN_SUFFIX: &str = ".down";

/// Loads migrations from `.sql` files in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

#[derive(Default)]
struct FilePair {
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Up/down files keyed by their shared stem.
    fn collect_files(&self) -> Result<BTreeMap<String, FilePair>> {
        let mut files: BTreeMap<String, FilePair> = BTreeMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().map(|e| e != "sql").unwrap_or(true) {
                continue;
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    SluiceError::InvalidMigration(format!(
                        "Invalid migration filename: {}",
                        path.display()
                    ))
                })?
                .to_string();

            match stem.strip_suffix(DOWN_SUFFIX) {
                Some(base) => files.entry(base.to_string()).or_default().down = Some(path),
                None => files.entry(stem).or_default().up = Some(path),
            }
        }

        Ok(files)
    }
}

impl MigrationSource for DirectorySource {
    fn discover(&self, services: &ServiceRegistry) -> Result<Vec<MigrationUnit>> {
        if !self.dir.exists() {
            debug!("Migrations directory does not exist: {:?}", self.dir);
            return Ok(Vec::new());
        }

        let schema = services
            .resolve::<SchemaName>()
            .ok()
            .and_then(|name| name.get().map(str::to_string));

        let mut units = Vec::new();
        for (stem, pair) in self.collect_files()? {
            let up = pair.up.ok_or_else(|| {
                SluiceError::InvalidMigration(format!(
                    "'{}{}.sql' has no matching up migration",
                    stem, DOWN_SUFFIX
                ))
            })?;
            let (version, description) = parse_stem(&stem)?;

            let up = load_operations(&up, schema.as_deref())?;
            // A down file without statements declares nothing to run.
            let down = pair
                .down
                .map(|path| load_operations(&path, schema.as_deref()))
                .transpose()?
                .filter(|ops| !ops.is_empty());

            units.push(MigrationUnit::new(version, description).with_operations(up, down));
        }

        debug!("Loaded {} SQL migration(s) from {:?}", units.len(), self.dir);
        Ok(units)
    }
}

/// Split `0001_create_users` into `(1, "create users")`.
fn parse_stem(stem: &str) -> Result<(i64, String)> {
    let (number, rest) = stem.split_once('_').unwrap_or((stem, ""));
    let version = number.parse::<i64>().map_err(|_| {
        SluiceError::InvalidMigration(format!(
            "'{}.sql' does not start with a numeric version",
            stem
        ))
    })?;

    Ok((version, rest.replace('_', " ")))
}

fn load_operations(path: &Path, schema: Option<&str>) -> Result<Vec<SchemaOperation>> {
    let sql = std::fs::read_to_string(path)?;
    let sql = substitute_schema(&sql, schema).map_err(|_| {
        SluiceError::InvalidMigration(format!(
            "{} uses {} but no schema is configured",
            path.display(),
            SCHEMA_TOKEN
        ))
    })?;

    Ok(split_sql_statements(&sql)
        .into_iter()
        .map(SchemaOperation::Sql)
        .collect())
}

fn substitute_schema(sql: &str, schema: Option<&str>) -> std::result::Result<String, ()> {
    if !sql.contains(SCHEMA_TOKEN) {
        return Ok(sql.to_string());
    }
    schema.map(|name| sql.replace(SCHEMA_TOKEN, name)).ok_or(())
}

fn is_comment_only(statement: &str) -> bool {
    statement.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with("--")
    })
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim().trim_end_matches(';').trim();
    if !stmt.is_empty() && !is_comment_only(stmt) {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// Split SQL into individual statements.
///
/// Semicolons inside single-quoted strings, `--` comments and PostgreSQL
/// dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`) do not end a statement.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut in_comment = false;
    // Open dollar tag and the length of `current` right after it.
    let mut dollar: Option<(String, usize)> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if let Some((tag, body_start)) = dollar.take() {
            let closes =
                c == '$' && current.len() >= body_start + tag.len() && current.ends_with(&tag);
            if !closes {
                dollar = Some((tag, body_start));
            }
            continue;
        }

        if in_comment {
            in_comment = c != '\n';
            continue;
        }

        if in_quote {
            // A doubled '' toggles twice and stays inside the string.
            in_quote = c != '\'';
            continue;
        }

        match c {
            '\'' => in_quote = true,
            '-' if chars.peek() == Some(&'-') => in_comment = true,
            '$' => {
                let mut tag = String::from("$");
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        tag.push(next);
                        current.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if chars.peek() == Some(&'$') {
                    chars.next();
                    current.push('$');
                    tag.push('$');
                    dollar = Some((tag, current.len()));
                }
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => {}
        }
    }

    // The last statement may not end with ';'
    push_statement(&mut statements, &mut current);

    statements
}
