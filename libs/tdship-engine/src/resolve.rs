use std::fmt;

use crate::error::ShipError;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 255;

/// A `(database, table)` pair on the remote service.
///
/// Names are lower-cased and must consist of 3..=255 characters of
/// `[a-z0-9_]`. Anything else is rejected instead of being rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    database: String,
    table: String,
}

impl Destination {
    pub fn new(database: &str, table: &str) -> Result<Self, ShipError> {
        Ok(Self {
            database: normalize_name("database", database)?,
            table: normalize_name("table", table)?,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Lower-case `raw` and check it against the service naming rules.
pub fn normalize_name(kind: &str, raw: &str) -> Result<String, ShipError> {
    let name = raw.to_ascii_lowercase();
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(ShipError::InvalidDestination(format!(
            "{kind} name {raw:?} must be between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        return Err(ShipError::InvalidDestination(format!(
            "{kind} name {raw:?} contains {c:?}; only letters, digits and '_' are allowed"
        )));
    }
    Ok(name)
}

/// Picks the destination of a batch: the configured one when present,
/// otherwise the last two dot-separated segments of the routing tag.
#[derive(Debug, Clone, Default)]
pub struct TagResolver {
    configured: Option<Destination>,
}

impl TagResolver {
    pub fn new(configured: Option<Destination>) -> Self {
        Self { configured }
    }

    pub fn configured(&self) -> Option<&Destination> {
        self.configured.as_ref()
    }

    pub fn resolve(&self, tag: &str) -> Result<Destination, ShipError> {
        if let Some(dest) = &self.configured {
            return Ok(dest.clone());
        }

        let mut parts = tag.rsplitn(3, '.');
        let table = parts.next();
        let database = parts.next();
        match (database, table) {
            (Some(database), Some(table)) => Destination::new(database, table)
                .map_err(|e| e.with_context(format!("tag {tag:?}"))),
            _ => Err(ShipError::InvalidDestination(format!(
                "tag {tag:?} does not name a database and a table"
            ))),
        }
    }
}
