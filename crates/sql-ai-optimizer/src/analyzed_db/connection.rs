//! Connection abstraction over the analyzed MySQL server.

use thiserror::Error;

/// One result row with column names in select order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn from_pairs(fields: impl IntoIterator<Item = (String, Option<String>)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&str>> {
        self.fields.iter().map(|(_, value)| value.as_deref())
    }

    /// Value of the named column; `None` when the column is absent or NULL.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Value at a column position.
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.fields.get(index).and_then(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the statement.
    #[error("{0}")]
    Driver(String),
}

/// Executes statements against the analyzed server.
///
/// When `schema` is given the implementation switches to it on the same
/// connection before running `sql`. `params` bind to `?` placeholders in order.
pub trait SqlConnection: Send + Sync {
    fn query(&self, schema: Option<&str>, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError>;

    /// `host:port` of the server, used to label runs.
    fn hostname_with_port(&self) -> String;
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
