//! Accumulation of result tables and a status message, before rendering.
//!
//! A handler adds [`Row`]s to named [`Table`]s in a [`ResultBuilder`].
//! Each table is deduplicated on the primary key of it's [`Layout`]; the first row wins.
//! The builder is then rendered by [`render`] in the format the client asked for.

use crate::prelude::*;
use std::collections::HashSet;

/// A single cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A unsigned integer.
    UInt(u64),
    /// A floating point number.
    Float(f64),
    /// Text.
    Text(CompactString),
}
impl Value {
    /// Converts to a [`serde_json::Value`], for the JSON renderer.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => (*i).into(),
            Self::UInt(u) => (*u).into(),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.to_string()),
        }
    }
}
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => Display::fmt(b, f),
            Self::Int(i) => Display::fmt(i, f),
            Self::UInt(u) => Display::fmt(u, f),
            Self::Float(v) => Display::fmt(v, f),
            Self::Text(s) => f.write_str(s),
        }
    }
}
/// A [`Value`] as a primary key. Values of different types never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(u64),
    Text(CompactString),
}
impl From<Option<&Value>> for Key {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Null,
            Some(Value::Bool(b)) => Self::Bool(*b),
            Some(Value::Int(i)) => Self::Int(*i),
            Some(Value::UInt(u)) => Self::UInt(*u),
            Some(Value::Float(f)) => Self::Float(f.to_bits()),
            Some(Value::Text(s)) => Self::Text(s.clone()),
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Self::$variant(<$cast>::from(value))
                }
            }
        )*
    };
}
impl_from!(
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as CompactString,
    CompactString => Text as CompactString,
);
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_compact_string())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// The layout of a row type: it's name, fields and primary key.
///
/// Two layouts are the same layout if they compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// The logical name of the row type. The default table name.
    pub name: &'static str,
    /// The names of the fields, in order.
    pub fields: &'static [&'static str],
    /// The index of the primary key in [`Self::fields`].
    pub key: usize,
}
impl Layout {
    /// The name of the primary key field.
    #[must_use]
    pub fn key_name(&self) -> &'static str {
        self.fields.get(self.key).copied().unwrap_or("id")
    }
}

/// A type which can be added to a [`ResultBuilder`].
///
/// ```
/// # use hearth::prelude::*;
/// struct User {
///     id: u64,
///     name: String,
/// }
/// impl Row for User {
///     const LAYOUT: Layout = Layout {
///         name: "Users",
///         fields: &["id", "name"],
///         key: 0,
///     };
///     fn cells(&self) -> Vec<Value> {
///         vec![self.id.into(), self.name.as_str().into()]
///     }
/// }
/// ```
pub trait Row {
    /// The layout of all rows of this type.
    const LAYOUT: Layout;
    /// The cells of this row, one per field of [`Self::LAYOUT`].
    fn cells(&self) -> Vec<Value>;
}

/// A named, deduplicated collection of rows with a single [`Layout`].
#[derive(Debug, Clone)]
pub struct Table {
    layout: Layout,
    rows: Vec<Vec<Value>>,
    keys: HashSet<Key>,
}
impl Table {
    fn new(layout: Layout) -> Self {
        Self {
            layout,
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }
    /// Adds `cells` if no row with the same primary key exists.
    ///
    /// Returns whether the row was added.
    fn insert(&mut self, cells: Vec<Value>) -> bool {
        let key = Key::from(cells.get(self.layout.key));
        if !self.keys.insert(key) {
            return false;
        }
        self.rows.push(cells);
        true
    }
    /// The layout of the rows.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
    /// The rows, in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
    /// The number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    /// If there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The name of the table which holds all messages.
pub const MESSAGES: &str = "Messages";

/// A status message. The last one added decides the status of the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sequence number within the result.
    pub id: u64,
    /// The HTTP status.
    pub status: StatusCode,
    /// The classification.
    pub kind: ErrorKind,
    /// The text.
    pub text: CompactString,
}
impl Row for Message {
    const LAYOUT: Layout = Layout {
        name: MESSAGES,
        fields: &["id", "status", "kind", "text"],
        key: 0,
    };
    fn cells(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.status.as_u16().into(),
            self.kind.as_str().into(),
            self.text.clone().into(),
        ]
    }
}

/// Accumulates tables and a status message.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ResultBuilder {
    tables: Vec<(CompactString, Table)>,
    message: Option<Message>,
    messages: u64,
    headers: HeaderMap,
}
impl ResultBuilder {
    /// Creates a empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, name: &str, layout: Layout) -> Result<&mut Table, Error> {
        let position = self.tables.iter().position(|(n, _)| n == name);
        let index = if let Some(index) = position {
            let existing = &self.tables[index].1;
            if existing.layout != layout {
                return Err(Error::internal(format_compact!(
                    "table {name:?} has layout {}, tried to add rows of layout {}",
                    existing.layout.name,
                    layout.name
                )));
            }
            index
        } else {
            self.tables.push((name.to_compact_string(), Table::new(layout)));
            self.tables.len() - 1
        };
        Ok(&mut self.tables[index].1)
    }

    /// Adds `row` to the table named after the row type.
    ///
    /// A row with a primary key already in the table is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::InternalServerError`] if the table exists
    /// with another [`Layout`].
    pub fn add_struct<T: Row>(&mut self, row: &T) -> Result<&mut Self, Error> {
        self.add_struct_to(T::LAYOUT.name, row)
    }
    /// Adds `row` to the table `name`. See [`Self::add_struct`].
    ///
    /// # Errors
    ///
    /// See [`Self::add_struct`].
    pub fn add_struct_to<T: Row>(&mut self, name: &str, row: &T) -> Result<&mut Self, Error> {
        self.table_mut(name, T::LAYOUT)?.insert(row.cells());
        Ok(self)
    }
    /// Adds all `rows` to the table named after the row type.
    /// The table is created even if `rows` is empty.
    ///
    /// # Errors
    ///
    /// See [`Self::add_struct`].
    pub fn add_rows<'a, T: Row + 'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a T>,
    ) -> Result<&mut Self, Error> {
        self.add_rows_to(T::LAYOUT.name, rows)
    }
    /// Adds all `rows` to the table `name`. See [`Self::add_rows`].
    ///
    /// # Errors
    ///
    /// See [`Self::add_struct`].
    pub fn add_rows_to<'a, T: Row + 'a>(
        &mut self,
        name: &str,
        rows: impl IntoIterator<Item = &'a T>,
    ) -> Result<&mut Self, Error> {
        let table = self.table_mut(name, T::LAYOUT)?;
        for row in rows {
            table.insert(row.cells());
        }
        Ok(self)
    }

    /// Sets the current message and adds it to the [`MESSAGES`] table.
    pub fn add_message(
        &mut self,
        status: StatusCode,
        kind: ErrorKind,
        text: impl Into<CompactString>,
    ) -> &mut Self {
        self.messages += 1;
        let message = Message {
            id: self.messages,
            status,
            kind,
            text: text.into(),
        };
        // Message always has the same layout; this can't fail unless
        // someone else named their table `Messages`.
        if let Ok(table) = self.table_mut(MESSAGES, Message::LAYOUT) {
            table.insert(message.cells());
        }
        self.message = Some(message);
        self
    }
    /// Adds a success message with status `200 OK`.
    pub fn add_success(&mut self, text: impl Into<CompactString>) -> &mut Self {
        self.add_message(StatusCode::OK, ErrorKind::None, text)
    }
    /// Adds `error` as the current message.
    pub fn add_error(&mut self, error: &Error) -> &mut Self {
        self.add_message(error.status(), error.kind(), error.message())
    }
    /// Adds a header to the answer. Headers the answer already has take precedence.
    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// The current message.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }
    /// The status of the answer: the status of the current message, else `200 OK`.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.message.as_ref().map_or(StatusCode::OK, |m| m.status)
    }
    /// The tables, in the order they were created.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }
    /// Gets the table `name`.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, table)| table)
    }
    /// The headers added with [`Self::add_header`].
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    pub(crate) fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug)]
    pub(crate) struct User {
        pub(crate) id: u64,
        pub(crate) name: &'static str,
    }
    impl Row for User {
        const LAYOUT: Layout = Layout {
            name: "Users",
            fields: &["id", "name"],
            key: 0,
        };
        fn cells(&self) -> Vec<Value> {
            vec![self.id.into(), self.name.into()]
        }
    }
    pub(crate) struct Group {
        pub(crate) name: &'static str,
    }
    impl Row for Group {
        const LAYOUT: Layout = Layout {
            name: "Groups",
            fields: &["name"],
            key: 0,
        };
        fn cells(&self) -> Vec<Value> {
            vec![self.name.into()]
        }
    }

    #[test]
    fn first_row_wins() {
        let mut result = ResultBuilder::new();
        result
            .add_struct(&User { id: 1, name: "first" })
            .unwrap()
            .add_struct(&User { id: 1, name: "second" })
            .unwrap()
            .add_rows(&[User { id: 2, name: "other" }, User { id: 1, name: "third" }])
            .unwrap();
        let users = result.table("Users").unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.rows()[0][1], Value::from("first"));
        assert_eq!(users.rows()[1][0], Value::UInt(2));
    }

    struct Cell(Value);
    impl Row for Cell {
        const LAYOUT: Layout = Layout {
            name: "Cells",
            fields: &["value"],
            key: 0,
        };
        fn cells(&self) -> Vec<Value> {
            vec![self.0.clone()]
        }
    }

    #[test]
    fn keys_are_typed() {
        let mut result = ResultBuilder::new();
        result
            .add_rows(&[
                Cell(Value::Null),
                Cell(Value::from("")),
                Cell(Value::Int(1)),
                Cell(Value::from("1")),
                Cell(Value::Int(1)),
                Cell(Value::Null),
            ])
            .unwrap();
        let cells = result.table("Cells").unwrap();
        assert_eq!(cells.len(), 4);
        assert_eq!(cells.rows()[3][0], Value::from("1"));
    }

    #[test]
    fn named_tables_keep_order() {
        let mut result = ResultBuilder::new();
        result
            .add_struct_to("Admins", &User { id: 1, name: "root" })
            .unwrap()
            .add_struct(&User { id: 1, name: "root" })
            .unwrap();
        let names: Vec<_> = result.tables().map(|(name, _)| name).collect();
        assert_eq!(names, ["Admins", "Users"]);
    }

    #[test]
    fn layout_mismatch() {
        let mut result = ResultBuilder::new();
        result.add_struct(&User { id: 1, name: "a" }).unwrap();
        let error = result
            .add_struct_to("Users", &Group { name: "g" })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InternalServerError);
        assert!(result.table("Users").unwrap().len() == 1);
    }

    #[test]
    fn messages() {
        let mut result = ResultBuilder::new();
        assert_eq!(result.status(), StatusCode::OK);
        result.add_success("created");
        result.add_error(&Error::missing_rights("no admin flag"));
        let message = result.message().unwrap();
        assert_eq!(message.id, 2);
        assert_eq!(message.kind, ErrorKind::MissingRights);
        assert_eq!(result.status(), StatusCode::FORBIDDEN);
        assert_eq!(result.table(MESSAGES).unwrap().len(), 2);
    }
}
